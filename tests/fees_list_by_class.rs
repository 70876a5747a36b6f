
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn list_by_class_attaches_record_or_null() {
    let workspace = temp_dir("feebook-list-by-class");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Grade 5" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let mut student_ids = Vec::new();
    for (i, name) in ["Amina", "Bashir", "Caaliya"].iter().enumerate() {
        let s = request_ok(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "students.create",
            json!({ "classId": class_id, "lastName": "Omar", "firstName": name }),
        );
        student_ids.push(s["studentId"].as_str().expect("studentId").to_string());
    }

    let fee_a = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.create",
        json!({
            "studentId": student_ids[0],
            "amount": 50.0,
            "month": 5,
            "year": 2024,
            "dueDate": "2024-05-10"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.update",
        json!({ "feeId": fee_a["id"].as_str().expect("id"), "patch": { "paid": true } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "fees.create",
        json!({
            "studentId": student_ids[1],
            "amount": 50.0,
            "month": 5,
            "year": 2024,
            "dueDate": "2024-05-10"
        }),
    );

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "fees.listByClass",
        json!({ "classId": class_id, "month": 5, "year": 2024 }),
    );
    let rows = listing["students"].as_array().expect("students");
    assert_eq!(rows.len(), 3);

    let by_id = |sid: &str| {
        rows.iter()
            .find(|r| r["studentId"].as_str() == Some(sid))
            .expect("row")
    };
    assert_eq!(by_id(&student_ids[0])["feeRecord"]["paid"].as_bool(), Some(true));
    assert_eq!(by_id(&student_ids[1])["feeRecord"]["paid"].as_bool(), Some(false));
    assert!(by_id(&student_ids[2])["feeRecord"].is_null());

    // A record in another period does not leak into this listing.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "fees.create",
        json!({
            "studentId": student_ids[2],
            "amount": 50.0,
            "month": 6,
            "year": 2024,
            "dueDate": "2024-06-10"
        }),
    );
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "fees.listByClass",
        json!({ "classId": class_id, "month": 5, "year": 2024 }),
    );
    let rows = listing["students"].as_array().expect("students");
    assert!(rows
        .iter()
        .find(|r| r["studentId"].as_str() == Some(student_ids[2].as_str()))
        .expect("row")["feeRecord"]
        .is_null());
}

#[test]
fn list_all_applies_recognized_filters() {
    let workspace = temp_dir("feebook-list-all");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Grade 6" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let mut student_ids = Vec::new();
    for (i, name) in ["Deka", "Elmi"].iter().enumerate() {
        let s = request_ok(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "students.create",
            json!({ "classId": class_id, "lastName": "Nur", "firstName": name }),
        );
        student_ids.push(s["studentId"].as_str().expect("studentId").to_string());
    }

    let fee = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.create",
        json!({
            "studentId": student_ids[0],
            "amount": 40.0,
            "month": 3,
            "year": 2024,
            "dueDate": "2024-03-10"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.update",
        json!({ "feeId": fee["id"].as_str().expect("id"), "patch": { "paid": true } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "fees.create",
        json!({
            "studentId": student_ids[1],
            "amount": 40.0,
            "month": 3,
            "year": 2024,
            "dueDate": "2024-03-10"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "fees.create",
        json!({
            "studentId": student_ids[0],
            "amount": 40.0,
            "month": 4,
            "year": 2024,
            "dueDate": "2024-04-10"
        }),
    );

    let all = request_ok(&mut stdin, &mut reader, "8", "fees.listAll", json!({}));
    assert_eq!(all["fees"].as_array().map(|f| f.len()), Some(3));

    let march = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "fees.listAll",
        json!({ "month": 3, "year": 2024 }),
    );
    assert_eq!(march["fees"].as_array().map(|f| f.len()), Some(2));

    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "fees.listAll",
        json!({ "paid": true }),
    );
    assert_eq!(paid["fees"].as_array().map(|f| f.len()), Some(1));

    let per_student = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "fees.listAll",
        json!({ "studentId": student_ids[0] }),
    );
    assert_eq!(per_student["fees"].as_array().map(|f| f.len()), Some(2));
}

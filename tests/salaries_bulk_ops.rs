
use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn create_for_all_teachers_is_idempotent_per_period() {
    let workspace = temp_dir("feebook-salaries-bulk-create");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (i, name) in ["Abdi", "Barre", "Cawil"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("2-{}", i),
            "teachers.create",
            json!({ "lastName": "Mohamed", "firstName": name }),
        );
    }

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "salaries.createForAllTeachers",
        json!({ "amount": 800.0, "month": 9, "year": 2024 }),
    );
    assert_eq!(first["created"].as_array().map(|c| c.len()), Some(3));
    assert_eq!(first["skipped"].as_array().map(|s| s.len()), Some(0));

    // Second run for the same period creates nothing new.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "salaries.createForAllTeachers",
        json!({ "amount": 800.0, "month": 9, "year": 2024 }),
    );
    assert_eq!(second["created"].as_array().map(|c| c.len()), Some(0));
    assert_eq!(second["skipped"].as_array().map(|s| s.len()), Some(3));

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "salaries.list",
        json!({ "month": 9, "year": 2024 }),
    );
    assert_eq!(listing["salaries"].as_array().map(|s| s.len()), Some(3));

    // A teacher added later gets picked up without disturbing the others.
    let late = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.create",
        json!({ "lastName": "Mohamed", "firstName": "Dalmar" }),
    );
    let third = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "salaries.createForAllTeachers",
        json!({ "amount": 800.0, "month": 9, "year": 2024 }),
    );
    assert_eq!(third["created"].as_array().map(|c| c.len()), Some(1));
    assert_eq!(
        third["created"][0]["teacherId"].as_str(),
        late["teacherId"].as_str()
    );
    assert_eq!(third["skipped"].as_array().map(|s| s.len()), Some(3));
}

#[test]
fn single_create_enforces_period_uniqueness_and_derives_total() {
    let workspace = temp_dir("feebook-salaries-create");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({ "lastName": "Yusuf", "firstName": "Khadra", "subject": "Math" }),
    );
    let teacher_id = teacher["teacherId"].as_str().expect("teacherId").to_string();

    let salary = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "salaries.create",
        json!({
            "teacherId": teacher_id,
            "amount": 1000.0,
            "bonus": 100.0,
            "deductions": 50.0,
            "month": 9,
            "year": 2024
        }),
    );
    assert_eq!(salary["totalAmount"].as_f64(), Some(1050.0));
    assert_eq!(salary["paid"].as_bool(), Some(false));

    let dup = request(
        &mut stdin,
        &mut reader,
        "4",
        "salaries.create",
        json!({
            "teacherId": teacher_id,
            "amount": 900.0,
            "month": 9,
            "year": 2024
        }),
    );
    assert_eq!(error_code(&dup), Some("duplicate_record"));
}

#[test]
fn bulk_payment_status_reports_per_item() {
    let workspace = temp_dir("feebook-salaries-bulk-pay");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({ "lastName": "Ismail", "firstName": "Faduma" }),
    );
    let salary = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "salaries.create",
        json!({
            "teacherId": teacher["teacherId"].as_str().expect("teacherId"),
            "amount": 700.0,
            "month": 10,
            "year": 2024
        }),
    );
    let salary_id = salary["id"].as_str().expect("salary id").to_string();

    // One good update and one bogus id: the good one must land anyway.
    let outcome = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "salaries.bulkUpdatePaymentStatus",
        json!({
            "updates": [
                { "salaryId": salary_id, "paid": true },
                { "salaryId": "missing-id", "paid": true }
            ]
        }),
    );
    let results = outcome["results"].as_array().expect("results");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["ok"].as_bool(), Some(true));
    assert_eq!(results[1]["ok"].as_bool(), Some(false));
    assert_eq!(results[1]["error"].as_str(), Some("not_found"));

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "salaries.list",
        json!({ "month": 10, "year": 2024 }),
    );
    let row = &listing["salaries"][0];
    assert_eq!(row["paid"].as_bool(), Some(true));
    assert!(row["paidDate"].is_string());
}

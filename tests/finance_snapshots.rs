
use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn generate_monthly_appends_instead_of_replacing() {
    let workspace = temp_dir("feebook-snapshots-generate");
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
        json!({ "name": "Grade 7" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "lastName": "Dirie", "firstName": "Hamza" }),
    );
    let fee = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.create",
        json!({
            "studentId": student["studentId"].as_str().expect("id"),
            "amount": 75.0,
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
        json!({ "feeId": fee["id"].as_str().expect("id"), "patch": { "paid": true } }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "finance.generateMonthly",
        json!({ "month": 5, "year": 2024 }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "finance.generateMonthly",
        json!({ "month": 5, "year": 2024 }),
    );

    assert_ne!(first["id"], second["id"]);
    assert_eq!(first["income"].as_f64(), Some(75.0));
    assert_eq!(second["income"].as_f64(), Some(75.0));
    assert_eq!(first["expenses"].as_f64(), Some(0.0));
    assert_eq!(first["date"].as_str(), Some("2024-05-01"));
    assert_eq!(second["date"].as_str(), Some("2024-05-01"));

    let listing = request_ok(&mut stdin, &mut reader, "8", "finance.snapshots", json!({}));
    assert_eq!(listing["snapshots"].as_array().map(|s| s.len()), Some(2));

    // Snapshots are point-in-time: later ledger mutation does not touch them.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "fees.update",
        json!({ "feeId": fee["id"].as_str().expect("id"), "patch": { "paid": false } }),
    );
    let lookup = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "finance.snapshotGet",
        json!({ "snapshotId": first["id"].as_str().expect("id") }),
    );
    assert_eq!(lookup["income"].as_f64(), Some(75.0));
}

#[test]
fn manual_snapshot_entry_and_listing_order() {
    let workspace = temp_dir("feebook-snapshots-manual");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let negative = request(
        &mut stdin,
        &mut reader,
        "2",
        "finance.addSnapshot",
        json!({ "income": -1.0, "expenses": 0.0, "debt": 0.0, "date": "2024-01-31" }),
    );
    assert_eq!(error_code(&negative), Some("invalid_input"));

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "3",
        "finance.addSnapshot",
        json!({ "income": 10.0, "expenses": 0.0, "debt": 0.0, "date": "January" }),
    );
    assert_eq!(error_code(&bad_date), Some("invalid_input"));

    let older = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "finance.addSnapshot",
        json!({ "income": 100.0, "expenses": 40.0, "debt": 10.0, "date": "2024-01-31" }),
    );
    let newer = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "finance.addSnapshot",
        json!({ "income": 200.0, "expenses": 90.0, "debt": 5.0, "date": "2024-02-29" }),
    );

    let listing = request_ok(&mut stdin, &mut reader, "6", "finance.snapshots", json!({}));
    let snapshots = listing["snapshots"].as_array().expect("snapshots");
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0]["id"], newer["id"]);
    assert_eq!(snapshots[1]["id"], older["id"]);

    let missing = request(
        &mut stdin,
        &mut reader,
        "7",
        "finance.snapshotGet",
        json!({ "snapshotId": "missing" }),
    );
    assert_eq!(error_code(&missing), Some("not_found"));
}


use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn yearly_totals_match_monthly_summaries() {
    let workspace = temp_dir("feebook-yearly");
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
        json!({ "name": "Grade 8" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "lastName": "Guled", "firstName": "Zahra" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({ "lastName": "Guled", "firstName": "Omar" }),
    );
    let teacher_id = teacher["teacherId"].as_str().expect("teacherId").to_string();

    // Fees in three months, two of them paid; salaries in two months.
    for (i, (month, paid)) in [(2u32, true), (5u32, true), (9u32, false)]
        .into_iter()
        .enumerate()
    {
        let fee = request_ok(
            &mut stdin,
            &mut reader,
            &format!("5-{}", i),
            "fees.create",
            json!({
                "studentId": student_id,
                "amount": 30.0,
                "month": month,
                "year": 2024,
                "dueDate": format!("2024-{:02}-10", month)
            }),
        );
        if paid {
            let _ = request_ok(
                &mut stdin,
                &mut reader,
                &format!("6-{}", i),
                "fees.update",
                json!({ "feeId": fee["id"].as_str().expect("id"), "patch": { "paid": true } }),
            );
        }
    }
    for (i, month) in [3u32, 11u32].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("7-{}", i),
            "salaries.create",
            json!({
                "teacherId": teacher_id,
                "amount": 500.0,
                "month": month,
                "year": 2024,
                "paid": true
            }),
        );
    }

    let yearly = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "finance.yearly",
        json!({ "year": 2024 }),
    );
    let months = yearly["months"].as_array().expect("months");
    assert_eq!(months.len(), 12);

    let mut income_sum = 0.0;
    let mut expenses_sum = 0.0;
    let mut debt_sum = 0.0;
    for (i, month) in months.iter().enumerate() {
        assert_eq!(month["month"].as_u64(), Some(i as u64 + 1));
        let direct = request_ok(
            &mut stdin,
            &mut reader,
            &format!("9-{}", i),
            "finance.summary",
            json!({ "month": i + 1, "year": 2024 }),
        );
        assert_eq!(month["income"], direct["income"]);
        assert_eq!(month["expenses"], direct["expenses"]);
        assert_eq!(month["debt"], direct["debt"]);
        income_sum += direct["income"].as_f64().expect("income");
        expenses_sum += direct["expenses"].as_f64().expect("expenses");
        debt_sum += direct["debt"].as_f64().expect("debt");
    }

    let totals = &yearly["totals"];
    assert_eq!(totals["totalIncome"].as_f64(), Some(income_sum));
    assert_eq!(totals["totalExpenses"].as_f64(), Some(expenses_sum));
    assert_eq!(totals["totalDebt"].as_f64(), Some(debt_sum));
    assert_eq!(totals["totalPaidFees"].as_u64(), Some(2));
    assert_eq!(totals["totalUnpaidFees"].as_u64(), Some(1));
    assert_eq!(totals["totalPaidSalaries"].as_u64(), Some(2));

    assert_eq!(income_sum, 60.0);
    assert_eq!(expenses_sum, 1000.0);
    assert_eq!(debt_sum, 30.0);
}

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(code: &'static str, e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: if db::is_busy(&e) { "timeout" } else { code },
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "invalid_input",
            message: format!("missing {}", key),
            details: None,
        })
}

fn get_required_period(params: &serde_json::Value) -> Result<(u32, i32), HandlerErr> {
    let month = params
        .get("month")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr {
            code: "invalid_input",
            message: "missing month".to_string(),
            details: None,
        })?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr {
            code: "invalid_input",
            message: "month must be between 1 and 12".to_string(),
            details: Some(json!({ "month": month })),
        });
    }
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "invalid_input",
            message: "missing year".to_string(),
            details: None,
        })?;
    Ok((month as u32, year as i32))
}

fn get_amount(params: &serde_json::Value, key: &str, default: Option<f64>) -> Result<f64, HandlerErr> {
    let v = match params.get(key).and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => match default {
            Some(d) => return Ok(d),
            None => {
                return Err(HandlerErr {
                    code: "invalid_input",
                    message: format!("missing {}", key),
                    details: None,
                })
            }
        },
    };
    if v < 0.0 {
        return Err(HandlerErr {
            code: "invalid_input",
            message: format!("{} must not be negative", key),
            details: Some(json!({ "value": v })),
        });
    }
    Ok(v)
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone)]
struct SalaryRow {
    id: String,
    teacher_id: String,
    amount: f64,
    bonus: f64,
    deductions: f64,
    month: i64,
    year: i64,
    paid: bool,
    paid_date: Option<String>,
    note: Option<String>,
}

impl SalaryRow {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "teacherId": self.teacher_id,
            "amount": self.amount,
            "bonus": self.bonus,
            "deductions": self.deductions,
            // Always derived on read, never stored.
            "totalAmount": self.amount + self.bonus - self.deductions,
            "month": self.month,
            "year": self.year,
            "paid": self.paid,
            "paidDate": self.paid_date,
            "note": self.note
        })
    }
}

const SALARY_COLUMNS: &str =
    "id, teacher_id, amount, bonus, deductions, month, year, paid, paid_date, note";

fn map_salary_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SalaryRow> {
    Ok(SalaryRow {
        id: r.get(0)?,
        teacher_id: r.get(1)?,
        amount: r.get(2)?,
        bonus: r.get(3)?,
        deductions: r.get(4)?,
        month: r.get(5)?,
        year: r.get(6)?,
        paid: r.get::<_, i64>(7)? != 0,
        paid_date: r.get(8)?,
        note: r.get(9)?,
    })
}

fn load_salary(conn: &Connection, salary_id: &str) -> Result<SalaryRow, HandlerErr> {
    let sql = format!("SELECT {} FROM salary_records WHERE id = ?", SALARY_COLUMNS);
    conn.query_row(&sql, [salary_id], |r| map_salary_row(r))
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "salary record not found".to_string(),
            details: None,
        })
}

fn insert_salary(
    conn: &Connection,
    teacher_id: &str,
    amount: f64,
    bonus: f64,
    deductions: f64,
    month: u32,
    year: i32,
    note: &Option<String>,
    paid: bool,
) -> Result<String, HandlerErr> {
    let salary_id = Uuid::new_v4().to_string();
    let paid_date = if paid { Some(now_stamp()) } else { None };
    conn.execute(
        "INSERT INTO salary_records(id, teacher_id, amount, bonus, deductions, month, year, paid, paid_date, note, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &salary_id,
            teacher_id,
            amount,
            bonus,
            deductions,
            month,
            year,
            paid as i64,
            &paid_date,
            note,
            now_stamp(),
        ),
    )
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            HandlerErr {
                code: "duplicate_record",
                message: "teacher already has a salary record for this period".to_string(),
                details: Some(json!({ "teacherId": teacher_id, "month": month, "year": year })),
            }
        } else {
            db_err("db_insert_failed", e)
        }
    })?;
    Ok(salary_id)
}

fn salaries_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let amount = get_amount(params, "amount", None)?;
    let bonus = get_amount(params, "bonus", Some(0.0))?;
    let deductions = get_amount(params, "deductions", Some(0.0))?;
    let (month, year) = get_required_period(params)?;
    let note = params
        .get("note")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let paid = params.get("paid").and_then(|v| v.as_bool()).unwrap_or(false);

    let teacher_exists = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?
        .is_some();
    if !teacher_exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
            details: None,
        });
    }

    let salary_id = insert_salary(
        conn, &teacher_id, amount, bonus, deductions, month, year, &note, paid,
    )?;
    load_salary(conn, &salary_id).map(|row| row.to_json())
}

fn salaries_create_for_all_teachers(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let amount = get_amount(params, "amount", None)?;
    let bonus = get_amount(params, "bonus", Some(0.0))?;
    let deductions = get_amount(params, "deductions", Some(0.0))?;
    let (month, year) = get_required_period(params)?;
    let note = params
        .get("note")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut stmt = conn
        .prepare("SELECT id FROM teachers ORDER BY last_name, first_name")
        .map_err(|e| db_err("db_query_failed", e))?;
    let teacher_ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    // Existence is checked per teacher; a record that shows up between the
    // check and the insert just moves that teacher to the skipped list.
    let mut created: Vec<serde_json::Value> = Vec::new();
    let mut skipped: Vec<serde_json::Value> = Vec::new();
    for teacher_id in teacher_ids {
        let has_record = conn
            .query_row(
                "SELECT 1 FROM salary_records WHERE teacher_id = ? AND month = ? AND year = ?",
                (&teacher_id, month, year),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| db_err("db_query_failed", e))?
            .is_some();
        if has_record {
            skipped.push(json!({ "teacherId": teacher_id, "reason": "duplicate_record" }));
            continue;
        }
        match insert_salary(
            conn, &teacher_id, amount, bonus, deductions, month, year, &note, false,
        ) {
            Ok(salary_id) => {
                created.push(load_salary(conn, &salary_id)?.to_json());
            }
            Err(e) if e.code == "duplicate_record" => {
                skipped.push(json!({ "teacherId": teacher_id, "reason": "duplicate_record" }));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(json!({ "created": created, "skipped": skipped }))
}

fn salaries_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let salary_id = get_required_str(params, "salaryId")?;
    let Some(patch) = params.get("patch") else {
        return Err(HandlerErr {
            code: "invalid_input",
            message: "missing patch".to_string(),
            details: None,
        });
    };

    let existing = load_salary(conn, &salary_id)?;

    let amount = match patch.get("amount") {
        Some(_) => get_amount(patch, "amount", None)?,
        None => existing.amount,
    };
    let bonus = match patch.get("bonus") {
        Some(_) => get_amount(patch, "bonus", None)?,
        None => existing.bonus,
    };
    let deductions = match patch.get("deductions") {
        Some(_) => get_amount(patch, "deductions", None)?,
        None => existing.deductions,
    };
    let note = match patch.get("note") {
        Some(v) if v.is_null() => None,
        Some(v) => Some(v.as_str().unwrap_or_default().to_string()),
        None => existing.note.clone(),
    };
    let paid = patch
        .get("paid")
        .and_then(|v| v.as_bool())
        .unwrap_or(existing.paid);
    let paid_date = if paid {
        match patch.get("paidDate").and_then(|v| v.as_str()) {
            Some(v) => Some(v.to_string()),
            None => {
                if existing.paid {
                    existing.paid_date.clone()
                } else {
                    Some(now_stamp())
                }
            }
        }
    } else {
        None
    };

    conn.execute(
        "UPDATE salary_records
         SET amount = ?, bonus = ?, deductions = ?, note = ?, paid = ?, paid_date = ?
         WHERE id = ?",
        (
            amount,
            bonus,
            deductions,
            &note,
            paid as i64,
            &paid_date,
            &salary_id,
        ),
    )
    .map_err(|e| db_err("db_update_failed", e))?;

    load_salary(conn, &salary_id).map(|row| row.to_json())
}

fn salaries_bulk_update_payment_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(updates) = params.get("updates").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "invalid_input",
            message: "missing updates".to_string(),
            details: None,
        });
    };

    // Deliberately no enclosing transaction: each update lands or fails on
    // its own and is reported per item.
    let mut results: Vec<serde_json::Value> = Vec::with_capacity(updates.len());
    for update in updates {
        let Some(salary_id) = update.get("salaryId").and_then(|v| v.as_str()) else {
            results.push(json!({
                "salaryId": serde_json::Value::Null,
                "ok": false,
                "error": "invalid_input"
            }));
            continue;
        };
        let Some(paid) = update.get("paid").and_then(|v| v.as_bool()) else {
            results.push(json!({ "salaryId": salary_id, "ok": false, "error": "invalid_input" }));
            continue;
        };
        let paid_date = if paid {
            match update.get("paidDate").and_then(|v| v.as_str()) {
                Some(v) => Some(v.to_string()),
                None => Some(now_stamp()),
            }
        } else {
            None
        };

        let outcome = conn.execute(
            "UPDATE salary_records SET paid = ?, paid_date = ? WHERE id = ?",
            (paid as i64, &paid_date, salary_id),
        );
        match outcome {
            Ok(0) => {
                results.push(json!({ "salaryId": salary_id, "ok": false, "error": "not_found" }));
            }
            Ok(_) => {
                results.push(json!({ "salaryId": salary_id, "ok": true }));
            }
            Err(e) => {
                let code = if db::is_busy(&e) {
                    "timeout"
                } else {
                    "db_update_failed"
                };
                results.push(json!({ "salaryId": salary_id, "ok": false, "error": code }));
            }
        }
    }

    Ok(json!({ "results": results }))
}

/// Recognized `salaries.list` filters, mirroring the fee query surface.
#[derive(Debug, Default)]
struct SalaryQuery {
    month: Option<i64>,
    year: Option<i64>,
    paid: Option<bool>,
    teacher_id: Option<String>,
}

impl SalaryQuery {
    fn from_params(params: &serde_json::Value) -> Result<SalaryQuery, HandlerErr> {
        let month = match params.get("month") {
            Some(v) if !v.is_null() => {
                let m = v.as_i64().ok_or_else(|| HandlerErr {
                    code: "invalid_input",
                    message: "month must be numeric".to_string(),
                    details: None,
                })?;
                if !(1..=12).contains(&m) {
                    return Err(HandlerErr {
                        code: "invalid_input",
                        message: "month must be between 1 and 12".to_string(),
                        details: Some(json!({ "month": m })),
                    });
                }
                Some(m)
            }
            _ => None,
        };
        let year = match params.get("year") {
            Some(v) if !v.is_null() => Some(v.as_i64().ok_or_else(|| HandlerErr {
                code: "invalid_input",
                message: "year must be numeric".to_string(),
                details: None,
            })?),
            _ => None,
        };
        Ok(SalaryQuery {
            month,
            year,
            paid: params.get("paid").and_then(|v| v.as_bool()),
            teacher_id: params
                .get("teacherId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();
        if let Some(m) = self.month {
            clauses.push("month = ?");
            binds.push(Value::Integer(m));
        }
        if let Some(y) = self.year {
            clauses.push("year = ?");
            binds.push(Value::Integer(y));
        }
        if let Some(p) = self.paid {
            clauses.push("paid = ?");
            binds.push(Value::Integer(p as i64));
        }
        if let Some(tid) = &self.teacher_id {
            clauses.push("teacher_id = ?");
            binds.push(Value::Text(tid.clone()));
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, binds)
    }
}

fn salaries_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let query = SalaryQuery::from_params(params)?;
    let (where_sql, binds) = query.where_clause();
    let sql = format!(
        "SELECT {} FROM salary_records{} ORDER BY year, month, created_at",
        SALARY_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| map_salary_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    let salaries: Vec<serde_json::Value> = rows.iter().map(|row| row.to_json()).collect();
    Ok(json!({ "salaries": salaries }))
}

fn salaries_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let salary_id = get_required_str(params, "salaryId")?;
    let affected = conn
        .execute("DELETE FROM salary_records WHERE id = ?", [&salary_id])
        .map_err(|e| db_err("db_delete_failed", e))?;
    if affected == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "salary record not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "ok": true }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl Fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "salaries.create" => Some(with_conn(state, req, salaries_create)),
        "salaries.createForAllTeachers" => {
            Some(with_conn(state, req, salaries_create_for_all_teachers))
        }
        "salaries.update" => Some(with_conn(state, req, salaries_update)),
        "salaries.bulkUpdatePaymentStatus" => {
            Some(with_conn(state, req, salaries_bulk_update_payment_status))
        }
        "salaries.list" => Some(with_conn(state, req, salaries_list)),
        "salaries.delete" => Some(with_conn(state, req, salaries_delete)),
        _ => None,
    }
}

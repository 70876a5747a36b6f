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

fn get_required_amount(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    let v = params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr {
            code: "invalid_input",
            message: format!("missing {}", key),
            details: None,
        })?;
    if v < 0.0 {
        return Err(HandlerErr {
            code: "invalid_input",
            message: format!("{} must not be negative", key),
            details: Some(json!({ "value": v })),
        });
    }
    Ok(v)
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

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| db_err("db_query_failed", e))
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone)]
struct FeeRow {
    id: String,
    student_id: String,
    amount: f64,
    month: i64,
    year: i64,
    due_date: String,
    paid: bool,
    paid_date: Option<String>,
    note: Option<String>,
}

impl FeeRow {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "amount": self.amount,
            "month": self.month,
            "year": self.year,
            "dueDate": self.due_date,
            "paid": self.paid,
            "paidDate": self.paid_date,
            "note": self.note
        })
    }
}

fn map_fee_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FeeRow> {
    Ok(FeeRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        amount: r.get(2)?,
        month: r.get(3)?,
        year: r.get(4)?,
        due_date: r.get(5)?,
        paid: r.get::<_, i64>(6)? != 0,
        paid_date: r.get(7)?,
        note: r.get(8)?,
    })
}

const FEE_COLUMNS: &str = "id, student_id, amount, month, year, due_date, paid, paid_date, note";

fn load_fee(conn: &Connection, fee_id: &str) -> Result<FeeRow, HandlerErr> {
    let sql = format!("SELECT {} FROM fee_records WHERE id = ?", FEE_COLUMNS);
    conn.query_row(&sql, [fee_id], |r| map_fee_row(r))
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "fee record not found".to_string(),
            details: None,
        })
}

fn fees_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let amount = get_required_amount(params, "amount")?;
    let (month, year) = get_required_period(params)?;
    let due_date = get_required_str(params, "dueDate")?;
    let note = params
        .get("note")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let fee_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_records(id, student_id, amount, month, year, due_date, paid, paid_date, note, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 0, NULL, ?, ?)",
        (
            &fee_id,
            &student_id,
            amount,
            month,
            year,
            &due_date,
            &note,
            now_stamp(),
        ),
    )
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            HandlerErr {
                code: "duplicate_record",
                message: "student already has a fee record for this period".to_string(),
                details: Some(json!({ "studentId": student_id, "month": month, "year": year })),
            }
        } else {
            db_err("db_insert_failed", e)
        }
    })?;

    load_fee(conn, &fee_id).map(|row| row.to_json())
}

fn parse_family_students(
    params: &serde_json::Value,
) -> Result<Vec<(String, bool)>, HandlerErr> {
    let Some(raw) = params.get("students").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "invalid_input",
            message: "missing students".to_string(),
            details: None,
        });
    };
    if raw.is_empty() {
        return Err(HandlerErr {
            code: "invalid_input",
            message: "students must not be empty".to_string(),
            details: None,
        });
    }

    let mut students: Vec<(String, bool)> = Vec::with_capacity(raw.len());
    for entry in raw {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr {
                code: "invalid_input",
                message: "each student entry needs studentId".to_string(),
                details: None,
            });
        };
        let is_paying = entry
            .get("isPaying")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if students.iter().any(|(id, _)| id == student_id) {
            return Err(HandlerErr {
                code: "invalid_input",
                message: "duplicate studentId in family".to_string(),
                details: Some(json!({ "studentId": student_id })),
            });
        }
        students.push((student_id.to_string(), is_paying));
    }
    Ok(students)
}

fn family_fee_json(conn: &Connection, family_fee_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let record = conn
        .query_row(
            "SELECT id, family_name, total_amount, paid_amount, month, year, due_date, paid, payment_method, note
             FROM family_fee_records WHERE id = ?",
            [family_fee_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "familyName": r.get::<_, String>(1)?,
                    "totalAmount": r.get::<_, f64>(2)?,
                    "paidAmount": r.get::<_, f64>(3)?,
                    "month": r.get::<_, i64>(4)?,
                    "year": r.get::<_, i64>(5)?,
                    "dueDate": r.get::<_, String>(6)?,
                    "paid": r.get::<_, i64>(7)? != 0,
                    "paymentMethod": r.get::<_, Option<String>>(8)?,
                    "note": r.get::<_, Option<String>>(9)?
                }))
            },
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?;

    let Some(mut record) = record else {
        return Err(HandlerErr {
            code: "not_found",
            message: "family fee record not found".to_string(),
            details: None,
        });
    };

    let mut stmt = conn
        .prepare(
            "SELECT student_id, is_paying FROM family_fee_students
             WHERE family_fee_id = ? ORDER BY sort_order",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let students = stmt
        .query_map([family_fee_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "isPaying": r.get::<_, i64>(1)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    record["students"] = json!(students);
    Ok(record)
}

fn fees_create_family(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let family_name = get_required_str(params, "familyName")?;
    let total_amount = get_required_amount(params, "totalAmount")?;
    let (month, year) = get_required_period(params)?;
    let due_date = get_required_str(params, "dueDate")?;
    let note = params
        .get("note")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let students = parse_family_students(params)?;

    for (student_id, _) in &students {
        if !student_exists(conn, student_id)? {
            return Err(HandlerErr {
                code: "not_found",
                message: "student not found".to_string(),
                details: Some(json!({ "studentId": student_id })),
            });
        }
    }

    let family_fee_id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO family_fee_records(id, family_name, total_amount, paid_amount, month, year, due_date, paid, note, created_at)
         VALUES(?, ?, ?, 0, ?, ?, ?, 0, ?, ?)",
        (
            &family_fee_id,
            &family_name,
            total_amount,
            month,
            year,
            &due_date,
            &note,
            now_stamp(),
        ),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;
    for (i, (student_id, is_paying)) in students.iter().enumerate() {
        tx.execute(
            "INSERT INTO family_fee_students(family_fee_id, student_id, is_paying, sort_order)
             VALUES(?, ?, ?, ?)",
            (&family_fee_id, student_id, *is_paying as i64, i as i64),
        )
        .map_err(|e| db_err("db_insert_failed", e))?;
    }
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;

    family_fee_json(conn, &family_fee_id)
}

fn fees_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_required_str(params, "feeId")?;
    let Some(patch) = params.get("patch") else {
        return Err(HandlerErr {
            code: "invalid_input",
            message: "missing patch".to_string(),
            details: None,
        });
    };

    let existing = load_fee(conn, &fee_id)?;

    let amount = match patch.get("amount") {
        Some(v) => {
            let a = v.as_f64().ok_or_else(|| HandlerErr {
                code: "invalid_input",
                message: "amount must be numeric".to_string(),
                details: None,
            })?;
            if a < 0.0 {
                return Err(HandlerErr {
                    code: "invalid_input",
                    message: "amount must not be negative".to_string(),
                    details: Some(json!({ "value": a })),
                });
            }
            a
        }
        None => existing.amount,
    };
    let due_date = match patch.get("dueDate").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => existing.due_date.clone(),
    };
    let note = match patch.get("note") {
        Some(v) if v.is_null() => None,
        Some(v) => Some(v.as_str().unwrap_or_default().to_string()),
        None => existing.note.clone(),
    };

    // Paid flips drive paidDate: marking paid stamps "now" unless the caller
    // supplies a date; marking unpaid always clears it.
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
        "UPDATE fee_records
         SET amount = ?, due_date = ?, note = ?, paid = ?, paid_date = ?
         WHERE id = ?",
        (amount, &due_date, &note, paid as i64, &paid_date, &fee_id),
    )
    .map_err(|e| db_err("db_update_failed", e))?;

    load_fee(conn, &fee_id).map(|row| row.to_json())
}

fn fees_process_family_payment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let family_fee_id = get_required_str(params, "familyFeeId")?;
    let paid_amount = params
        .get("paidAmount")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr {
            code: "invalid_input",
            message: "missing paidAmount".to_string(),
            details: None,
        })?;
    let method = params
        .get("method")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let note = params
        .get("note")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let total_amount: f64 = conn
        .query_row(
            "SELECT total_amount FROM family_fee_records WHERE id = ?",
            [&family_fee_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "family fee record not found".to_string(),
            details: None,
        })?;

    if paid_amount <= 0.0 {
        return Err(HandlerErr {
            code: "invalid_amount",
            message: "paidAmount must be positive".to_string(),
            details: Some(json!({ "paidAmount": paid_amount })),
        });
    }
    if paid_amount > total_amount {
        return Err(HandlerErr {
            code: "invalid_amount",
            message: "paidAmount exceeds totalAmount".to_string(),
            details: Some(json!({ "paidAmount": paid_amount, "totalAmount": total_amount })),
        });
    }

    let paid = paid_amount >= total_amount;
    conn.execute(
        "UPDATE family_fee_records
         SET paid_amount = ?, paid = ?,
             payment_method = COALESCE(?, payment_method),
             note = COALESCE(?, note)
         WHERE id = ?",
        (paid_amount, paid as i64, &method, &note, &family_fee_id),
    )
    .map_err(|e| db_err("db_update_failed", e))?;

    family_fee_json(conn, &family_fee_id)
}

fn fees_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_required_str(params, "feeId")?;
    let affected = conn
        .execute("DELETE FROM fee_records WHERE id = ?", [&fee_id])
        .map_err(|e| db_err("db_delete_failed", e))?;
    if affected == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "fee record not found".to_string(),
            details: None,
        });
    }
    Ok(json!({ "ok": true }))
}

fn fees_delete_family(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let family_fee_id = get_required_str(params, "familyFeeId")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err("db_tx_failed", e))?;
    tx.execute(
        "DELETE FROM family_fee_students WHERE family_fee_id = ?",
        [&family_fee_id],
    )
    .map_err(|e| db_err("db_delete_failed", e))?;
    let affected = tx
        .execute("DELETE FROM family_fee_records WHERE id = ?", [&family_fee_id])
        .map_err(|e| db_err("db_delete_failed", e))?;
    if affected == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "not_found",
            message: "family fee record not found".to_string(),
            details: None,
        });
    }
    tx.commit().map_err(|e| db_err("db_commit_failed", e))?;
    Ok(json!({ "ok": true }))
}

fn fees_list_by_class(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let (month, year) = get_required_period(params)?;

    let class_exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| db_err("db_query_failed", e))?
        .is_some();
    if !class_exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    // Every student of the class, with their fee for the period attached or
    // null. "No record" is distinct from "unpaid" downstream.
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name, s.active,
                    f.id, f.student_id, f.amount, f.month, f.year, f.due_date, f.paid, f.paid_date, f.note
             FROM students s
             LEFT JOIN fee_records f
               ON f.student_id = s.id AND f.month = ? AND f.year = ?
             WHERE s.class_id = ?
             ORDER BY s.sort_order",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map((month, year, &class_id), |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let fee = match r.get::<_, Option<String>>(4)? {
                Some(fee_id) => json!({
                    "id": fee_id,
                    "studentId": r.get::<_, String>(5)?,
                    "amount": r.get::<_, f64>(6)?,
                    "month": r.get::<_, i64>(7)?,
                    "year": r.get::<_, i64>(8)?,
                    "dueDate": r.get::<_, String>(9)?,
                    "paid": r.get::<_, i64>(10)? != 0,
                    "paidDate": r.get::<_, Option<String>>(11)?,
                    "note": r.get::<_, Option<String>>(12)?
                }),
                None => serde_json::Value::Null,
            };
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "displayName": format!("{}, {}", last, first),
                "active": r.get::<_, i64>(3)? != 0,
                "feeRecord": fee
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    Ok(json!({ "month": month, "year": year, "students": rows }))
}

/// Recognized `fees.listAll` filters. Unknown keys are simply not part of
/// the query surface.
#[derive(Debug, Default)]
struct FeeQuery {
    month: Option<i64>,
    year: Option<i64>,
    paid: Option<bool>,
    student_id: Option<String>,
}

impl FeeQuery {
    fn from_params(params: &serde_json::Value) -> Result<FeeQuery, HandlerErr> {
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
        let paid = params.get("paid").and_then(|v| v.as_bool());
        let student_id = params
            .get("studentId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Ok(FeeQuery {
            month,
            year,
            paid,
            student_id,
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
        if let Some(sid) = &self.student_id {
            clauses.push("student_id = ?");
            binds.push(Value::Text(sid.clone()));
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, binds)
    }
}

fn fees_list_all(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let query = FeeQuery::from_params(params)?;
    let (where_sql, binds) = query.where_clause();
    let sql = format!(
        "SELECT {} FROM fee_records{} ORDER BY year, month, created_at",
        FEE_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| map_fee_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    let fees: Vec<serde_json::Value> = rows.iter().map(|row| row.to_json()).collect();
    Ok(json!({ "fees": fees }))
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
        "fees.create" => Some(with_conn(state, req, fees_create)),
        "fees.createFamily" => Some(with_conn(state, req, fees_create_family)),
        "fees.update" => Some(with_conn(state, req, fees_update)),
        "fees.processFamilyPayment" => Some(with_conn(state, req, fees_process_family_payment)),
        "fees.delete" => Some(with_conn(state, req, fees_delete)),
        "fees.deleteFamily" => Some(with_conn(state, req, fees_delete_family)),
        "fees.listByClass" => Some(with_conn(state, req, fees_list_by_class)),
        "fees.listAll" => Some(with_conn(state, req, fees_list_all)),
        _ => None,
    }
}

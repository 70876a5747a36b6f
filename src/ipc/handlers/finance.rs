use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::summary::{self, FeeEntry, FinanceSummary, SalaryEntry};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
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

fn get_required_year(params: &serde_json::Value) -> Result<i32, HandlerErr> {
    params
        .get("year")
        .and_then(|v| v.as_i64())
        .map(|y| y as i32)
        .ok_or_else(|| HandlerErr {
            code: "invalid_input",
            message: "missing year".to_string(),
            details: None,
        })
}

fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Period fees from both ledger tables, flattened into the shared entry type
/// so the summary math never branches on fee kind.
fn collect_fee_entries(
    conn: &Connection,
    month: u32,
    year: i32,
) -> Result<Vec<FeeEntry>, HandlerErr> {
    let mut entries: Vec<FeeEntry> = Vec::new();

    let mut stmt = conn
        .prepare("SELECT amount, paid FROM fee_records WHERE month = ? AND year = ?")
        .map_err(|e| db_err("db_query_failed", e))?;
    let individual = stmt
        .query_map((month, year), |r| {
            Ok(FeeEntry::Individual {
                amount: r.get(0)?,
                paid: r.get::<_, i64>(1)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    entries.extend(individual);

    let mut stmt = conn
        .prepare(
            "SELECT total_amount, paid_amount, paid
             FROM family_fee_records WHERE month = ? AND year = ?",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let family = stmt
        .query_map((month, year), |r| {
            Ok(FeeEntry::Family {
                total_amount: r.get(0)?,
                paid_amount: r.get(1)?,
                paid: r.get::<_, i64>(2)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;
    entries.extend(family);

    Ok(entries)
}

fn collect_salary_entries(
    conn: &Connection,
    month: u32,
    year: i32,
) -> Result<Vec<SalaryEntry>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT amount, bonus, deductions, paid
             FROM salary_records WHERE month = ? AND year = ?",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    stmt.query_map((month, year), |r| {
        Ok(SalaryEntry {
            amount: r.get(0)?,
            bonus: r.get(1)?,
            deductions: r.get(2)?,
            paid: r.get::<_, i64>(3)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| db_err("db_query_failed", e))
}

/// Live recomputation from ledger state. An empty period is not an error; it
/// folds to zeroed totals.
fn compute_summary(conn: &Connection, month: u32, year: i32) -> Result<FinanceSummary, HandlerErr> {
    let fees = collect_fee_entries(conn, month, year)?;
    let salaries = collect_salary_entries(conn, month, year)?;
    Ok(summary::monthly_summary(month, year, fees, salaries))
}

fn summary_to_json(s: &FinanceSummary) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(s).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn finance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (month, year) = get_required_period(params)?;
    let s = compute_summary(conn, month, year)?;
    summary_to_json(&s)
}

fn finance_yearly(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let year = get_required_year(params)?;
    let mut months: Vec<FinanceSummary> = Vec::with_capacity(12);
    for month in 1..=12u32 {
        months.push(compute_summary(conn, month, year)?);
    }
    let breakdown = summary::yearly_breakdown(year, months);
    serde_json::to_value(&breakdown).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn snapshot_json(conn: &Connection, snapshot_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, income, expenses, debt, date, created_at
         FROM finance_snapshots WHERE id = ?",
        [snapshot_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "income": r.get::<_, f64>(1)?,
                "expenses": r.get::<_, f64>(2)?,
                "debt": r.get::<_, f64>(3)?,
                "date": r.get::<_, String>(4)?,
                "createdAt": r.get::<_, String>(5)?
            }))
        },
    )
    .optional()
    .map_err(|e| db_err("db_query_failed", e))?
    .ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "finance snapshot not found".to_string(),
        details: None,
    })
}

fn insert_snapshot(
    conn: &Connection,
    income: f64,
    expenses: f64,
    debt: f64,
    date: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let snapshot_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO finance_snapshots(id, income, expenses, debt, date, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&snapshot_id, income, expenses, debt, date, now_stamp()),
    )
    .map_err(|e| db_err("db_insert_failed", e))?;
    snapshot_json(conn, &snapshot_id)
}

fn finance_generate_monthly(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (month, year) = get_required_period(params)?;
    let s = compute_summary(conn, month, year)?;

    // Snapshots are an append-only log: generating twice for a period keeps
    // both rows. The date is pinned to the period's first day so month/year
    // infer back to what was aggregated. Counts are not persisted.
    let date = format!("{:04}-{:02}-01", year, month);
    insert_snapshot(conn, s.income, s.expenses, s.debt, &date)
}

fn finance_add_snapshot(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut figures = [0.0f64; 3];
    for (i, key) in ["income", "expenses", "debt"].iter().enumerate() {
        let v = params
            .get(*key)
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
        figures[i] = v;
    }
    let date = params
        .get("date")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr {
            code: "invalid_input",
            message: "missing date".to_string(),
            details: None,
        })?;
    if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(HandlerErr {
            code: "invalid_input",
            message: "date must be YYYY-MM-DD".to_string(),
            details: Some(json!({ "date": date })),
        });
    }

    insert_snapshot(conn, figures[0], figures[1], figures[2], date)
}

fn finance_snapshots(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, income, expenses, debt, date, created_at
             FROM finance_snapshots
             ORDER BY date DESC, created_at DESC",
        )
        .map_err(|e| db_err("db_query_failed", e))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "income": r.get::<_, f64>(1)?,
                "expenses": r.get::<_, f64>(2)?,
                "debt": r.get::<_, f64>(3)?,
                "date": r.get::<_, String>(4)?,
                "createdAt": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err("db_query_failed", e))?;

    Ok(json!({ "snapshots": rows }))
}

fn finance_snapshot_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let snapshot_id = params
        .get("snapshotId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr {
            code: "invalid_input",
            message: "missing snapshotId".to_string(),
            details: None,
        })?;
    snapshot_json(conn, snapshot_id)
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
        "finance.summary" => Some(with_conn(state, req, finance_summary)),
        "finance.yearly" => Some(with_conn(state, req, finance_yearly)),
        "finance.generateMonthly" => Some(with_conn(state, req, finance_generate_monthly)),
        "finance.addSnapshot" => Some(with_conn(state, req, finance_add_snapshot)),
        "finance.snapshots" => Some(with_conn(state, req, finance_snapshots)),
        "finance.snapshotGet" => Some(with_conn(state, req, finance_snapshot_get)),
        _ => None,
    }
}

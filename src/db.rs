use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Bound on how long a statement may wait on a locked database before the
/// caller gets a `timeout` error back.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("feebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            subject TEXT,
            active INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            amount REAL NOT NULL,
            month INTEGER NOT NULL,
            year INTEGER NOT NULL,
            due_date TEXT NOT NULL,
            paid INTEGER NOT NULL DEFAULT 0,
            paid_date TEXT,
            note TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, month, year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_records_student ON fee_records(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_records_period ON fee_records(year, month)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS family_fee_records(
            id TEXT PRIMARY KEY,
            family_name TEXT NOT NULL,
            total_amount REAL NOT NULL,
            paid_amount REAL NOT NULL DEFAULT 0,
            month INTEGER NOT NULL,
            year INTEGER NOT NULL,
            due_date TEXT NOT NULL,
            paid INTEGER NOT NULL DEFAULT 0,
            note TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_family_fee_records_period ON family_fee_records(year, month)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS family_fee_students(
            family_fee_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            is_paying INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(family_fee_id, student_id),
            FOREIGN KEY(family_fee_id) REFERENCES family_fee_records(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_family_fee_students_student ON family_fee_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS salary_records(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            amount REAL NOT NULL,
            bonus REAL NOT NULL DEFAULT 0,
            deductions REAL NOT NULL DEFAULT 0,
            month INTEGER NOT NULL,
            year INTEGER NOT NULL,
            paid INTEGER NOT NULL DEFAULT 0,
            paid_date TEXT,
            note TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            UNIQUE(teacher_id, month, year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_salary_records_teacher ON salary_records(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_salary_records_period ON salary_records(year, month)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS finance_snapshots(
            id TEXT PRIMARY KEY,
            income REAL NOT NULL,
            expenses REAL NOT NULL,
            debt REAL NOT NULL,
            date TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_finance_snapshots_date ON finance_snapshots(date)",
        [],
    )?;

    // Existing workspaces may predate family payment methods. Add if needed.
    ensure_family_payment_method(&conn)?;

    Ok(conn)
}

fn ensure_family_payment_method(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "family_fee_records", "payment_method")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE family_fee_records ADD COLUMN payment_method TEXT",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// True when the error is SQLite reporting a locked/busy database, i.e. the
/// busy timeout elapsed without the lock clearing.
pub fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

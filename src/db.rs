use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE: &str = "rollcall.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE))?;
    // Other processes may hold the write lock on the same workspace.
    conn.busy_timeout(Duration::from_secs(2))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            room TEXT,
            capacity INTEGER
        )",
        [],
    )?;
    ensure_classes_capacity(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_sessions(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_sessions_class ON class_sessions(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            current_season_score INTEGER NOT NULL DEFAULT 0,
            gold INTEGER NOT NULL DEFAULT 0,
            lifetime_score INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            cycle_length INTEGER,
            total_sessions INTEGER,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class ON enrollments(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cancellations(
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            reason TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY(class_id, date),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            session_date TEXT NOT NULL,
            status TEXT NOT NULL,
            is_makeup INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            PRIMARY KEY(student_id, class_id, session_date),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    ensure_attendance_is_makeup(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_session ON attendance(class_id, session_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS makeup_requests(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            enrollment_id TEXT,
            original_class_id TEXT NOT NULL,
            original_session_date TEXT NOT NULL,
            new_class_id TEXT NOT NULL,
            new_session_date TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(new_class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_makeup_requests_student ON makeup_requests(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_makeup_requests_target ON makeup_requests(new_class_id, new_session_date)",
        [],
    )?;

    // Not authoritative data: the instructor's uncommitted edits for one session.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS staged_edits(
            class_id TEXT NOT NULL,
            session_date TEXT NOT NULL,
            payload TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY(class_id, session_date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

// Workspaces created before capacity tracking have no capacity column.
fn ensure_classes_capacity(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "capacity")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE classes ADD COLUMN capacity INTEGER", [])?;
    Ok(())
}

fn ensure_attendance_is_makeup(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance", "is_makeup")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE attendance ADD COLUMN is_makeup INTEGER NOT NULL DEFAULT 0",
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = open_db(dir.path()).expect("first open");
        drop(conn);
        let conn = open_db(dir.path()).expect("second open");
        assert!(table_has_column(&conn, "attendance", "is_makeup").expect("pragma"));
        assert!(table_has_column(&conn, "classes", "capacity").expect("pragma"));
    }

    #[test]
    fn settings_roundtrip_overwrites() {
        let conn = open_in_memory().expect("db");
        assert!(settings_get_json(&conn, "policy.attendance").expect("get").is_none());
        settings_set_json(&conn, "policy.attendance", &json!({ "presentPoints": 80 }))
            .expect("set");
        settings_set_json(&conn, "policy.attendance", &json!({ "presentPoints": 90 }))
            .expect("set again");
        assert_eq!(
            settings_get_json(&conn, "policy.attendance").expect("get"),
            Some(json!({ "presentPoints": 90 }))
        );
    }
}

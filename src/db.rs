use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

/// Opens the workspace database and makes sure the tables the engine reads
/// exist. Rows are written by the grade-entry collaborator; outside of
/// schema migrations the engine only writes `settings`.
pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            term TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            academic_no TEXT,
            notes TEXT,
            deleted_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    // Workspaces created before soft delete and academic numbers existed.
    ensure_students_academic_no(&conn)?;
    ensure_students_deleted_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            title TEXT NOT NULL,
            bucket TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 0,
            due_at TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    ensure_activities_sort_order(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_class ON activities(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            activity_id TEXT NOT NULL,
            points REAL,
            graded_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(activity_id) REFERENCES activities(id),
            UNIQUE(student_id, activity_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_activity ON grades(activity_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_academic_no(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "academic_no")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN academic_no TEXT", [])?;
    Ok(())
}

fn ensure_students_deleted_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "deleted_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN deleted_at TEXT", [])?;
    Ok(())
}

fn ensure_activities_sort_order(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "activities", "sort_order")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE activities ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    // Best-effort backfill from insert order.
    conn.execute("UPDATE activities SET sort_order = rowid", [])?;
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

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(None),
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, text),
    )?;
    Ok(())
}

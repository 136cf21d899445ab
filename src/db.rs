use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("sectionplan.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            capacity INTEGER NOT NULL,
            block1 INTEGER NOT NULL,
            block2 INTEGER NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            course TEXT,
            preference TEXT,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sort ON students(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            student_code TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(student_code, subject_id),
            FOREIGN KEY(student_code) REFERENCES students(code),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_code)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_subject ON enrollments(subject_id)",
        [],
    )?;

    // Pairs are stored normalized (a < b); the engine symmetrizes.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS conflict_pairs(
            a TEXT NOT NULL,
            b TEXT NOT NULL,
            PRIMARY KEY(a, b),
            FOREIGN KEY(a) REFERENCES students(code),
            FOREIGN KEY(b) REFERENCES students(code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS preassignments(
            student_code TEXT NOT NULL,
            section_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(student_code, section_id),
            FOREIGN KEY(student_code) REFERENCES students(code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_preassignments_student ON preassignments(student_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs(
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            strategy TEXT NOT NULL,
            result TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Existing workspaces may predate per-enrollment ordering.
    ensure_enrollments_sort_order(&conn)?;

    Ok(conn)
}

fn ensure_enrollments_sort_order(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "enrollments", "sort_order")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE enrollments ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

#[allow(dead_code)]
pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
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

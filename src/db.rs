use crate::config::Config;
use crate::password;
use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "school.sqlite3";

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn open_db(workspace: &Path, cfg: &Config) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    bootstrap_admin(&conn, cfg)?;
    Ok(conn)
}

pub fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL DEFAULT '',
            role TEXT NOT NULL,
            assigned_class TEXT,
            password_hash TEXT NOT NULL,
            temp_password INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            name TEXT PRIMARY KEY,
            grade INTEGER,
            section TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            index_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            admission_year INTEGER,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            stream TEXT NOT NULL DEFAULT 'Common',
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subjects(
            class_name TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(class_name, subject_id),
            FOREIGN KEY(class_name) REFERENCES classes(name),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            term_number INTEGER NOT NULL,
            name TEXT NOT NULL,
            exam_month INTEGER NOT NULL,
            exam_year INTEGER NOT NULL,
            academic_year TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'inactive',
            created_at TEXT NOT NULL,
            UNIQUE(academic_year, term_number)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            marks REAL,
            status TEXT NOT NULL,
            teacher_id TEXT,
            entered_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(student_id, subject_id, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_term ON marks(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            class_name TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            boys INTEGER NOT NULL,
            girls INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(date, class_name, teacher_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date ON attendance(class_name, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            total_days INTEGER NOT NULL,
            attended_days INTEGER NOT NULL,
            absent_days INTEGER NOT NULL,
            percentage REAL NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(student_id, term_id, academic_year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS promotion_history(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            from_class TEXT NOT NULL,
            to_class TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            promoted_by TEXT,
            promoted_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_promotion_history_student ON promotion_history(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS saved_reports(
            id TEXT PRIMARY KEY,
            term_id TEXT NOT NULL,
            class_name TEXT,
            academic_year TEXT NOT NULL,
            ranking_method TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_by TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;

    Ok(())
}

/// An empty user table gets one admin with a temporary password.
fn bootstrap_admin(conn: &Connection, cfg: &Config) -> anyhow::Result<()> {
    let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if users > 0 {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO users(id, username, full_name, role, assigned_class, password_hash, temp_password, status, created_at)
         VALUES(?, ?, 'Administrator', 'admin', NULL, ?, 1, 'active', ?)",
        (
            new_id(),
            &cfg.admin_username,
            password::hash_password(&cfg.admin_password)?,
            now_rfc3339(),
        ),
    )
    .context("failed to create bootstrap admin")?;
    tracing::warn!(
        username = %cfg.admin_username,
        "created bootstrap admin with a temporary password"
    );
    Ok(())
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute("PRAGMA foreign_keys = ON", []).expect("pragma");
    create_schema(&conn).expect("schema");
    conn
}

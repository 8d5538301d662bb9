//! Lookups shared by several handler families.

use crate::error::{AppError, AppResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_INACTIVE: &str = "inactive";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermInfo {
    pub id: String,
    pub term_number: i64,
    pub name: String,
    pub exam_month: i64,
    pub exam_year: i64,
    pub academic_year: String,
    pub status: String,
}

pub const TERM_COLUMNS: &str =
    "id, term_number, name, exam_month, exam_year, academic_year, status";

pub fn term_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TermInfo> {
    Ok(TermInfo {
        id: r.get(0)?,
        term_number: r.get(1)?,
        name: r.get(2)?,
        exam_month: r.get(3)?,
        exam_year: r.get(4)?,
        academic_year: r.get(5)?,
        status: r.get(6)?,
    })
}

pub fn load_term(conn: &Connection, term_id: &str) -> AppResult<TermInfo> {
    conn.query_row(
        &format!("SELECT {TERM_COLUMNS} FROM terms WHERE id = ?"),
        [term_id],
        term_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("term"))
}

/// Current class of a student, regardless of status.
pub fn student_class(conn: &Connection, student_id: &str) -> AppResult<String> {
    conn.query_row(
        "SELECT class_name FROM students WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound(format!("student {student_id} not found")))
}

pub fn subject_exists(conn: &Connection, subject_id: &str) -> AppResult<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn class_exists(conn: &Connection, class_name: &str) -> AppResult<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM classes WHERE name = ?", [class_name], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn require_class(conn: &Connection, class_name: &str) -> AppResult<()> {
    if class_exists(conn, class_name)? {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("class {class_name} not found")))
    }
}

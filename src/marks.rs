use crate::auth::Identity;
use crate::db::{new_id, now_rfc3339};
use crate::error::{AppError, AppResult};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;

pub const ABSENT_SENTINEL: &str = "AB";
pub const STATUS_ABSENT: &str = "absent";
pub const MAX_BATCH_ENTRIES: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkValue {
    Absent,
    Score(u8),
}

impl MarkValue {
    /// `"AB"` in any case, or a whole number 0..=100 given as a number or digits.
    pub fn parse(raw: &serde_json::Value) -> Result<MarkValue, String> {
        let out_of_range = || "marks must be an integer between 0 and 100, or AB".to_string();
        match raw {
            serde_json::Value::String(s) => {
                let t = s.trim();
                if t.eq_ignore_ascii_case(ABSENT_SENTINEL) {
                    return Ok(MarkValue::Absent);
                }
                let n: i64 = t.parse().map_err(|_| out_of_range())?;
                Self::score(n as f64).ok_or_else(out_of_range)
            }
            serde_json::Value::Number(n) => n
                .as_f64()
                .and_then(Self::score)
                .ok_or_else(out_of_range),
            _ => Err(out_of_range()),
        }
    }

    fn score(v: f64) -> Option<MarkValue> {
        if v.fract() != 0.0 || !(0.0..=100.0).contains(&v) {
            return None;
        }
        Some(MarkValue::Score(v as u8))
    }

    /// Stored `(marks, status)` pair.
    pub fn storage(self) -> (Option<f64>, &'static str) {
        match self {
            MarkValue::Absent => (None, STATUS_ABSENT),
            MarkValue::Score(v) => (Some(f64::from(v)), store::STATUS_ACTIVE),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkEntry {
    pub student_id: String,
    pub subject_id: String,
    pub value: MarkValue,
}

/// Validates shape and values of every entry before anything touches the store.
pub fn parse_entries(raw: &[serde_json::Value]) -> AppResult<Vec<MarkEntry>> {
    if raw.is_empty() {
        return Err(AppError::validation("marks batch is empty"));
    }
    if raw.len() > MAX_BATCH_ENTRIES {
        return Err(AppError::validation(format!(
            "marks batch exceeds {MAX_BATCH_ENTRIES} entries"
        )));
    }
    raw.iter()
        .enumerate()
        .map(|(i, entry)| {
            let field = |key: &str| {
                entry
                    .get(key)
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| AppError::validation(format!("entry {i}: missing {key}")))
            };
            let student_id = field("studentId")?;
            let subject_id = field("subjectId")?;
            let Some(raw_value) = entry.get("marks") else {
                return Err(AppError::validation(format!("entry {i}: missing marks")));
            };
            let value = MarkValue::parse(raw_value)
                .map_err(|msg| AppError::validation(format!("entry {i}: {msg}")))?;
            Ok(MarkEntry {
                student_id,
                subject_id,
                value,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Checks referenced rows and the caller's class scope for the whole batch.
pub fn authorize_entries(
    conn: &Connection,
    who: &Identity,
    entries: &[MarkEntry],
) -> AppResult<()> {
    let mut classes: HashMap<&str, String> = HashMap::new();
    for e in entries {
        if !classes.contains_key(e.student_id.as_str()) {
            let class_name = store::student_class(conn, &e.student_id)?;
            classes.insert(e.student_id.as_str(), class_name);
        }
        if !store::subject_exists(conn, &e.subject_id)? {
            return Err(AppError::NotFound(format!(
                "subject {} not found",
                e.subject_id
            )));
        }
    }
    for (student_id, class_name) in &classes {
        if !who.may_write_class(class_name) {
            return Err(AppError::forbidden(format!(
                "student {student_id} is in class {class_name}, outside your assigned class"
            )));
        }
    }
    Ok(())
}

/// All-or-nothing upsert of a validated, authorized batch.
pub fn upsert_marks(
    conn: &Connection,
    who: &Identity,
    term_id: &str,
    entries: &[MarkEntry],
) -> AppResult<UpsertSummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = UpsertSummary::default();
    let now = now_rfc3339();
    for e in entries {
        let (marks, status) = e.value.storage();
        let existed = tx
            .query_row(
                "SELECT 1 FROM marks WHERE student_id = ? AND subject_id = ? AND term_id = ?",
                (&e.student_id, &e.subject_id, term_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        tx.execute(
            "INSERT INTO marks(id, student_id, subject_id, term_id, marks, status, teacher_id, entered_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_id, term_id) DO UPDATE SET
               marks = excluded.marks,
               status = excluded.status,
               teacher_id = excluded.teacher_id,
               updated_at = excluded.updated_at",
            (
                new_id(),
                &e.student_id,
                &e.subject_id,
                term_id,
                marks,
                status,
                &who.user_id,
                &now,
                &now,
            ),
        )?;
        if existed {
            summary.updated += 1;
        } else {
            summary.inserted += 1;
        }
    }
    tx.commit()?;
    Ok(summary)
}

/// Full ingestion path: validate, resolve, authorize, then write atomically.
pub fn ingest_batch(
    conn: &Connection,
    who: &Identity,
    term_id: &str,
    raw_entries: &[serde_json::Value],
) -> AppResult<UpsertSummary> {
    let entries = parse_entries(raw_entries)?;
    store::load_term(conn, term_id)?;
    authorize_entries(conn, who, &entries)?;
    let summary = upsert_marks(conn, who, term_id, &entries)?;
    tracing::info!(
        term_id,
        user = %who.username,
        inserted = summary.inserted,
        updated = summary.updated,
        "marks batch stored"
    );
    Ok(summary)
}

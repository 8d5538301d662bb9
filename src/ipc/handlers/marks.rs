use crate::auth::Identity;
use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{guarded, narrow_class, optional_str, required_array, required_str};
use crate::ipc::types::{AppState, Request};
use crate::marks::{self, MarkValue, STATUS_ABSENT};
use crate::query::Filter;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;

fn marks_list(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let class_name = narrow_class(who.read_scope(), optional_str(params, "className")?)?;
    let filter = Filter::new()
        .eq_opt("m.term_id", optional_str(params, "termId")?)
        .eq_opt("s.class_name", class_name)
        .eq_opt("m.subject_id", optional_str(params, "subjectId")?)
        .eq_opt("m.student_id", optional_str(params, "studentId")?);
    let sql = format!(
        "SELECT m.id, m.student_id, s.index_no, s.name, s.class_name,
                m.subject_id, sub.code, m.term_id, m.marks, m.status,
                m.teacher_id, m.updated_at
         FROM marks m
         JOIN students s ON s.id = m.student_id
         JOIN subjects sub ON sub.id = m.subject_id{}
         ORDER BY s.class_name, s.index_no, sub.code",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(filter.into_params()), |r| {
            let status: String = r.get(9)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "indexNo": r.get::<_, String>(2)?,
                "studentName": r.get::<_, String>(3)?,
                "className": r.get::<_, String>(4)?,
                "subjectId": r.get::<_, String>(5)?,
                "subjectCode": r.get::<_, String>(6)?,
                "termId": r.get::<_, String>(7)?,
                "marks": r.get::<_, Option<f64>>(8)?,
                "isAbsent": status == STATUS_ABSENT,
                "teacherId": r.get::<_, Option<String>>(10)?,
                "updatedAt": r.get::<_, String>(11)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "marks": rows }))
}

fn marks_bulk(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let term_id = required_str(params, "termId")?;
    let entries = required_array(params, "marks")?;
    let summary = marks::ingest_batch(conn, who, &term_id, entries)?;
    Ok(json!({
        "inserted": summary.inserted,
        "updated": summary.updated,
    }))
}

/// One entry through the batch path, so validation and scope rules match.
fn marks_create(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let term_id = required_str(params, "termId")?;
    let summary = marks::ingest_batch(conn, who, &term_id, std::slice::from_ref(params))?;
    let mark_id: String = conn.query_row(
        "SELECT id FROM marks WHERE student_id = ? AND subject_id = ? AND term_id = ?",
        (
            required_str(params, "studentId")?,
            required_str(params, "subjectId")?,
            &term_id,
        ),
        |r| r.get(0),
    )?;
    Ok(json!({ "markId": mark_id, "created": summary.inserted == 1 }))
}

/// Student class of an existing mark, for the write check.
fn mark_owner(conn: &Connection, mark_id: &str) -> AppResult<String> {
    conn.query_row(
        "SELECT s.class_name FROM marks m JOIN students s ON s.id = m.student_id WHERE m.id = ?",
        [mark_id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("mark"))
}

fn marks_update(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let mark_id = required_str(params, "markId")?;
    let raw = params
        .get("marks")
        .ok_or_else(|| AppError::validation("missing marks"))?;
    let value = MarkValue::parse(raw).map_err(AppError::Validation)?;
    who.check_write_class(&mark_owner(conn, &mark_id)?)?;

    let (marks, status) = value.storage();
    conn.execute(
        "UPDATE marks SET marks = ?, status = ?, teacher_id = ?, updated_at = ? WHERE id = ?",
        (marks, status, &who.user_id, now_rfc3339(), &mark_id),
    )?;
    Ok(json!({ "markId": mark_id, "marks": marks, "isAbsent": status == STATUS_ABSENT }))
}

fn marks_delete(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let mark_id = required_str(params, "markId")?;
    who.check_write_class(&mark_owner(conn, &mark_id)?)?;
    conn.execute("DELETE FROM marks WHERE id = ?", [&mark_id])?;
    tracing::info!(mark_id = %mark_id, by = %who.username, "mark deleted");
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.list" => Some(guarded(state, req, marks_list)),
        "marks.create" => Some(guarded(state, req, marks_create)),
        "marks.update" => Some(guarded(state, req, marks_update)),
        "marks.delete" => Some(guarded(state, req, marks_delete)),
        "marks.bulk" => Some(guarded(state, req, marks_bulk)),
        _ => None,
    }
}

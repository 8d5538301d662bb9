use crate::auth::Identity;
use crate::db::{new_id, now_rfc3339};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{guarded, optional_status, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::query::{Filter, UpdateBuilder};
use crate::report::COMMON_STREAM;
use crate::store;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;

pub(crate) fn subject_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "code": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "stream": r.get::<_, String>(3)?,
        "status": r.get::<_, String>(4)?,
    }))
}

fn subjects_list(
    conn: &Connection,
    _who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let filter = Filter::new()
        .eq_opt("stream", optional_str(params, "stream")?)
        .eq_opt("status", optional_status(params, "status")?)
        .search_opt(&["code", "name"], optional_str(params, "search")?.as_deref());
    let sql = format!(
        "SELECT id, code, name, stream, status FROM subjects{} ORDER BY code",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let subjects = stmt
        .query_map(params_from_iter(filter.into_params()), subject_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_catalogue_manager()?;
    let code = required_str(params, "code")?.to_ascii_uppercase();
    let name = required_str(params, "name")?;
    let stream = optional_str(params, "stream")?.unwrap_or_else(|| COMMON_STREAM.to_string());

    let id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, code, name, stream, status, created_at)
         VALUES(?, ?, ?, ?, 'active', ?)",
        (&id, &code, &name, &stream, now_rfc3339()),
    )?;
    tracing::info!(code = %code, stream = %stream, "subject created");
    Ok(json!({ "subjectId": id }))
}

fn subjects_update(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_catalogue_manager()?;
    let subject_id = required_str(params, "subjectId")?;
    if !store::subject_exists(conn, &subject_id)? {
        return Err(AppError::not_found("subject"));
    }
    let update = UpdateBuilder::new("subjects")
        .set_opt(
            "code",
            optional_str(params, "code")?.map(|c| c.to_ascii_uppercase()),
        )
        .set_opt("name", optional_str(params, "name")?)
        .set_opt("stream", optional_str(params, "stream")?)
        .set_opt("status", optional_status(params, "status")?);
    if update.is_empty() {
        return Err(AppError::validation("nothing to update"));
    }
    let (sql, values) = update.build(Filter::new().eq("id", subject_id.clone()));
    conn.execute(&sql, params_from_iter(values))?;
    Ok(json!({ "subjectId": subject_id }))
}

/// Soft delete: the subject stays referenced by existing marks.
fn subjects_delete(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_catalogue_manager()?;
    let subject_id = required_str(params, "subjectId")?;
    let changed = conn.execute(
        "UPDATE subjects SET status = ? WHERE id = ?",
        (store::STATUS_INACTIVE, &subject_id),
    )?;
    if changed == 0 {
        return Err(AppError::not_found("subject"));
    }
    Ok(json!({ "subjectId": subject_id, "status": store::STATUS_INACTIVE }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(guarded(state, req, subjects_list)),
        "subjects.create" => Some(guarded(state, req, subjects_create)),
        "subjects.update" => Some(guarded(state, req, subjects_update)),
        "subjects.delete" => Some(guarded(state, req, subjects_delete)),
        _ => None,
    }
}

use crate::auth::Identity;
use crate::db::{new_id, now_rfc3339};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{
    guarded, narrow_class, optional_i64, optional_status, optional_str, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::query::{Filter, UpdateBuilder};
use crate::store;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;

const STUDENT_COLUMNS: &str = "id, index_no, name, class_name, admission_year, status, created_at";

fn student_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "indexNo": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "className": r.get::<_, String>(3)?,
        "admissionYear": r.get::<_, Option<i64>>(4)?,
        "status": r.get::<_, String>(5)?,
        "createdAt": r.get::<_, String>(6)?,
    }))
}

fn students_list(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let class_name = narrow_class(who.scoped_class(), optional_str(params, "className")?)?;
    let filter = Filter::new()
        .eq_opt("class_name", class_name)
        .eq_opt("status", optional_status(params, "status")?)
        .search_opt(&["name", "index_no"], optional_str(params, "search")?.as_deref());
    let sql = format!(
        "SELECT {STUDENT_COLUMNS} FROM students{} ORDER BY class_name, index_no",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(params_from_iter(filter.into_params()), student_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_get(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let student_id = required_str(params, "studentId")?;
    let student = conn
        .query_row(
            &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?"),
            [&student_id],
            student_json,
        )
        .optional()?
        .ok_or_else(|| AppError::not_found("student"))?;
    let class_name = student["className"].as_str().unwrap_or_default();
    who.check_read_class(class_name)?;
    Ok(json!({ "student": student }))
}

fn students_create(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let index_no = required_str(params, "indexNo")?;
    let name = required_str(params, "name")?;
    let class_name = required_str(params, "className")?;
    let admission_year = optional_i64(params, "admissionYear")?;
    store::require_class(conn, &class_name)?;

    let id = new_id();
    conn.execute(
        "INSERT INTO students(id, index_no, name, class_name, admission_year, status, created_at)
         VALUES(?, ?, ?, ?, ?, 'active', ?)",
        (&id, &index_no, &name, &class_name, admission_year, now_rfc3339()),
    )?;
    tracing::info!(index_no = %index_no, class = %class_name, "student created");
    Ok(json!({ "studentId": id }))
}

fn students_update(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let student_id = required_str(params, "studentId")?;
    store::student_class(conn, &student_id)?;

    let class_name = optional_str(params, "className")?;
    if let Some(c) = &class_name {
        store::require_class(conn, c)?;
    }
    let update = UpdateBuilder::new("students")
        .set_opt("index_no", optional_str(params, "indexNo")?)
        .set_opt("name", optional_str(params, "name")?)
        .set_opt("class_name", class_name)
        .set_opt("admission_year", optional_i64(params, "admissionYear")?)
        .set_opt("status", optional_status(params, "status")?);
    if update.is_empty() {
        return Err(AppError::validation("nothing to update"));
    }
    let (sql, values) = update
        .set("updated_at", now_rfc3339())
        .build(Filter::new().eq("id", student_id.clone()));
    conn.execute(&sql, params_from_iter(values))?;
    Ok(json!({ "studentId": student_id }))
}

/// Students with recorded marks are deactivated so reports keep their history.
fn students_delete(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let student_id = required_str(params, "studentId")?;
    store::student_class(conn, &student_id)?;

    let has_marks: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM marks WHERE student_id = ?)",
        [&student_id],
        |r| r.get(0),
    )?;
    if has_marks != 0 {
        conn.execute(
            "UPDATE students SET status = ?, updated_at = ? WHERE id = ?",
            (store::STATUS_INACTIVE, now_rfc3339(), &student_id),
        )?;
        tracing::info!(student_id = %student_id, "student deactivated");
        return Ok(json!({ "deleted": false, "deactivated": true }));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM term_attendance WHERE student_id = ?", [&student_id])?;
    tx.execute("DELETE FROM promotion_history WHERE student_id = ?", [&student_id])?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])?;
    tx.commit()?;
    tracing::info!(student_id = %student_id, "student deleted");
    Ok(json!({ "deleted": true, "deactivated": false }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(guarded(state, req, students_list)),
        "students.get" => Some(guarded(state, req, students_get)),
        "students.create" => Some(guarded(state, req, students_create)),
        "students.update" => Some(guarded(state, req, students_update)),
        "students.delete" => Some(guarded(state, req, students_delete)),
        _ => None,
    }
}

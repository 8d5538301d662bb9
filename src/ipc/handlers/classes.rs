use crate::auth::Identity;
use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::ipc::handlers::subjects::subject_json;
use crate::ipc::helpers::{guarded, optional_i64, optional_str, required_str, string_list};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::json;

fn classes_list(
    conn: &Connection,
    _who: &Identity,
    _params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let mut stmt = conn.prepare(
        "SELECT c.name, c.grade, c.section,
                (SELECT COUNT(*) FROM students s
                 WHERE s.class_name = c.name AND s.status = 'active') AS student_count
         FROM classes c
         ORDER BY c.grade, c.name",
    )?;
    let classes = stmt
        .query_map([], |r| {
            Ok(json!({
                "name": r.get::<_, String>(0)?,
                "grade": r.get::<_, Option<i64>>(1)?,
                "section": r.get::<_, Option<String>>(2)?,
                "studentCount": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classes": classes }))
}

fn classes_create(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let name = required_str(params, "name")?;
    let grade = optional_i64(params, "grade")?;
    if let Some(g) = grade {
        if !(1..=13).contains(&g) {
            return Err(AppError::validation("grade must be between 1 and 13"));
        }
    }
    let section = optional_str(params, "section")?;
    if store::class_exists(conn, &name)? {
        return Err(AppError::Conflict(format!("class {name} already exists")));
    }
    conn.execute(
        "INSERT INTO classes(name, grade, section, created_at) VALUES(?, ?, ?, ?)",
        (&name, grade, &section, now_rfc3339()),
    )?;
    tracing::info!(class = %name, "class created");
    Ok(json!({ "className": name }))
}

fn class_subjects_list(
    conn: &Connection,
    _who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let class_name = required_str(params, "className")?;
    store::require_class(conn, &class_name)?;
    let mut stmt = conn.prepare(
        "SELECT sub.id, sub.code, sub.name, sub.stream, sub.status
         FROM class_subjects cs
         JOIN subjects sub ON sub.id = cs.subject_id
         WHERE cs.class_name = ?
         ORDER BY sub.code",
    )?;
    let subjects = stmt
        .query_map([&class_name], subject_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "className": class_name, "subjects": subjects }))
}

/// Replaces the class's subject list as a whole.
fn class_subjects_set(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_catalogue_manager()?;
    let class_name = required_str(params, "className")?;
    store::require_class(conn, &class_name)?;
    let mut subject_ids = string_list(params, "subjectIds")?;
    subject_ids.sort();
    subject_ids.dedup();
    for id in &subject_ids {
        if !store::subject_exists(conn, id)? {
            return Err(AppError::NotFound(format!("subject {id} not found")));
        }
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM class_subjects WHERE class_name = ?", [&class_name])?;
    {
        let mut insert =
            tx.prepare("INSERT INTO class_subjects(class_name, subject_id) VALUES(?, ?)")?;
        for id in &subject_ids {
            insert.execute((&class_name, id))?;
        }
    }
    tx.commit()?;
    tracing::info!(class = %class_name, subjects = subject_ids.len(), "class subjects replaced");
    Ok(json!({ "className": class_name, "subjectCount": subject_ids.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(guarded(state, req, classes_list)),
        "classes.create" => Some(guarded(state, req, classes_create)),
        "classes.subjects.list" => Some(guarded(state, req, class_subjects_list)),
        "classes.subjects.set" => Some(guarded(state, req, class_subjects_set)),
        _ => None,
    }
}

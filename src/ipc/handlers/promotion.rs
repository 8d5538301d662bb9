use crate::auth::Identity;
use crate::db::{new_id, now_rfc3339};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{guarded, narrow_class, optional_str, required_str, string_list};
use crate::ipc::types::{AppState, Request};
use crate::query::Filter;
use crate::store;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use std::collections::HashSet;

/// Moves students still in `fromClass`; the rest come back in `skipped`.
/// Class change and history row commit together.
fn classes_promote(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let mut seen = HashSet::new();
    let student_ids: Vec<String> = string_list(params, "studentIds")?
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect();
    let from_class = required_str(params, "fromClass")?;
    let to_class = required_str(params, "toClass")?;
    let academic_year = required_str(params, "academicYear")?;
    if student_ids.is_empty() {
        return Err(AppError::validation("studentIds is empty"));
    }
    if from_class == to_class {
        return Err(AppError::validation("fromClass and toClass must differ"));
    }
    store::require_class(conn, &from_class)?;
    store::require_class(conn, &to_class)?;

    let now = now_rfc3339();
    let mut promoted: Vec<String> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();
    let tx = conn.unchecked_transaction()?;
    for id in &student_ids {
        let moved = tx.execute(
            "UPDATE students SET class_name = ?, updated_at = ? WHERE id = ? AND class_name = ?",
            (&to_class, &now, id, &from_class),
        )?;
        if moved == 0 {
            skipped.push(id.clone());
            continue;
        }
        tx.execute(
            "INSERT INTO promotion_history(id, student_id, from_class, to_class, academic_year, promoted_by, promoted_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (new_id(), id, &from_class, &to_class, &academic_year, &who.user_id, &now),
        )?;
        promoted.push(id.clone());
    }
    tx.commit()?;
    tracing::info!(
        from = %from_class,
        to = %to_class,
        promoted = promoted.len(),
        skipped = skipped.len(),
        "students promoted"
    );
    Ok(json!({
        "promoted": promoted,
        "skipped": skipped,
    }))
}

fn promotions_history(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let class_name = narrow_class(who.read_scope(), None)?;
    let filter = Filter::new()
        .eq_opt("ph.student_id", optional_str(params, "studentId")?)
        .eq_opt("ph.academic_year", optional_str(params, "academicYear")?)
        .eq_opt("s.class_name", class_name);
    let sql = format!(
        "SELECT ph.id, ph.student_id, s.index_no, s.name, ph.from_class, ph.to_class,
                ph.academic_year, ph.promoted_by, ph.promoted_at
         FROM promotion_history ph
         JOIN students s ON s.id = ph.student_id{}
         ORDER BY ph.promoted_at DESC, s.index_no",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(filter.into_params()), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "indexNo": r.get::<_, String>(2)?,
                "name": r.get::<_, String>(3)?,
                "fromClass": r.get::<_, String>(4)?,
                "toClass": r.get::<_, String>(5)?,
                "academicYear": r.get::<_, String>(6)?,
                "promotedBy": r.get::<_, Option<String>>(7)?,
                "promotedAt": r.get::<_, String>(8)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "history": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.promote" => Some(guarded(state, req, classes_promote)),
        "promotions.history" => Some(guarded(state, req, promotions_history)),
        _ => None,
    }
}

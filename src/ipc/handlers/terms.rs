use crate::auth::Identity;
use crate::db::{new_id, now_rfc3339};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{
    guarded, optional_i64, optional_status, optional_str, required_array, required_i64,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::query::{Filter, UpdateBuilder};
use crate::store::{self, term_from_row, TERM_COLUMNS};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
struct NewTerm {
    term_number: i64,
    name: String,
    exam_month: i64,
    exam_year: i64,
    academic_year: String,
    active: bool,
}

fn check_term_number(n: i64) -> AppResult<i64> {
    if (1..=3).contains(&n) {
        Ok(n)
    } else {
        Err(AppError::validation("termNumber must be 1, 2 or 3"))
    }
}

fn check_exam_month(m: i64) -> AppResult<i64> {
    if (1..=12).contains(&m) {
        Ok(m)
    } else {
        Err(AppError::validation("examMonth must be between 1 and 12"))
    }
}

fn parse_new_term(params: &serde_json::Value) -> AppResult<NewTerm> {
    let term_number = check_term_number(required_i64(params, "termNumber")?)?;
    let name = optional_str(params, "name")?.unwrap_or_else(|| format!("Term {term_number}"));
    let exam_month = check_exam_month(required_i64(params, "examMonth")?)?;
    let exam_year = required_i64(params, "examYear")?;
    let academic_year = required_str(params, "academicYear")?;
    let active = optional_status(params, "status")?.as_deref() == Some(store::STATUS_ACTIVE);
    Ok(NewTerm {
        term_number,
        name,
        exam_month,
        exam_year,
        academic_year,
        active,
    })
}

/// Makes `term_id` the only active term in one statement.
pub(crate) fn activate_term(conn: &Connection, term_id: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE terms SET status = CASE WHEN id = ? THEN 'active' ELSE 'inactive' END",
        [term_id],
    )?;
    Ok(())
}

fn insert_term(conn: &Connection, term: &NewTerm) -> AppResult<String> {
    let id = new_id();
    conn.execute(
        "INSERT INTO terms(id, term_number, name, exam_month, exam_year, academic_year, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 'inactive', ?)",
        (
            &id,
            term.term_number,
            &term.name,
            term.exam_month,
            term.exam_year,
            &term.academic_year,
            now_rfc3339(),
        ),
    )?;
    if term.active {
        activate_term(conn, &id)?;
    }
    Ok(id)
}

fn terms_list(
    conn: &Connection,
    _who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let filter = Filter::new()
        .eq_opt("academic_year", optional_str(params, "academicYear")?)
        .eq_opt("status", optional_status(params, "status")?);
    let sql = format!(
        "SELECT {TERM_COLUMNS} FROM terms{} ORDER BY academic_year DESC, term_number",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let terms = stmt
        .query_map(params_from_iter(filter.into_params()), term_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "terms": terms }))
}

fn terms_current(
    conn: &Connection,
    _who: &Identity,
    _params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let term = conn
        .query_row(
            &format!("SELECT {TERM_COLUMNS} FROM terms WHERE status = 'active' LIMIT 1"),
            [],
            term_from_row,
        )
        .optional()?;
    Ok(json!({ "term": term }))
}

fn terms_create(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let term = parse_new_term(params)?;
    let tx = conn.unchecked_transaction()?;
    let id = insert_term(&tx, &term)?;
    tx.commit()?;
    tracing::info!(term_id = %id, academic_year = %term.academic_year, "term created");
    Ok(json!({ "termId": id }))
}

fn terms_bulk_create(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let raw = required_array(params, "terms")?;
    if raw.is_empty() {
        return Err(AppError::validation("terms is empty"));
    }
    let terms = raw
        .iter()
        .enumerate()
        .map(|(i, t)| {
            parse_new_term(t).map_err(|e| match e {
                AppError::Validation(msg) => AppError::Validation(format!("term {i}: {msg}")),
                other => other,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;
    if terms.iter().filter(|t| t.active).count() > 1 {
        return Err(AppError::validation("at most one term may be active"));
    }

    let tx = conn.unchecked_transaction()?;
    let ids = terms
        .iter()
        .map(|t| insert_term(&tx, t))
        .collect::<AppResult<Vec<_>>>()?;
    tx.commit()?;
    tracing::info!(count = ids.len(), "terms created");
    Ok(json!({ "termIds": ids }))
}

fn terms_update(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let term_id = required_str(params, "termId")?;
    store::load_term(conn, &term_id)?;

    let status = optional_status(params, "status")?;
    let update = UpdateBuilder::new("terms")
        .set_opt(
            "term_number",
            optional_i64(params, "termNumber")?
                .map(check_term_number)
                .transpose()?,
        )
        .set_opt("name", optional_str(params, "name")?)
        .set_opt(
            "exam_month",
            optional_i64(params, "examMonth")?
                .map(check_exam_month)
                .transpose()?,
        )
        .set_opt("exam_year", optional_i64(params, "examYear")?)
        .set_opt("academic_year", optional_str(params, "academicYear")?);
    if update.is_empty() && status.is_none() {
        return Err(AppError::validation("nothing to update"));
    }

    let tx = conn.unchecked_transaction()?;
    if !update.is_empty() {
        let (sql, values) = update.build(Filter::new().eq("id", term_id.clone()));
        tx.execute(&sql, params_from_iter(values))?;
    }
    match status.as_deref() {
        Some(store::STATUS_ACTIVE) => activate_term(&tx, &term_id)?,
        Some(_) => {
            tx.execute(
                "UPDATE terms SET status = 'inactive' WHERE id = ?",
                [&term_id],
            )?;
        }
        None => {}
    }
    tx.commit()?;
    Ok(json!({ "term": store::load_term(conn, &term_id)? }))
}

fn terms_delete(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let term_id = required_str(params, "termId")?;
    store::load_term(conn, &term_id)?;
    let marks: i64 = conn.query_row(
        "SELECT COUNT(*) FROM marks WHERE term_id = ?",
        [&term_id],
        |r| r.get(0),
    )?;
    if marks > 0 {
        return Err(AppError::Conflict(format!(
            "term has {marks} recorded marks"
        )));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM term_attendance WHERE term_id = ?", [&term_id])?;
    tx.execute("DELETE FROM saved_reports WHERE term_id = ?", [&term_id])?;
    tx.execute("DELETE FROM terms WHERE id = ?", [&term_id])?;
    tx.commit()?;
    tracing::info!(term_id = %term_id, "term deleted");
    Ok(json!({ "deleted": true }))
}

fn terms_set_current(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let term_id = required_str(params, "termId")?;
    store::load_term(conn, &term_id)?;
    let tx = conn.unchecked_transaction()?;
    activate_term(&tx, &term_id)?;
    tx.commit()?;
    tracing::info!(term_id = %term_id, by = %who.username, "current term changed");
    Ok(json!({ "term": store::load_term(conn, &term_id)? }))
}

/// Copies a term into another academic year; the copy starts inactive.
/// Moves `exam_year` by the distance between two academic years. Years that
/// are not plain integers leave it unchanged.
fn shifted_exam_year(exam_year: i64, from: &str, to: &str) -> AppResult<i64> {
    let (Ok(from), Ok(to)) = (from.parse::<i64>(), to.parse::<i64>()) else {
        return Ok(exam_year);
    };
    to.checked_sub(from)
        .and_then(|shift| exam_year.checked_add(shift))
        .ok_or_else(|| AppError::validation("academicYear is out of range"))
}

fn terms_clone(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let source = store::load_term(conn, &required_str(params, "termId")?)?;
    let academic_year = required_str(params, "academicYear")?;
    let exam_year = match optional_i64(params, "examYear")? {
        Some(year) => year,
        None => shifted_exam_year(source.exam_year, &source.academic_year, &academic_year)?,
    };
    let copy = NewTerm {
        term_number: source.term_number,
        name: source.name,
        exam_month: source.exam_month,
        exam_year,
        academic_year,
        active: false,
    };
    let id = insert_term(conn, &copy)?;
    tracing::info!(from = %source.id, term_id = %id, "term cloned");
    Ok(json!({ "termId": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.list" => Some(guarded(state, req, terms_list)),
        "terms.current" => Some(guarded(state, req, terms_current)),
        "terms.create" => Some(guarded(state, req, terms_create)),
        "terms.bulkCreate" => Some(guarded(state, req, terms_bulk_create)),
        "terms.update" => Some(guarded(state, req, terms_update)),
        "terms.delete" => Some(guarded(state, req, terms_delete)),
        "terms.setCurrent" => Some(guarded(state, req, terms_set_current)),
        "terms.clone" => Some(guarded(state, req, terms_clone)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let conn = crate::db::open_in_memory();
        conn.execute_batch(
            "INSERT INTO terms(id, term_number, name, exam_month, exam_year, academic_year, status, created_at) VALUES
               ('t1', 1, 'Term 1', 4, 2026, '2026', 'active', 'now'),
               ('t2', 2, 'Term 2', 8, 2026, '2026', 'inactive', 'now'),
               ('t3', 3, 'Term 3', 12, 2026, '2026', 'inactive', 'now');",
        )
        .expect("seed");
        conn
    }

    fn active_ids(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT id FROM terms WHERE status = 'active' ORDER BY id")
            .expect("prepare");
        stmt.query_map([], |r| r.get(0))
            .expect("query")
            .collect::<Result<Vec<String>, _>>()
            .expect("rows")
    }

    #[test]
    fn activation_leaves_exactly_one_active() {
        let conn = seeded();
        activate_term(&conn, "t3").expect("activate");
        assert_eq!(active_ids(&conn), vec!["t3".to_string()]);
        activate_term(&conn, "t3").expect("again");
        assert_eq!(active_ids(&conn), vec!["t3".to_string()]);
    }

    #[test]
    fn new_term_fields_are_validated() {
        let ok = parse_new_term(&json!({
            "termNumber": 2, "examMonth": 8, "examYear": 2027, "academicYear": "2027"
        }))
        .expect("valid");
        assert_eq!(ok.name, "Term 2");
        assert!(!ok.active);

        for bad in [
            json!({ "termNumber": 4, "examMonth": 8, "examYear": 2027, "academicYear": "2027" }),
            json!({ "termNumber": 1, "examMonth": 13, "examYear": 2027, "academicYear": "2027" }),
            json!({ "termNumber": 1, "examMonth": 3, "examYear": 2027 }),
        ] {
            assert!(parse_new_term(&bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn active_insert_switches_current_term() {
        let conn = seeded();
        let term = parse_new_term(&json!({
            "termNumber": 1, "examMonth": 4, "examYear": 2027,
            "academicYear": "2027", "status": "active"
        }))
        .expect("valid");
        let id = insert_term(&conn, &term).expect("insert");
        assert_eq!(active_ids(&conn), vec![id]);
    }

    #[test]
    fn clone_shift_follows_the_academic_year() {
        assert_eq!(shifted_exam_year(2026, "2026", "2027").unwrap(), 2027);
        assert_eq!(shifted_exam_year(2026, "2026/27", "2027/28").unwrap(), 2026);
        let e = shifted_exam_year(2026, "2026", "-9223372036854775808").unwrap_err();
        assert_eq!(e.status(), 400);
        assert!(shifted_exam_year(2026, "0", "9223372036854775807").is_err());
    }
}

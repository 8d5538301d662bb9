use crate::attendance::{attendance_percentage, attendance_stats};
use crate::auth::Identity;
use crate::db::{new_id, now_rfc3339};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{
    guarded, narrow_class, optional_str, required_array, required_i64,
    required_str, validate_date,
};
use crate::ipc::types::{AppState, Request};
use crate::query::Filter;
use crate::store;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;

/// Upper bound on a class headcount (boys or girls) in one register.
const MAX_HEADCOUNT: i64 = 10_000;
/// Upper bound on school days counted in one term.
const MAX_TERM_DAYS: i64 = 366;

fn bounded(params: &serde_json::Value, key: &str, max: i64) -> AppResult<i64> {
    let n = required_i64(params, key)?;
    if n < 0 {
        return Err(AppError::validation(format!("{key} must not be negative")));
    }
    if n > max {
        return Err(AppError::validation(format!("{key} must be at most {max}")));
    }
    Ok(n)
}

fn attendance_record(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let date = validate_date(&required_str(params, "date")?, "date")?;
    let class_name = required_str(params, "className")?;
    let boys = bounded(params, "boys", MAX_HEADCOUNT)?;
    let girls = bounded(params, "girls", MAX_HEADCOUNT)?;
    store::require_class(conn, &class_name)?;
    who.check_write_class(&class_name)?;

    conn.execute(
        "INSERT INTO attendance(id, date, class_name, teacher_id, boys, girls, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(date, class_name, teacher_id) DO UPDATE SET
           boys = excluded.boys,
           girls = excluded.girls,
           updated_at = excluded.updated_at",
        (new_id(), &date, &class_name, &who.user_id, boys, girls, now_rfc3339()),
    )?;
    Ok(json!({
        "date": date,
        "className": class_name,
        "boys": boys,
        "girls": girls,
        "total": boys + girls,
    }))
}

fn attendance_list(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let from = optional_str(params, "from")?
        .map(|d| validate_date(&d, "from"))
        .transpose()?;
    let to = optional_str(params, "to")?
        .map(|d| validate_date(&d, "to"))
        .transpose()?;
    let class_name = narrow_class(who.read_scope(), optional_str(params, "className")?)?;
    let filter = Filter::new()
        .gte_opt("date", from)
        .lte_opt("date", to)
        .eq_opt("class_name", class_name);
    let sql = format!(
        "SELECT date, class_name, teacher_id, boys, girls, updated_at
         FROM attendance{}
         ORDER BY date DESC, class_name",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(filter.into_params()), |r| {
            let boys: i64 = r.get(3)?;
            let girls: i64 = r.get(4)?;
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "className": r.get::<_, String>(1)?,
                "teacherId": r.get::<_, String>(2)?,
                "boys": boys,
                "girls": girls,
                "total": boys.saturating_add(girls),
                "updatedAt": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "attendance": rows }))
}

#[derive(Debug, Clone, PartialEq)]
struct TermAttendanceEntry {
    student_id: String,
    total_days: i64,
    attended_days: i64,
}

fn parse_term_entries(raw: &[serde_json::Value]) -> AppResult<Vec<TermAttendanceEntry>> {
    if raw.is_empty() {
        return Err(AppError::validation("entries is empty"));
    }
    raw.iter()
        .enumerate()
        .map(|(i, e)| {
            let wrap = |err: AppError| match err {
                AppError::Validation(msg) => AppError::Validation(format!("entry {i}: {msg}")),
                other => other,
            };
            let student_id = required_str(e, "studentId").map_err(wrap)?;
            let total_days = bounded(e, "totalDays", MAX_TERM_DAYS).map_err(wrap)?;
            let attended_days = bounded(e, "attendedDays", MAX_TERM_DAYS).map_err(wrap)?;
            if attended_days > total_days {
                return Err(AppError::validation(format!(
                    "entry {i}: attendedDays exceeds totalDays"
                )));
            }
            Ok(TermAttendanceEntry {
                student_id,
                total_days,
                attended_days,
            })
        })
        .collect()
}

fn term_attendance_upsert(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let term_id = required_str(params, "termId")?;
    let academic_year = required_str(params, "academicYear")?;
    let entries = parse_term_entries(required_array(params, "entries")?)?;
    store::load_term(conn, &term_id)?;
    for e in &entries {
        who.check_write_class(&store::student_class(conn, &e.student_id)?)?;
    }

    let now = now_rfc3339();
    let tx = conn.unchecked_transaction()?;
    for e in &entries {
        tx.execute(
            "INSERT INTO term_attendance(id, student_id, term_id, academic_year, total_days, attended_days, absent_days, percentage, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, term_id, academic_year) DO UPDATE SET
               total_days = excluded.total_days,
               attended_days = excluded.attended_days,
               absent_days = excluded.absent_days,
               percentage = excluded.percentage,
               updated_at = excluded.updated_at",
            (
                new_id(),
                &e.student_id,
                &term_id,
                &academic_year,
                e.total_days,
                e.attended_days,
                e.total_days - e.attended_days,
                attendance_percentage(e.total_days, e.attended_days),
                &now,
            ),
        )?;
    }
    tx.commit()?;
    tracing::info!(term_id = %term_id, count = entries.len(), "term attendance stored");
    Ok(json!({ "saved": entries.len() }))
}

fn term_attendance_filter(who: &Identity, params: &serde_json::Value) -> AppResult<Filter> {
    let class_name = narrow_class(who.read_scope(), optional_str(params, "className")?)?;
    Ok(Filter::new()
        .eq_opt("s.class_name", class_name)
        .eq_opt("ta.term_id", optional_str(params, "termId")?)
        .eq_opt("ta.academic_year", optional_str(params, "academicYear")?))
}

fn term_attendance_list(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let filter = term_attendance_filter(who, params)?;
    let sql = format!(
        "SELECT ta.student_id, s.index_no, s.name, s.class_name, ta.term_id, ta.academic_year,
                ta.total_days, ta.attended_days, ta.absent_days, ta.percentage, ta.updated_at
         FROM term_attendance ta
         JOIN students s ON s.id = ta.student_id{}
         ORDER BY s.class_name, s.index_no",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(filter.into_params()), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "indexNo": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "className": r.get::<_, String>(3)?,
                "termId": r.get::<_, String>(4)?,
                "academicYear": r.get::<_, String>(5)?,
                "totalDays": r.get::<_, i64>(6)?,
                "attendedDays": r.get::<_, i64>(7)?,
                "absentDays": r.get::<_, i64>(8)?,
                "percentage": r.get::<_, f64>(9)?,
                "updatedAt": r.get::<_, String>(10)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "attendance": rows }))
}

fn term_attendance_stats(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let class_name = required_str(params, "className")?;
    let term_id = required_str(params, "termId")?;
    let academic_year = required_str(params, "academicYear")?;
    who.check_read_class(&class_name)?;
    let mut stmt = conn.prepare(
        "SELECT ta.percentage
         FROM term_attendance ta
         JOIN students s ON s.id = ta.student_id
         WHERE s.class_name = ? AND ta.term_id = ? AND ta.academic_year = ?",
    )?;
    let percentages = stmt
        .query_map((&class_name, &term_id, &academic_year), |r| r.get::<_, f64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let stats = attendance_stats(percentages);
    Ok(json!({
        "className": class_name,
        "termId": term_id,
        "academicYear": academic_year,
        "stats": stats,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(guarded(state, req, attendance_record)),
        "attendance.list" => Some(guarded(state, req, attendance_list)),
        "termAttendance.upsert" => Some(guarded(state, req, term_attendance_upsert)),
        "termAttendance.list" => Some(guarded(state, req, term_attendance_list)),
        "termAttendance.stats" => Some(guarded(state, req, term_attendance_stats)),
        _ => None,
    }
}

use crate::auth::Identity;
use crate::db::{new_id, now_rfc3339};
use crate::error::{AppError, AppResult};
use crate::ipc::handlers::reports::report_options;
use crate::ipc::helpers::{guarded, narrow_class, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::query::Filter;
use crate::report::{self, ReportContext};
use crate::store;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;

struct SavedReportMeta {
    id: String,
    term_id: String,
    class_name: Option<String>,
    academic_year: String,
    ranking_method: String,
    created_by: String,
    generated_at: String,
}

impl SavedReportMeta {
    fn from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            term_id: r.get(1)?,
            class_name: r.get(2)?,
            academic_year: r.get(3)?,
            ranking_method: r.get(4)?,
            created_by: r.get(5)?,
            generated_at: r.get(6)?,
        })
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "termId": self.term_id,
            "className": self.class_name,
            "academicYear": self.academic_year,
            "rankingMethod": self.ranking_method,
            "createdBy": self.created_by,
            "generatedAt": self.generated_at,
        })
    }
}

const META_COLUMNS: &str =
    "id, term_id, class_name, academic_year, ranking_method, created_by, generated_at";

/// Whole-school snapshots are visible to callers without a class scope only.
fn check_snapshot_access(who: &Identity, class_name: Option<&str>) -> AppResult<()> {
    match (who.read_scope(), class_name) {
        (None, _) => Ok(()),
        (Some(_), Some(c)) => who.check_read_class(c),
        (Some(_), None) => Err(AppError::forbidden(
            "not permitted to view whole-school reports",
        )),
    }
}

fn saved_reports_create(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let term_id = required_str(params, "termId")?;
    let term = store::load_term(conn, &term_id)?;
    let academic_year = match optional_str(params, "academicYear")? {
        None => term.academic_year,
        Some(year) if year == term.academic_year => year,
        Some(year) => {
            return Err(AppError::validation(format!(
                "academicYear {year} does not match term academic year {}",
                term.academic_year
            )))
        }
    };
    let class_name = narrow_class(who.read_scope(), optional_str(params, "className")?)?;
    let opts = report_options(params)?;
    let ctx = ReportContext {
        conn,
        term_id: &term_id,
        class_name: class_name.as_deref(),
    };
    let report = report::compute_term_report(&ctx, opts)?;
    let payload = serde_json::to_string(&report)?;

    let id = new_id();
    let generated_at = now_rfc3339();
    conn.execute(
        "INSERT INTO saved_reports(id, term_id, class_name, academic_year, ranking_method, payload, created_by, generated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &term_id,
            &class_name,
            &academic_year,
            opts.rank_by.as_str(),
            &payload,
            &who.user_id,
            &generated_at,
        ),
    )?;
    tracing::info!(report_id = %id, term_id = %term_id, by = %who.username, "report saved");
    Ok(json!({ "reportId": id, "generatedAt": generated_at }))
}

fn saved_reports_list(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let class_name = narrow_class(who.read_scope(), optional_str(params, "className")?)?;
    let filter = Filter::new()
        .eq_opt("term_id", optional_str(params, "termId")?)
        .eq_opt("class_name", class_name)
        .eq_opt("academic_year", optional_str(params, "academicYear")?);
    let sql = format!(
        "SELECT {META_COLUMNS} FROM saved_reports{} ORDER BY generated_at DESC",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let reports = stmt
        .query_map(params_from_iter(filter.into_params()), SavedReportMeta::from_row)?
        .map(|r| r.map(|m| m.to_json()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "reports": reports }))
}

fn load_meta(conn: &Connection, report_id: &str) -> AppResult<SavedReportMeta> {
    conn.query_row(
        &format!("SELECT {META_COLUMNS} FROM saved_reports WHERE id = ?"),
        [report_id],
        SavedReportMeta::from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("saved report"))
}

fn saved_reports_get(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let report_id = required_str(params, "reportId")?;
    let meta = load_meta(conn, &report_id)?;
    check_snapshot_access(who, meta.class_name.as_deref())?;
    let payload: String = conn.query_row(
        "SELECT payload FROM saved_reports WHERE id = ?",
        [&report_id],
        |r| r.get(0),
    )?;
    let report: serde_json::Value = serde_json::from_str(&payload)?;
    Ok(json!({ "meta": meta.to_json(), "report": report }))
}

fn saved_reports_delete(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let report_id = required_str(params, "reportId")?;
    let meta = load_meta(conn, &report_id)?;
    if !who.is_admin() && meta.created_by != who.user_id {
        return Err(AppError::forbidden(
            "only the creator or an admin may delete a saved report",
        ));
    }
    conn.execute("DELETE FROM saved_reports WHERE id = ?", [&report_id])?;
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "savedReports.list" => Some(guarded(state, req, saved_reports_list)),
        "savedReports.get" => Some(guarded(state, req, saved_reports_get)),
        "savedReports.create" => Some(guarded(state, req, saved_reports_create)),
        "savedReports.delete" => Some(guarded(state, req, saved_reports_delete)),
        _ => None,
    }
}

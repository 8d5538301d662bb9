use crate::auth::Identity;
use crate::error::AppResult;
use crate::ipc::helpers::{guarded, narrow_class, optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, RankingMethod, ReportContext, ReportOptions};
use crate::store;
use rusqlite::Connection;
use serde_json::json;

/// `includeCommon` and `rankBy` with their defaults.
pub(crate) fn report_options(params: &serde_json::Value) -> AppResult<ReportOptions> {
    Ok(ReportOptions {
        include_common: optional_bool(params, "includeCommon")?.unwrap_or(true),
        rank_by: RankingMethod::parse(optional_str(params, "rankBy")?.as_deref())?,
    })
}

fn reports_term_report(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let term_id = required_str(params, "termId")?;
    let class_name = narrow_class(who.read_scope(), optional_str(params, "className")?)?;
    let opts = report_options(params)?;
    let ctx = ReportContext {
        conn,
        term_id: &term_id,
        class_name: class_name.as_deref(),
    };
    let report = report::compute_term_report(&ctx, opts)?;
    Ok(serde_json::to_value(report)?)
}

fn reports_subject_analysis(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let term_id = required_str(params, "termId")?;
    let class_name = narrow_class(who.read_scope(), optional_str(params, "className")?)?;
    let subject_id = optional_str(params, "subjectId")?;
    let term = store::load_term(conn, &term_id)?;
    let ctx = ReportContext {
        conn,
        term_id: &term_id,
        class_name: class_name.as_deref(),
    };
    let rows = report::load_mark_rows(&ctx, subject_id.as_deref())?;
    let subjects = report::compute_subject_stats(&rows);
    Ok(json!({
        "term": term,
        "className": class_name,
        "subjects": subjects,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.termReport" => Some(guarded(state, req, reports_term_report)),
        "reports.subjectAnalysis" => Some(guarded(state, req, reports_subject_analysis)),
        _ => None,
    }
}

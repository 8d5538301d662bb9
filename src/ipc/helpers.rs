use crate::auth::Identity;
use crate::error::{AppError, AppResult};
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::session::{bearer_token, SessionTokens};
use rusqlite::Connection;

pub type Handler = fn(&Connection, &Identity, &serde_json::Value) -> AppResult<serde_json::Value>;
pub type PublicHandler = fn(&AppState, &Connection, &serde_json::Value) -> AppResult<serde_json::Value>;

pub fn db_conn(state: &AppState) -> AppResult<&Connection> {
    state
        .db
        .as_ref()
        .ok_or_else(|| AppError::validation("select a workspace first"))
}

pub fn authenticate(state: &AppState, req: &Request) -> AppResult<Identity> {
    let token = bearer_token(req.token.as_deref())?;
    state.sessions.verify(token)
}

pub fn respond(req: &Request, result: AppResult<serde_json::Value>) -> serde_json::Value {
    match result {
        Ok(payload) => ok(&req.id, payload),
        Err(e) => e.response(&req.id),
    }
}

/// Token check, then the handler against the open workspace.
pub fn guarded(state: &AppState, req: &Request, handler: Handler) -> serde_json::Value {
    let result = authenticate(state, req).and_then(|who| {
        let conn = db_conn(state)?;
        handler(conn, &who, &req.params)
    });
    respond(req, result)
}

/// No token required; still needs an open workspace.
pub fn public(state: &AppState, req: &Request, handler: PublicHandler) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| handler(state, conn, &req.params));
    respond(req, result)
}

/// Narrows a requested class filter to the class a caller is confined to.
pub fn narrow_class(allowed: Option<&str>, requested: Option<String>) -> AppResult<Option<String>> {
    match (allowed, requested) {
        (None, requested) => Ok(requested),
        (Some(own), None) => Ok(Some(own.to_string())),
        (Some(own), Some(requested)) if own == requested => Ok(Some(requested)),
        (Some(_), Some(requested)) => Err(AppError::forbidden(format!(
            "not permitted to view class {requested}"
        ))),
    }
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> AppResult<Option<String>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(AppError::validation(format!("{key} must be a string"))),
    }
}

pub fn required_str(params: &serde_json::Value, key: &str) -> AppResult<String> {
    optional_str(params, key)?.ok_or_else(|| AppError::validation(format!("missing {key}")))
}

/// Integers may arrive as JSON numbers or digit strings.
pub fn optional_i64(params: &serde_json::Value, key: &str) -> AppResult<Option<i64>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let n = v
                .as_i64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()));
            n.map(Some)
                .ok_or_else(|| AppError::validation(format!("{key} must be an integer")))
        }
    }
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> AppResult<i64> {
    optional_i64(params, key)?.ok_or_else(|| AppError::validation(format!("missing {key}")))
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> AppResult<Option<bool>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(AppError::validation(format!("{key} must be a boolean"))),
    }
}

pub fn required_array<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> AppResult<&'a Vec<serde_json::Value>> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| AppError::validation(format!("missing {key}[]")))
}

pub fn string_list(params: &serde_json::Value, key: &str) -> AppResult<Vec<String>> {
    required_array(params, key)?
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AppError::validation(format!("{key} must contain strings")))
        })
        .collect()
}

/// `"active"` / `"inactive"`, or `None` when absent.
pub fn optional_status(params: &serde_json::Value, key: &str) -> AppResult<Option<String>> {
    match optional_str(params, key)?.map(|s| s.to_ascii_lowercase()) {
        None => Ok(None),
        Some(s) if s == "active" || s == "inactive" => Ok(Some(s)),
        Some(other) => Err(AppError::validation(format!(
            "{key} must be active or inactive (got '{other}')"
        ))),
    }
}

pub fn validate_date(raw: &str, key: &str) -> AppResult<String> {
    chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| AppError::validation(format!("{key} must be a YYYY-MM-DD date")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_accept_digit_strings() {
        let p = json!({ "a": 3, "b": "2026", "c": "x", "d": null });
        assert_eq!(optional_i64(&p, "a").expect("a"), Some(3));
        assert_eq!(optional_i64(&p, "b").expect("b"), Some(2026));
        assert!(optional_i64(&p, "c").is_err());
        assert_eq!(optional_i64(&p, "d").expect("d"), None);
        assert!(required_i64(&p, "zzz").is_err());
    }

    #[test]
    fn blank_strings_are_missing() {
        let p = json!({ "name": "   ", "n": 4 });
        assert_eq!(optional_str(&p, "name").expect("name"), None);
        assert!(required_str(&p, "name").is_err());
        assert!(optional_str(&p, "n").is_err());
    }

    #[test]
    fn class_filter_is_confined() {
        assert_eq!(narrow_class(None, None).expect("all"), None);
        assert_eq!(
            narrow_class(Some("10A"), None).expect("own"),
            Some("10A".to_string())
        );
        assert!(narrow_class(Some("10A"), Some("10A".to_string())).is_ok());
        assert_eq!(
            narrow_class(Some("10A"), Some("10B".to_string()))
                .unwrap_err()
                .status(),
            403
        );
    }

    #[test]
    fn dates_are_normalised() {
        assert_eq!(validate_date("2026-03-09", "date").expect("date"), "2026-03-09");
        assert!(validate_date("2026-02-30", "date").is_err());
        assert!(validate_date("09/03/2026", "date").is_err());
    }
}

use rusqlite::ErrorCode;
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy shared by every handler. `status()` is the HTTP-equivalent
/// code the client sees next to the machine-readable `code()`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Authorization(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Store or unexpected failure. The cause is logged, never returned.
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Authorization(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Authentication(_) => "authentication",
            AppError::Authorization(_) => "authorization",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Authentication(_) => 401,
            AppError::Authorization(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::Internal(_) => 500,
        }
    }

    /// Failure envelope for the request `id`. Internal detail goes to the log only.
    pub fn response(self, id: &str) -> serde_json::Value {
        match &self {
            AppError::Internal(cause) => {
                tracing::error!(request_id = id, error = ?cause, "request failed");
            }
            AppError::Authorization(reason) => {
                tracing::warn!(request_id = id, reason = %reason, "request refused");
            }
            _ => {}
        }
        json!({
            "id": id,
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
            "status": self.status(),
        })
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, msg) = &e {
            if failure.code == ErrorCode::ConstraintViolation
                && msg.as_deref().map(|m| m.contains("UNIQUE")).unwrap_or(false)
            {
                return AppError::Conflict("record already exists".to_string());
            }
        }
        AppError::Internal(e.into())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(e.into())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_are_redacted() {
        let e = AppError::Internal(anyhow::anyhow!("no such table: marks"));
        let v = e.response("7");
        assert_eq!(v["success"], json!(false));
        assert_eq!(v["status"], json!(500));
        assert_eq!(v["error"], json!("internal error"));
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        conn.execute("CREATE TABLE t(k TEXT UNIQUE)", []).expect("create");
        conn.execute("INSERT INTO t(k) VALUES('a')", []).expect("insert");
        let e: AppError = conn
            .execute("INSERT INTO t(k) VALUES('a')", [])
            .unwrap_err()
            .into();
        assert_eq!(e.status(), 409);
    }
}

use crate::config::Config;
use crate::session::JwtSessions;
use rusqlite::Connection;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    /// Session token, bare or as an `Authorization` header value.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub sessions: JwtSessions,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

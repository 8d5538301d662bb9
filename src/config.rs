use anyhow::Context;
use std::path::PathBuf;

pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub token_secret: Option<String>,
    pub token_ttl_hours: i64,
    pub admin_username: String,
    pub admin_password: String,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            token_secret: None,
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            admin_username: "admin".to_string(),
            admin_password: "admin".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        cfg.workspace = non_empty("SCHOOLD_WORKSPACE").map(PathBuf::from);
        cfg.token_secret = non_empty("SCHOOLD_TOKEN_SECRET");
        if let Some(raw) = non_empty("SCHOOLD_TOKEN_TTL_HOURS") {
            let hours: i64 = raw
                .trim()
                .parse()
                .with_context(|| format!("SCHOOLD_TOKEN_TTL_HOURS is not an integer: {raw}"))?;
            if hours <= 0 {
                anyhow::bail!("SCHOOLD_TOKEN_TTL_HOURS must be positive");
            }
            cfg.token_ttl_hours = hours;
        }
        if let Some(v) = non_empty("SCHOOLD_ADMIN_USERNAME") {
            cfg.admin_username = v.trim().to_string();
        }
        if let Some(v) = non_empty("SCHOOLD_ADMIN_PASSWORD") {
            cfg.admin_password = v;
        }
        if let Some(v) = non_empty("SCHOOLD_LOG") {
            cfg.log_filter = v;
        }
        Ok(cfg)
    }
}

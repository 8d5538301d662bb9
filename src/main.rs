mod attendance;
mod auth;
mod config;
mod db;
mod error;
mod ipc;
mod marks;
mod password;
mod query;
mod report;
mod session;
mod store;

use std::io::{self, BufRead, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logs go to stderr; stdout carries the protocol.
fn init_tracing(filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn build_state(cfg: config::Config) -> ipc::AppState {
    let secret = match cfg.token_secret.clone() {
        Some(s) => s,
        None => {
            tracing::warn!("SCHOOLD_TOKEN_SECRET not set; sessions will not survive a restart");
            format!("{}{}", db::new_id(), db::new_id())
        }
    };
    let sessions = session::JwtSessions::new(secret.as_bytes(), cfg.token_ttl_hours);

    let mut state = ipc::AppState {
        config: cfg,
        sessions,
        workspace: None,
        db: None,
    };
    if let Some(path) = state.config.workspace.clone() {
        match db::open_db(&path, &state.config) {
            Ok(conn) => {
                tracing::info!(workspace = %path.display(), "workspace opened");
                state.workspace = Some(path);
                state.db = Some(conn);
            }
            Err(e) => tracing::error!(workspace = %path.display(), error = ?e, "failed to open workspace"),
        }
    }
    state
}

fn main() {
    let cfg = match config::Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("schoold: invalid configuration: {e:#}");
            std::process::exit(2);
        }
    };
    init_tracing(&cfg.log_filter);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "schoold starting");

    let mut state = build_state(cfg);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                tracing::warn!(error = %e, "bad request line");
                ipc::err(None, "bad_json", e.to_string(), 400)
            }
        };
        let _ = writeln!(stdout, "{resp}");
        let _ = stdout.flush();
    }
}

use crate::auth::{Identity, Role};
use crate::db::now_rfc3339;
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{guarded, public, required_str};
use crate::ipc::types::{AppState, Request};
use crate::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::session::SessionTokens;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct StoredUser {
    id: String,
    full_name: String,
    role: String,
    assigned_class: Option<String>,
    password_hash: String,
    temp_password: bool,
    active: bool,
}

fn find_user(conn: &Connection, username: &str) -> AppResult<Option<StoredUser>> {
    Ok(conn
        .query_row(
            "SELECT id, full_name, role, assigned_class, password_hash, temp_password, status
             FROM users WHERE username = ?",
            [username],
            |r| {
                Ok(StoredUser {
                    id: r.get(0)?,
                    full_name: r.get(1)?,
                    role: r.get(2)?,
                    assigned_class: r.get(3)?,
                    password_hash: r.get(4)?,
                    temp_password: r.get::<_, i64>(5)? != 0,
                    active: r.get::<_, String>(6)? == "active",
                })
            },
        )
        .optional()?)
}

fn bad_credentials() -> AppError {
    AppError::Authentication("invalid username or password".to_string())
}

/// Looks up an active user and checks the password; one message for every miss.
fn check_credentials(conn: &Connection, username: &str, password: &str) -> AppResult<StoredUser> {
    let user = find_user(conn, username)?.ok_or_else(bad_credentials)?;
    if !user.active || !verify_password(password, &user.password_hash) {
        tracing::warn!(username, "login rejected");
        return Err(bad_credentials());
    }
    Ok(user)
}

fn auth_login(
    state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let username = required_str(params, "username")?;
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::validation("missing password"))?;
    let user = check_credentials(conn, &username, password)?;
    let identity = Identity {
        user_id: user.id.clone(),
        username: username.clone(),
        role: Role::parse(&user.role)?,
        assigned_class: user.assigned_class.clone(),
    };
    let token = state.sessions.issue(&identity)?;
    tracing::info!(username = %username, role = identity.role.as_str(), "login");
    Ok(json!({
        "token": token,
        "user": {
            "id": user.id,
            "username": username,
            "fullName": user.full_name,
            "role": identity.role,
            "assignedClass": user.assigned_class,
        },
        "requireChange": user.temp_password,
    }))
}

fn auth_change_password(
    _state: &AppState,
    conn: &Connection,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    let username = required_str(params, "username")?;
    let old_password = params
        .get("oldPassword")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::validation("missing oldPassword"))?;
    let new_password = params
        .get("newPassword")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::validation("missing newPassword"))?;
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "new password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if new_password == old_password {
        return Err(AppError::validation(
            "new password must differ from the old one",
        ));
    }
    let user = check_credentials(conn, &username, old_password)?;
    conn.execute(
        "UPDATE users SET password_hash = ?, temp_password = 0, updated_at = ? WHERE id = ?",
        (hash_password(new_password)?, now_rfc3339(), &user.id),
    )?;
    tracing::info!(username = %username, "password changed");
    Ok(json!({ "message": "password updated" }))
}

fn auth_me(
    _conn: &Connection,
    who: &Identity,
    _params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    Ok(json!({ "user": who }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(public(state, req, auth_login)),
        "auth.changePassword" => Some(public(state, req, auth_change_password)),
        "auth.me" => Some(guarded(state, req, auth_me)),
        _ => None,
    }
}

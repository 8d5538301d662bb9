use crate::auth::{Identity, Role};
use crate::db::{new_id, now_rfc3339};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{guarded, optional_status, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::password::{hash_password, MIN_PASSWORD_LEN};
use crate::query::{Filter, UpdateBuilder};
use crate::store;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;

fn user_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "username": r.get::<_, String>(1)?,
        "fullName": r.get::<_, String>(2)?,
        "role": r.get::<_, String>(3)?,
        "assignedClass": r.get::<_, Option<String>>(4)?,
        "tempPassword": r.get::<_, i64>(5)? != 0,
        "status": r.get::<_, String>(6)?,
        "createdAt": r.get::<_, String>(7)?,
    }))
}

const USER_COLUMNS: &str =
    "id, username, full_name, role, assigned_class, temp_password, status, created_at";

fn check_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Admins are never bound to a class; others must name an existing one.
fn resolve_assigned_class(
    conn: &Connection,
    role: Role,
    class: Option<String>,
) -> AppResult<Option<String>> {
    match role {
        Role::Admin => Ok(None),
        Role::Teacher | Role::Coordinator => {
            if let Some(c) = &class {
                store::require_class(conn, c)?;
            }
            Ok(class)
        }
    }
}

fn users_list(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let role = optional_str(params, "role")?
        .map(|r| Role::parse(&r))
        .transpose()?;
    let filter = Filter::new()
        .eq_opt("role", role.map(|r| r.as_str().to_string()))
        .eq_opt("status", optional_status(params, "status")?)
        .search_opt(&["username", "full_name"], optional_str(params, "search")?.as_deref());
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users{} ORDER BY username",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params_from_iter(filter.into_params()), user_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "users": users }))
}

fn users_create(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let username = required_str(params, "username")?;
    let full_name = optional_str(params, "fullName")?.unwrap_or_default();
    let role = Role::parse(&required_str(params, "role")?)?;
    let password = required_str(params, "password")?;
    check_password(&password)?;
    let assigned_class =
        resolve_assigned_class(conn, role, optional_str(params, "assignedClass")?)?;

    let id = new_id();
    conn.execute(
        "INSERT INTO users(id, username, full_name, role, assigned_class, password_hash, temp_password, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, 'active', ?)",
        (
            &id,
            &username,
            &full_name,
            role.as_str(),
            &assigned_class,
            hash_password(&password)?,
            now_rfc3339(),
        ),
    )?;
    tracing::info!(username = %username, role = role.as_str(), by = %who.username, "user created");
    Ok(json!({ "userId": id }))
}

fn users_update(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let user_id = required_str(params, "userId")?;
    let current_role: String = conn
        .query_row("SELECT role FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()?
        .ok_or_else(|| AppError::not_found("user"))?;

    let role = match optional_str(params, "role")? {
        Some(r) => Some(Role::parse(&r)?),
        None => None,
    };
    let effective_role = match role {
        Some(r) => r,
        None => Role::parse(&current_role)?,
    };
    let password = optional_str(params, "password")?;
    if let Some(p) = &password {
        check_password(p)?;
    }

    let mut update = UpdateBuilder::new("users")
        .set_opt("full_name", optional_str(params, "fullName")?)
        .set_opt("role", role.map(|r| r.as_str().to_string()))
        .set_opt("status", optional_status(params, "status")?);
    if effective_role == Role::Admin {
        update = update.set("assigned_class", Option::<String>::None);
    } else if params.get("assignedClass").is_some() {
        let class = resolve_assigned_class(
            conn,
            effective_role,
            optional_str(params, "assignedClass")?,
        )?;
        update = update.set("assigned_class", class);
    }
    if let Some(p) = password {
        update = update
            .set("password_hash", hash_password(&p)?)
            .set("temp_password", 1_i64);
    }
    if update.is_empty() {
        return Err(AppError::validation("nothing to update"));
    }
    let (sql, values) = update
        .set("updated_at", now_rfc3339())
        .build(Filter::new().eq("id", user_id.clone()));
    conn.execute(&sql, params_from_iter(values))?;
    tracing::info!(user_id = %user_id, by = %who.username, "user updated");
    Ok(json!({ "userId": user_id }))
}

fn users_delete(
    conn: &Connection,
    who: &Identity,
    params: &serde_json::Value,
) -> AppResult<serde_json::Value> {
    who.require_admin()?;
    let user_id = required_str(params, "userId")?;
    if user_id == who.user_id {
        return Err(AppError::Conflict("cannot delete your own account".to_string()));
    }
    let changed = conn.execute("DELETE FROM users WHERE id = ?", [&user_id])?;
    if changed == 0 {
        return Err(AppError::not_found("user"));
    }
    tracing::info!(user_id = %user_id, by = %who.username, "user deleted");
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(guarded(state, req, users_list)),
        "users.create" => Some(guarded(state, req, users_create)),
        "users.update" => Some(guarded(state, req, users_update)),
        "users.delete" => Some(guarded(state, req, users_delete)),
        _ => None,
    }
}

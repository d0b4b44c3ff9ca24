//! User management (admin only).

use axum::extract::{Extension, Path, State};
use axum::middleware;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{ClientMeta, CurrentUser, Role, password, require_admin};
use crate::core::ServerState;
use crate::utils::validation::{MAX_PASSWORD_LEN, MIN_PASSWORD_LEN, Validator};
use crate::utils::{ApiResponse, AppError, AppResult, created, now_millis, ok};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/users", get(list).post(create))
        .route("/api/v1/users/{id}", put(update).delete(remove))
        .layer(middleware::from_fn(require_admin))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    role: String,
    is_active: bool,
    created_at: i64,
}

async fn list(State(state): State<ServerState>) -> AppResult<Json<ApiResponse<Vec<UserRow>>>> {
    let users = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, role, is_active, created_at FROM users ORDER BY username",
    )
    .fetch_all(&state.db.pool)
    .await?;
    Ok(ok(users))
}

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    username: String,
    password: String,
    role: String,
}

async fn create(
    State(state): State<ServerState>,
    Extension(admin): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(req): Json<CreateUserRequest>,
) -> AppResult<axum::response::Response> {
    let mut v = Validator::new();
    v.require_text(&req.username, "username", 64)
        .one_of(&req.role, &["admin", "user", "readonly"], "role");
    if req.password.len() < MIN_PASSWORD_LEN || req.password.len() > MAX_PASSWORD_LEN {
        v.push(format!(
            "password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters"
        ));
    }
    v.finish()?;

    let hash = password::hash_password(&req.password)?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO users (username, password_hash, role, is_active, created_at) \
         VALUES (?, ?, ?, 1, ?) RETURNING id",
    )
    .bind(&req.username)
    .bind(&hash)
    .bind(&req.role)
    .bind(now_millis())
    .fetch_one(&state.db.pool)
    .await?;

    state.audit.log(
        Some(&admin),
        Some(&meta),
        "create",
        "users",
        &req.username,
        format!("Created user with role {}", req.role),
    );

    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, role, is_active, created_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db.pool)
    .await?;
    Ok(created(row))
}

#[derive(Debug, Deserialize)]
struct UpdateUserRequest {
    role: Option<String>,
    is_active: Option<bool>,
    password: Option<String>,
}

async fn update(
    State(state): State<ServerState>,
    Extension(admin): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(user_id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Json<ApiResponse<UserRow>>> {
    if let Some(ref role) = req.role
        && Role::parse(role).is_none()
    {
        return Err(AppError::validation("role must be one of: admin, user, readonly"));
    }
    if let Some(ref pw) = req.password
        && (pw.len() < MIN_PASSWORD_LEN || pw.len() > MAX_PASSWORD_LEN)
    {
        return Err(AppError::validation(format!(
            "password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters"
        )));
    }

    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&state.db.pool)
        .await?;
    if exists == 0 {
        return Err(AppError::not_found(format!("User {user_id}")));
    }

    if let Some(ref role) = req.role {
        sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role)
            .bind(user_id)
            .execute(&state.db.pool)
            .await?;
    }
    if let Some(active) = req.is_active {
        sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(user_id)
            .execute(&state.db.pool)
            .await?;
        if !active {
            // Disabled users lose their live sessions.
            sqlx::query("DELETE FROM sessions WHERE user_id = ?")
                .bind(user_id)
                .execute(&state.db.pool)
                .await?;
        }
    }
    if let Some(ref pw) = req.password {
        let hash = password::hash_password(pw)?;
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(&hash)
            .bind(user_id)
            .execute(&state.db.pool)
            .await?;
    }

    state.audit.log(
        Some(&admin),
        Some(&meta),
        "update",
        "users",
        &user_id.to_string(),
        "Updated user",
    );

    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, role, is_active, created_at FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_one(&state.db.pool)
    .await?;
    Ok(ok(row))
}

async fn remove(
    State(state): State<ServerState>,
    Extension(admin): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    if user_id == admin.id {
        return Err(AppError::conflict("You cannot delete your own account"));
    }
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(&state.db.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("User {user_id}")));
    }
    state.audit.log(
        Some(&admin),
        Some(&meta),
        "delete",
        "users",
        &user_id.to_string(),
        "Deleted user",
    );
    Ok(ok(serde_json::json!({"deleted": true})))
}

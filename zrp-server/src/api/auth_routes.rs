//! Authentication endpoints: login/logout, current user, API keys.

use axum::extract::{Extension, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::{ClientMeta, CurrentUser, api_key, password, session};
use crate::core::ServerState;
use crate::utils::{AppError, AppResult, ok};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/auth/me", get(me))
        .route("/api/v1/auth/keys", get(list_keys).post(create_key))
        .route("/api/v1/auth/keys/{id}", delete(revoke_key))
        .route("/api/v1/auth/keys/{id}/enabled", put(set_key_enabled))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    username: String,
    role: String,
    expires_at: i64,
}

fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!(
        "{}={token}; HttpOnly; Path=/; Max-Age={max_age_secs}; SameSite=Lax",
        session::SESSION_COOKIE
    )
}

async fn login(
    State(state): State<ServerState>,
    Extension(meta): Extension<ClientMeta>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Response> {
    // Throttle by client address before touching the store.
    let bucket_key = meta.ip.clone().unwrap_or_else(|| "unknown".to_string());
    if !state.login_limiter.check(&bucket_key) {
        return Err(AppError::rate_limited());
    }

    let row: Option<(i64, String, String)> = sqlx::query_as(
        "SELECT id, password_hash, username FROM users WHERE username = ? AND is_active = 1",
    )
    .bind(&req.username)
    .fetch_optional(&state.db.pool)
    .await?;

    let Some((user_id, hash, username)) = row else {
        // Same error for unknown user and bad password.
        return Err(AppError::unauthenticated());
    };
    if !password::verify_password(&req.password, &hash) {
        state.audit.log(
            None,
            Some(&meta),
            "login_failed",
            "auth",
            &username,
            "Failed login attempt",
        );
        return Err(AppError::unauthenticated());
    }

    let new_session = session::create(&state.db, user_id).await?;
    let role: String = sqlx::query_scalar("SELECT role FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&state.db.pool)
        .await?;

    state.audit.log(None, Some(&meta), "login", "auth", &username, "Logged in");

    let body = ok(LoginResponse {
        username,
        role,
        expires_at: new_session.expires_at,
    });
    let cookie = session_cookie(&new_session.token, session::SESSION_TTL_MS / 1000);
    Ok(([(header::SET_COOKIE, cookie)], body).into_response())
}

async fn logout(
    State(state): State<ServerState>,
    user: Option<Extension<CurrentUser>>,
    headers: axum::http::HeaderMap,
) -> AppResult<Response> {
    // Destroy whatever session the cookie names, valid or not.
    if let Some(cookie_header) = headers.get(header::COOKIE).and_then(|h| h.to_str().ok()) {
        for pair in cookie_header.split(';') {
            if let Some(token) = pair.trim().strip_prefix(&format!("{}=", session::SESSION_COOKIE)) {
                session::destroy(&state.db, token).await?;
            }
        }
    }
    if let Some(Extension(user)) = user {
        state
            .audit
            .log(Some(&user), None, "logout", "auth", &user.username, "Logged out");
    }

    let clear = session_cookie("", 0);
    Ok(([(header::SET_COOKIE, clear)], ok(serde_json::json!({"logged_out": true}))).into_response())
}

#[derive(Debug, Serialize)]
struct MeResponse {
    id: i64,
    username: String,
    role: &'static str,
}

async fn me(user: Option<Extension<CurrentUser>>) -> AppResult<Json<crate::utils::ApiResponse<MeResponse>>> {
    let Some(Extension(user)) = user else {
        return Err(AppError::unauthenticated());
    };
    Ok(ok(MeResponse {
        id: user.id,
        username: user.username.clone(),
        role: user.role.as_str(),
    }))
}

async fn list_keys(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<crate::utils::ApiResponse<Vec<api_key::ApiKeyInfo>>>> {
    let keys = api_key::list_for_user(&state.db, user.id).await?;
    Ok(ok(keys))
}

#[derive(Debug, Deserialize)]
struct CreateKeyRequest {
    name: String,
    expires_at: Option<i64>,
}

async fn create_key(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Json(req): Json<CreateKeyRequest>,
) -> AppResult<Response> {
    if req.name.trim().is_empty() {
        return Err(AppError::validation("name must not be empty"));
    }
    let issued = api_key::issue(&state.db, user.id, &req.name, req.expires_at).await?;
    state.audit.log(
        Some(&user),
        Some(&meta),
        "create",
        "api_keys",
        &issued.prefix,
        format!("Issued API key '{}'", issued.name),
    );
    Ok(crate::utils::created(issued))
}

async fn revoke_key(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Extension(meta): Extension<ClientMeta>,
    Path(key_id): Path<i64>,
) -> AppResult<Json<crate::utils::ApiResponse<serde_json::Value>>> {
    if !api_key::revoke(&state.db, user.id, key_id).await? {
        return Err(AppError::not_found(format!("API key {key_id}")));
    }
    state.audit.log(
        Some(&user),
        Some(&meta),
        "delete",
        "api_keys",
        &key_id.to_string(),
        "Revoked API key",
    );
    Ok(ok(serde_json::json!({"revoked": true})))
}

#[derive(Debug, Deserialize)]
struct SetEnabledRequest {
    enabled: bool,
}

async fn set_key_enabled(
    State(state): State<ServerState>,
    Extension(user): Extension<CurrentUser>,
    Path(key_id): Path<i64>,
    Json(req): Json<SetEnabledRequest>,
) -> AppResult<Json<crate::utils::ApiResponse<serde_json::Value>>> {
    if !api_key::set_enabled(&state.db, user.id, key_id, req.enabled).await? {
        return Err(AppError::not_found(format!("API key {key_id}")));
    }
    Ok(ok(serde_json::json!({"enabled": req.enabled})))
}

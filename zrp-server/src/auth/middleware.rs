//! Authentication middleware.
//!
//! Runs on every request, before routing:
//!
//! 1. Captures client metadata (IP, user agent) for audit rows.
//! 2. Derives a [`CurrentUser`] from the `zrp_session` cookie or a
//!    `zrp_` bearer key and injects it into the request extensions.
//! 3. Enforces the readonly role gate: a readonly credential gets 403 on
//!    any mutating method, regardless of path.
//! 4. Rejects unauthenticated requests to protected paths with 401.
//!
//! Exempt from the credential requirement: everything outside `/api/`
//! (root, static assets, `/files/*`, `/healthz`), login/logout, and CORS
//! preflight.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, header},
    middleware::Next,
    response::Response,
};

use crate::auth::{ClientMeta, CurrentUser, api_key, session, token};
use crate::core::ServerState;
use crate::utils::AppError;

/// Paths that never require a credential.
fn is_exempt(path: &str) -> bool {
    if !path.starts_with("/api/") {
        // Root, static assets, /files/*, /healthz.
        return true;
    }
    matches!(path, "/api/v1/auth/login" | "/api/v1/auth/logout")
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix(name)
            && let Some(value) = value.strip_prefix('=')
        {
            return Some(value.to_string());
        }
    }
    None
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|v| v.to_string());
    ClientMeta { ip, user_agent }
}

pub async fn require_auth(
    State(state): State<ServerState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // CORS preflight never authenticates.
    if req.method() == Method::OPTIONS {
        return Ok(next.run(req).await);
    }

    let path = req.uri().path().to_string();
    let method = req.method().clone();

    let meta = client_meta(req.headers());
    req.extensions_mut().insert(meta);

    // Derive the user — cookie first, bearer key second. Derivation also
    // runs on exempt paths so optional-auth handlers see the user.
    let mut user: Option<CurrentUser> = None;

    if let Some(session_token) = extract_cookie(req.headers(), session::SESSION_COOKIE) {
        user = session::validate(&state.db, &session_token).await?;
    }

    if user.is_none()
        && let Some(bearer) = extract_bearer(req.headers())
        && bearer.starts_with("zrp_")
    {
        if !state.key_limiter.check(&token::key_prefix(&bearer)) {
            return Err(AppError::rate_limited());
        }
        user = api_key::verify(&state.db, &bearer).await?;
    }

    if let Some(ref u) = user {
        let mutating = method != Method::GET && method != Method::HEAD;
        if u.is_readonly() && mutating {
            return Err(AppError::forbidden("Readonly credential cannot modify data"));
        }
        req.extensions_mut().insert(u.clone());
    }

    if is_exempt(&path) {
        return Ok(next.run(req).await);
    }
    if user.is_none() {
        return Err(AppError::unauthenticated());
    }
    Ok(next.run(req).await)
}

/// Layer for admin-only routers (user management, retention policy).
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(AppError::unauthenticated)?;
    if !user.is_admin() {
        return Err(AppError::forbidden("Administrator role required"));
    }
    Ok(next.run(req).await)
}

//! HTTP-level tests: envelope shape, authentication, role gate, session
//! expiry, deliberate 501s.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use zrp_server::api;
use zrp_server::audit::AuditService;
use zrp_server::auth::password;
use zrp_server::core::{Config, ServerState};
use zrp_server::db::Db;
use zrp_server::events::EventBus;
use zrp_server::utils::now_millis;

async fn test_app() -> (Router, ServerState, TempDir) {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("zrp.db");
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();

    let db = Db::open(db_path.to_str().unwrap()).await.unwrap();
    let bus = EventBus::new(64);
    let (audit, audit_rx) = AuditService::new(&db, 64);
    tokio::spawn(zrp_server::audit::run_worker(audit_rx, audit.storage().clone()));

    let config = Config::for_tests(
        db_path.to_str().unwrap().to_string(),
        uploads.to_str().unwrap().to_string(),
    );
    let state = ServerState::new(db, config, bus, audit);
    let app = api::build_app(&state);
    (app, state, dir)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Log in as the seeded admin and return the session cookie value.
async fn login(app: &Router, username: &str, password: &str, ip: &str) -> Option<String> {
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/v1/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", ip)
                .body(Body::from(
                    serde_json::json!({"username": username, "password": password}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    if response.status() != StatusCode::OK {
        return None;
    }
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .next()?
        .to_string();
    Some(cookie)
}

fn get(path: &str, cookie: &str) -> Request<Body> {
    Request::get(path)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn post_json(path: &str, cookie: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(path)
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn unauthenticated_requests_rejected() {
    let (app, _state, _dir) = test_app().await;

    let response = app
        .clone()
        .oneshot(Request::get("/api/v1/inventory").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "unauthenticated");
    assert!(body["error"].is_string());

    // Health is public.
    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn login_and_envelope_shape() {
    let (app, _state, _dir) = test_app().await;
    let cookie = login(&app, "admin", "admin123", "10.0.0.1").await.unwrap();
    assert!(cookie.starts_with("zrp_session="));

    let response = app
        .clone()
        .oneshot(get("/api/v1/inventory?page=1&limit=10", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["data"].is_array());
    assert_eq!(body["meta"]["total"], 0);
    assert_eq!(body["meta"]["page"], 1);
    assert_eq!(body["meta"]["limit"], 10);

    // Bad credentials get the same generic 401.
    assert!(login(&app, "admin", "wrong", "10.0.0.2").await.is_none());
}

#[tokio::test]
async fn session_expiry_is_enforced() {
    let (app, state, _dir) = test_app().await;
    let cookie = login(&app, "admin", "admin123", "10.0.0.3").await.unwrap();

    let response = app.clone().oneshot(get("/api/v1/auth/me", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Age the session past 24 h.
    sqlx::query("UPDATE sessions SET expires_at = ?")
        .bind(now_millis() - 1)
        .execute(&state.db.pool)
        .await
        .unwrap();

    let response = app.oneshot(get("/api/v1/auth/me", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn readonly_gate_blocks_every_mutation() {
    let (app, state, _dir) = test_app().await;

    let hash = password::hash_password("viewer-pass-123").unwrap();
    sqlx::query(
        "INSERT INTO users (username, password_hash, role, is_active, created_at) \
         VALUES ('viewer', ?, 'readonly', 1, ?)",
    )
    .bind(&hash)
    .bind(now_millis())
    .execute(&state.db.pool)
    .await
    .unwrap();

    let cookie = login(&app, "viewer", "viewer-pass-123", "10.0.0.4").await.unwrap();

    // Reads are fine.
    let response = app.clone().oneshot(get("/api/v1/inventory", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Any mutating method is 403, whatever the path.
    for path in [
        "/api/v1/vendors",
        "/api/v1/workorders",
        "/api/v1/notifications/read-all",
        "/api/v1/auth/logout",
    ] {
        let response = app
            .clone()
            .oneshot(post_json(path, &cookie, serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "path {path}");
        let body = body_json(response).await;
        assert_eq!(body["code"], "unauthorized");
    }
}

#[tokio::test]
async fn admin_endpoints_role_gated() {
    let (app, state, _dir) = test_app().await;

    let hash = password::hash_password("user-pass-1234").unwrap();
    sqlx::query(
        "INSERT INTO users (username, password_hash, role, is_active, created_at) \
         VALUES ('bob', ?, 'user', 1, ?)",
    )
    .bind(&hash)
    .bind(now_millis())
    .execute(&state.db.pool)
    .await
    .unwrap();

    let cookie = login(&app, "bob", "user-pass-1234", "10.0.0.5").await.unwrap();
    let response = app
        .clone()
        .oneshot(get("/api/v1/users", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin_cookie = login(&app, "admin", "admin123", "10.0.0.6").await.unwrap();
    let response = app.oneshot(get("/api/v1/users", &admin_cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn parts_writes_are_501() {
    let (app, _state, _dir) = test_app().await;
    let cookie = login(&app, "admin", "admin123", "10.0.0.7").await.unwrap();

    let response = app
        .oneshot(post_json(
            "/api/v1/parts",
            &cookie,
            serde_json::json!({"ipn": "RES-001"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "not_implemented");
}

#[tokio::test]
async fn login_attempts_are_rate_limited() {
    let (app, _state, _dir) = test_app().await;

    // Burst capacity is five; the sixth attempt from one address is
    // throttled.
    for _ in 0..5 {
        assert!(login(&app, "admin", "wrong", "10.9.9.9").await.is_none());
    }
    let response = app
        .oneshot(
            Request::post("/api/v1/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "10.9.9.9")
                .body(Body::from(
                    serde_json::json!({"username": "admin", "password": "admin123"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn conflict_and_not_found_mapping() {
    let (app, _state, _dir) = test_app().await;
    let cookie = login(&app, "admin", "admin123", "10.0.0.8").await.unwrap();

    // Missing row -> 404.
    let response = app
        .clone()
        .oneshot(get("/api/v1/purchase-orders/PO-9999", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Create a vendor, then a second with a duplicate natural key on
    // devices to exercise 409.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/devices",
            &cookie,
            serde_json::json!({"serial_number": "SN-001"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/devices",
            &cookie,
            serde_json::json!({"serial_number": "SN-001"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn api_key_bearer_authenticates() {
    let (app, _state, _dir) = test_app().await;
    let cookie = login(&app, "admin", "admin123", "10.0.0.10").await.unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/auth/keys",
            &cookie,
            serde_json::json!({"name": "ci"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let key = body["data"]["key"].as_str().unwrap().to_string();
    assert!(key.starts_with("zrp_"));

    let response = app
        .oneshot(
            Request::get("/api/v1/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["username"], "admin");
}

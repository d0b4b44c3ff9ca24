//! HTTP routing and application construction.
//!
//! Per-module routers merged under `/api/v1/`, wrapped in the shared
//! middleware chain: CORS, compression, trace, request-id, then the
//! authentication middleware (which also enforces the readonly gate).
//! `/healthz` and `/files/*` sit outside the protected prefix.

use axum::Router;
use axum::middleware as axum_middleware;
use http::{HeaderName, HeaderValue};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth;
use crate::core::ServerState;

pub mod attachments;
pub mod audit_log;
pub mod auth_routes;
pub mod bom_routes;
pub mod campaigns;
pub mod dashboard;
pub mod devices;
pub mod health;
pub mod history_routes;
pub mod inventory_routes;
pub mod notifications_routes;
pub mod parts;
pub mod presence_routes;
pub mod purchase_orders;
pub mod quality_routes;
pub mod quotes;
pub mod rfqs;
pub mod rmas;
pub mod search;
pub mod suggestions_routes;
pub mod users;
pub mod vendors;
pub mod workorders_routes;

#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// All module routers, no middleware.
pub fn build_router() -> Router<ServerState> {
    Router::new()
        .merge(auth_routes::router())
        .merge(users::router())
        .merge(vendors::router())
        .merge(parts::router())
        .merge(bom_routes::router())
        .merge(inventory_routes::router())
        .merge(purchase_orders::router())
        .merge(suggestions_routes::router())
        .merge(rfqs::router())
        .merge(workorders_routes::router())
        .merge(quality_routes::router())
        .merge(rmas::router())
        .merge(devices::router())
        .merge(campaigns::router())
        .merge(quotes::router())
        .merge(attachments::router())
        .merge(notifications_routes::router())
        .merge(audit_log::router())
        .merge(history_routes::router())
        .merge(search::router())
        .merge(dashboard::router())
        .merge(presence_routes::router())
        .merge(health::router())
}

/// The full application with middleware and state applied.
pub fn build_app(state: &ServerState) -> Router {
    build_router()
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            XRequestId,
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .with_state(state.clone())
}

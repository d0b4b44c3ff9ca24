//! Shared server state.
//!
//! Everything a handler needs, injected at construction — no globals.
//! Cheap to clone: the expensive members are behind `Arc` or are pools.

use std::sync::Arc;

use crate::audit::AuditService;
use crate::auth::RateLimiter;
use crate::core::Config;
use crate::db::Db;
use crate::events::presence::PresenceTracker;
use crate::events::EventBus;
use crate::utils::now_millis;

#[derive(Clone)]
pub struct ServerState {
    pub db: Db,
    pub config: Arc<Config>,
    pub bus: EventBus,
    pub audit: Arc<AuditService>,
    pub presence: PresenceTracker,
    pub login_limiter: Arc<RateLimiter>,
    pub key_limiter: Arc<RateLimiter>,
    pub started_at: i64,
}

impl ServerState {
    pub fn new(db: Db, config: Config, bus: EventBus, audit: Arc<AuditService>) -> Self {
        Self {
            db,
            config: Arc::new(config),
            bus,
            audit,
            presence: PresenceTracker::new(),
            login_limiter: Arc::new(RateLimiter::for_login()),
            key_limiter: Arc::new(RateLimiter::for_api_keys()),
            started_at: now_millis(),
        }
    }
}

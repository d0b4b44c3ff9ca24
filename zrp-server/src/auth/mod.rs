//! Authentication and authorization.
//!
//! Two credentials are accepted: the `zrp_session` cookie (opaque token,
//! 24 h, database-backed) and `zrp_`-prefixed bearer API keys (salted
//! hash at rest, prefix shown to humans). The middleware derives a
//! [`CurrentUser`] for every protected request and enforces the readonly
//! role gate; admin-only routers add [`middleware::require_admin`].

pub mod api_key;
pub mod middleware;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod token;

pub use middleware::{require_admin, require_auth};
pub use rate_limit::RateLimiter;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Readonly,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Readonly => "readonly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "user" => Some(Self::User),
            "readonly" => Some(Self::Readonly),
            _ => None,
        }
    }
}

/// Request-scoped user context, injected by the auth middleware.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_readonly(&self) -> bool {
        self.role == Role::Readonly
    }
}

/// Client metadata captured by the middleware for audit rows.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

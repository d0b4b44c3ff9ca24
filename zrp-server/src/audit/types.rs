//! Audit log data structures.

use serde::{Deserialize, Serialize};

/// One immutable audit row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    /// Operator username; `None` for system-generated events.
    pub user_name: Option<String>,
    /// Verb: `create`, `update`, `delete`, `receive`, `inspect`, `login`, …
    pub action: String,
    /// Module the record belongs to (`purchase_orders`, `inventory`, …).
    pub module: String,
    pub record_id: String,
    /// One-line human summary.
    pub summary: String,
    /// Row snapshot before the mutation (JSON), when available.
    pub before_json: Option<String>,
    /// Row snapshot after the mutation (JSON), when available.
    pub after_json: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
}

/// Query filters for reading the log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub module: Option<String>,
    pub user: Option<String>,
    /// Inclusive lower bound, unix millis.
    pub from: Option<i64>,
    /// Inclusive upper bound, unix millis.
    pub to: Option<i64>,
    pub record_id: Option<String>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

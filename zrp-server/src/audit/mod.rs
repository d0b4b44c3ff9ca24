//! Audit log.
//!
//! Append-only record of who did what, when, for every mutation, with
//! optional before/after JSON snapshots of the affected row. Writes are
//! best-effort through an mpsc channel and a background worker: a full
//! channel or a failed insert never blocks or fails the primary mutation,
//! but is surfaced in the logs. Reads are filterable, paginated and
//! exportable as CSV. Retention is a runtime setting enforced by the
//! periodic scanner.

mod service;
mod storage;
mod types;

pub use service::{AuditLogRequest, AuditService, run_worker};
pub use storage::AuditStorage;
pub use types::{AuditEntry, AuditQuery};

/// Default retention window in days; overridable via the
/// `audit_retention_days` setting.
pub const DEFAULT_RETENTION_DAYS: i64 = 365;

/// Settings key for the retention window.
pub const RETENTION_SETTING: &str = "audit_retention_days";

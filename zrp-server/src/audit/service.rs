//! Audit service: channel-fed, best-effort writer.
//!
//! Handlers call [`AuditService::log`] (or the snapshot variants) after a
//! successful mutation. The request is queued on an mpsc channel and
//! written by a background worker; a full queue drops the entry with an
//! error log rather than blocking the request path.

use std::sync::Arc;
use tokio::sync::mpsc;

use super::storage::AuditStorage;
use crate::auth::{ClientMeta, CurrentUser};
use crate::db::Db;

pub struct AuditLogRequest {
    pub user_name: Option<String>,
    pub action: String,
    pub module: String,
    pub record_id: String,
    pub summary: String,
    pub before_json: Option<String>,
    pub after_json: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

pub struct AuditService {
    storage: AuditStorage,
    tx: mpsc::Sender<AuditLogRequest>,
}

impl AuditService {
    pub fn new(db: &Db, buffer_size: usize) -> (Arc<Self>, mpsc::Receiver<AuditLogRequest>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        let service = Arc::new(Self {
            storage: AuditStorage::new(db.pool.clone()),
            tx,
        });
        (service, rx)
    }

    /// Queue an audit row. Never blocks; drops with an error log when the
    /// channel is full or closed.
    pub fn log(
        &self,
        user: Option<&CurrentUser>,
        meta: Option<&ClientMeta>,
        action: &str,
        module: &str,
        record_id: &str,
        summary: impl Into<String>,
    ) {
        self.log_with_snapshots(user, meta, action, module, record_id, summary, None, None);
    }

    /// Queue an audit row with before/after JSON snapshots.
    #[allow(clippy::too_many_arguments)]
    pub fn log_with_snapshots(
        &self,
        user: Option<&CurrentUser>,
        meta: Option<&ClientMeta>,
        action: &str,
        module: &str,
        record_id: &str,
        summary: impl Into<String>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) {
        let req = AuditLogRequest {
            user_name: user.map(|u| u.username.clone()),
            action: action.to_string(),
            module: module.to_string(),
            record_id: record_id.to_string(),
            summary: summary.into(),
            before_json: before.map(|v| v.to_string()),
            after_json: after.map(|v| v.to_string()),
            ip: meta.and_then(|m| m.ip.clone()),
            user_agent: meta.and_then(|m| m.user_agent.clone()),
        };

        if let Err(e) = self.tx.try_send(req) {
            tracing::error!(error = %e, "Audit entry dropped — channel full or closed");
        }
    }

    pub fn storage(&self) -> &AuditStorage {
        &self.storage
    }
}

/// Background worker draining the audit channel into storage.
pub async fn run_worker(mut rx: mpsc::Receiver<AuditLogRequest>, storage: AuditStorage) {
    while let Some(req) = rx.recv().await {
        if let Err(e) = storage
            .append(
                req.user_name,
                req.action,
                req.module,
                req.record_id,
                req.summary,
                req.before_json,
                req.after_json,
                req.ip,
                req.user_agent,
            )
            .await
        {
            tracing::error!(error = %e, "Failed to write audit entry");
        }
    }
    tracing::debug!("Audit worker stopped (channel closed)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::AuditQuery;
    use crate::auth::Role;
    use crate::db::test_support::test_db;

    #[tokio::test]
    async fn log_flows_through_worker() {
        let (db, _dir) = test_db().await;
        let (service, rx) = AuditService::new(&db, 64);
        let storage = service.storage().clone();
        let worker = tokio::spawn(run_worker(rx, storage));

        let user = CurrentUser {
            id: 1,
            username: "alice".into(),
            role: Role::User,
        };
        service.log(
            Some(&user),
            None,
            "receive",
            "purchase_orders",
            "PO-0001",
            "Received 100 on line 1",
        );

        // Dropping the service closes the channel and stops the worker.
        drop(service);
        worker.await.unwrap();

        let storage = AuditStorage::new(db.pool.clone());
        let (rows, total) = storage.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].user_name.as_deref(), Some("alice"));
        assert_eq!(rows[0].action, "receive");
        assert_eq!(rows[0].record_id, "PO-0001");
    }
}

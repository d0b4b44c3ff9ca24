//! Presence tracking.
//!
//! Maps `(resource_type, resource_id)` to the set of users currently
//! viewing or editing it. Entries expire by timestamp: clients ping while
//! a record is open and the reaper drops anything silent past the TTL.
//! This is the only in-memory cache in the system.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::utils::now_millis;

/// A user goes stale after 30 s without a ping.
pub const PRESENCE_TTL_MS: i64 = 30_000;

#[derive(Debug, Clone, Serialize)]
pub struct PresenceUser {
    pub username: String,
    pub editing: bool,
    pub last_seen: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    // "module:record_id" -> username -> (editing, last_seen)
    inner: Arc<DashMap<String, HashMap<String, (bool, i64)>>>,
}

fn key(resource_type: &str, resource_id: &str) -> String {
    format!("{resource_type}:{resource_id}")
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh a user on a record.
    pub fn touch(&self, resource_type: &str, resource_id: &str, username: &str, editing: bool) {
        let mut entry = self.inner.entry(key(resource_type, resource_id)).or_default();
        entry.insert(username.to_string(), (editing, now_millis()));
    }

    /// Explicit departure (navigating away, disconnect).
    pub fn leave(&self, resource_type: &str, resource_id: &str, username: &str) {
        if let Some(mut entry) = self.inner.get_mut(&key(resource_type, resource_id)) {
            entry.remove(username);
        }
        self.inner
            .remove_if(&key(resource_type, resource_id), |_, users| users.is_empty());
    }

    /// Users currently on a record (fresh entries only).
    pub fn snapshot(&self, resource_type: &str, resource_id: &str) -> Vec<PresenceUser> {
        let cutoff = now_millis() - PRESENCE_TTL_MS;
        let Some(entry) = self.inner.get(&key(resource_type, resource_id)) else {
            return Vec::new();
        };
        let mut users: Vec<PresenceUser> = entry
            .iter()
            .filter(|(_, (_, seen))| *seen >= cutoff)
            .map(|(name, (editing, seen))| PresenceUser {
                username: name.clone(),
                editing: *editing,
                last_seen: *seen,
            })
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// Drop expired users and empty records. Called by the reaper task.
    pub fn expire(&self) {
        let cutoff = now_millis() - PRESENCE_TTL_MS;
        for mut entry in self.inner.iter_mut() {
            entry.value_mut().retain(|_, (_, seen)| *seen >= cutoff);
        }
        self.inner.retain(|_, users| !users.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_and_snapshot() {
        let tracker = PresenceTracker::new();
        tracker.touch("purchase_orders", "PO-0001", "alice", false);
        tracker.touch("purchase_orders", "PO-0001", "bob", true);

        let users = tracker.snapshot("purchase_orders", "PO-0001");
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "alice");
        assert!(users[1].editing);

        assert!(tracker.snapshot("purchase_orders", "PO-0002").is_empty());
    }

    #[test]
    fn leave_removes_user() {
        let tracker = PresenceTracker::new();
        tracker.touch("ncrs", "NCR-2026-001", "alice", false);
        tracker.leave("ncrs", "NCR-2026-001", "alice");
        assert!(tracker.snapshot("ncrs", "NCR-2026-001").is_empty());
    }

    #[test]
    fn expire_drops_stale_entries() {
        let tracker = PresenceTracker::new();
        tracker.touch("ecos", "ECO-2026-001", "alice", false);
        // Force the entry stale.
        if let Some(mut entry) = tracker.inner.get_mut("ecos:ECO-2026-001") {
            entry.insert("alice".into(), (false, now_millis() - PRESENCE_TTL_MS - 1));
        }
        tracker.expire();
        assert!(tracker.snapshot("ecos", "ECO-2026-001").is_empty());
        assert!(tracker.inner.is_empty());
    }
}

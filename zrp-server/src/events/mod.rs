//! In-process event bus and its consumers.
//!
//! Mutating workflows call [`EventBus::emit`] after their transaction
//! commits. Delivery is best-effort: the channel is bounded, producers
//! never block, and a subscriber that falls behind loses the oldest events
//! (counted, exposed on the health endpoint). Ordering is FIFO per
//! subscriber with no cross-subscriber guarantee.

pub mod mailer;
pub mod notifications;
pub mod presence;
pub mod scanner;
pub mod sse;

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Typed events crossing module boundaries. Mailable variants carry the
/// id of the notification row created by the producer, which the email
/// dispatcher uses as its at-most-once claim.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    PoReceived {
        po_id: String,
        notification_id: Option<i64>,
    },
    PoPartial {
        po_id: String,
    },
    InspectionCompleted {
        inspection_id: i64,
        po_id: String,
        ipn: String,
    },
    NcrCreated {
        ncr_id: String,
    },
    EcoApproved {
        eco_id: String,
        notification_id: Option<i64>,
    },
    WoCompleted {
        wo_id: String,
    },
    LowStock {
        ipn: String,
        notification_id: Option<i64>,
    },
    OverdueWo {
        wo_id: String,
        notification_id: Option<i64>,
    },
    AgingNcr {
        ncr_id: String,
    },
    NewRma {
        rma_id: String,
    },
    CampaignProgress {
        campaign_id: i64,
    },
    /// Generic change ping for sync-style consumers.
    RecordMutated {
        module: String,
        record_id: String,
        action: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event. Never blocks; with no live subscribers the event
    /// is simply discarded.
    pub fn emit(&self, event: AppEvent) {
        tracing::debug!(event = ?event, "bus emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Record `n` events lost by a lagging subscriber.
    pub fn note_lagged(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Total events dropped across all subscribers since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Receive loop helper: skips over lag gaps (counting them) and returns
/// `None` when the bus is gone.
pub async fn recv_next(
    bus: &EventBus,
    rx: &mut broadcast::Receiver<AppEvent>,
) -> Option<AppEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                bus.note_lagged(n);
                tracing::warn!(lost = n, "Event subscriber lagged; events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(AppEvent::NcrCreated {
            ncr_id: "NCR-2026-001".into(),
        });
        let event = recv_next(&bus, &mut rx).await.unwrap();
        assert!(matches!(event, AppEvent::NcrCreated { .. }));
    }

    #[tokio::test]
    async fn lag_is_counted_not_fatal() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.emit(AppEvent::PoPartial {
                po_id: format!("PO-{i:04}"),
            });
        }
        // The two newest survive; the rest were dropped and counted.
        let first = recv_next(&bus, &mut rx).await.unwrap();
        assert!(matches!(first, AppEvent::PoPartial { ref po_id } if po_id == "PO-0003"));
        assert_eq!(bus.dropped(), 3);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(AppEvent::LowStock {
            ipn: "RES-001".into(),
            notification_id: None,
        })
        .unwrap();
        assert_eq!(json["type"], "low_stock");
        assert_eq!(json["ipn"], "RES-001");
    }
}

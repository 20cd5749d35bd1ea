//! Ordered queue of pending user-facing notifications.
//!
//! Insertion happens only through the engine's dedup gate; the queue itself
//! just keeps order and handles dismissal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::db::models::{SignalRow, UserTradeRow};
use crate::events::bus::{EventBus, RelayEvent};
use crate::trademath::PositionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    Published,
    Edited,
    Deleted,
}

/// Payload of one pending notification, denormalized for presentation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationBody {
    NewSignal {
        signal: SignalRow,
    },
    SignalActive {
        signal: SignalRow,
    },
    TradeClosed {
        signal: SignalRow,
        status: String,
        trade: Option<UserTradeRow>,
    },
    TradeUpdate {
        action: UpdateAction,
        signal: SignalRow,
        update_id: Uuid,
        close_percent: Option<f64>,
        target_price: Option<f64>,
        order_kind: Option<String>,
        fill_price: Option<f64>,
        position: Option<PositionSnapshot>,
        note: Option<String>,
        previous: Option<serde_json::Value>,
        current: Option<serde_json::Value>,
    },
    SlBreakeven {
        signal: SignalRow,
        stop_loss: f64,
    },
}

impl NotificationBody {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationBody::NewSignal { .. } => "new_signal",
            NotificationBody::SignalActive { .. } => "signal_active",
            NotificationBody::TradeClosed { .. } => "trade_closed",
            NotificationBody::TradeUpdate { .. } => "trade_update",
            NotificationBody::SlBreakeven { .. } => "sl_breakeven",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationItem {
    pub id: u64,
    pub dedup_key: String,
    pub queued_at: DateTime<Utc>,
    pub body: NotificationBody,
}

/// FIFO of notifications awaiting dismissal.
pub struct NotificationQueue {
    next_id: AtomicU64,
    items: Mutex<Vec<NotificationItem>>,
    bus: Arc<EventBus>,
}

impl NotificationQueue {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            items: Mutex::new(Vec::new()),
            bus,
        }
    }

    /// Append a notification; returns the assigned queue id.
    pub fn push(&self, dedup_key: String, body: NotificationBody) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let kind = body.kind().to_string();
        let item = NotificationItem {
            id,
            dedup_key: dedup_key.clone(),
            queued_at: Utc::now(),
            body,
        };
        self.items.lock().push(item);
        self.bus.publish(RelayEvent::NotificationQueued {
            id,
            kind,
            dedup_key,
        });
        id
    }

    /// Remove a single notification. Returns false when the id is unknown.
    pub fn dismiss(&self, id: u64) -> bool {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|item| item.id != id);
        let removed = items.len() < before;
        drop(items);
        if removed {
            self.bus.publish(RelayEvent::NotificationDismissed { id });
        }
        removed
    }

    /// Remove everything at once. Returns how many were dismissed.
    pub fn dismiss_all(&self) -> usize {
        let mut items = self.items.lock();
        let dismissed = items.len();
        items.clear();
        drop(items);
        if dismissed > 0 {
            self.bus.publish(RelayEvent::QueueCleared { dismissed });
        }
        dismissed
    }

    pub fn pending(&self) -> Vec<NotificationItem> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> NotificationQueue {
        NotificationQueue::new(Arc::new(EventBus::new(16)))
    }

    fn body() -> NotificationBody {
        NotificationBody::TradeUpdate {
            action: UpdateAction::Published,
            signal: sample_signal(),
            update_id: Uuid::new_v4(),
            close_percent: Some(50.0),
            target_price: Some(1.21),
            order_kind: Some("limit".into()),
            fill_price: None,
            position: None,
            note: None,
            previous: None,
            current: None,
        }
    }

    fn sample_signal() -> SignalRow {
        let now = Utc::now();
        SignalRow {
            id: Uuid::new_v4(),
            pair: "XAUUSD".into(),
            direction: "sell".into(),
            category: "metals".into(),
            entry_price: Some(2400.0),
            stop_loss: Some(2410.0),
            take_profit: Some(2380.0),
            status: "active".into(),
            kind: "signal".into(),
            upcoming_status: None,
            tracking_status: None,
            send_updates: true,
            send_closed: true,
            created_by: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    #[test]
    fn push_assigns_increasing_ids_and_keeps_order() {
        let q = queue();
        let a = q.push("k1".into(), body());
        let b = q.push("k2".into(), body());
        assert!(b > a);

        let pending = q.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, a);
        assert_eq!(pending[1].id, b);
    }

    #[test]
    fn dismiss_one_and_all() {
        let q = queue();
        let a = q.push("k1".into(), body());
        q.push("k2".into(), body());

        assert!(q.dismiss(a));
        assert!(!q.dismiss(a));
        assert_eq!(q.len(), 1);

        assert_eq!(q.dismiss_all(), 1);
        assert!(q.is_empty());
        assert_eq!(q.dismiss_all(), 0);
    }
}

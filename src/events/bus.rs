//! Internal event broadcast — tokio::broadcast channel for cross-component events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::realtime::types::ChannelStatus;

/// Relay-wide events for the web layer, logging and monitoring.
#[derive(Debug, Clone, Serialize)]
pub enum RelayEvent {
    /// A notification passed the dedup gate and entered the queue.
    NotificationQueued {
        id: u64,
        kind: String,
        dedup_key: String,
    },
    /// A single notification was dismissed.
    NotificationDismissed {
        id: u64,
    },
    /// The whole queue was dismissed at once.
    QueueCleared {
        dismissed: usize,
    },
    /// Realtime channel status transition.
    ChannelStatusChanged {
        status: ChannelStatus,
    },
    /// Live updates are no longer trustworthy.
    ConnectionDegraded {
        reason: String,
    },
    /// Blocking "live updates paused" advisory shown to the user.
    AdvisoryRaised {
        message: String,
    },
    /// The advisory was taken down.
    AdvisoryCleared,
    /// Channel recovered; `full_resync` says whether state was rebuilt from
    /// scratch rather than reconciled incrementally.
    ConnectionRecovered {
        full_resync: bool,
    },
    /// A backfill pass finished.
    CatchupCompleted {
        scanned: usize,
        emitted: usize,
        watermark: DateTime<Utc>,
    },
}

/// Central event bus for broadcasting events to all subscribers.
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RelayEvent) {
        // Ignore error if no subscribers
        let _ = self.tx.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Get current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

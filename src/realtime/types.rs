//! Data types for the realtime change-subscription channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collections the channel delivers change events for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Signals,
    TpUpdates,
    SignalEvents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A raw change notification from the store.
///
/// `record` carries the row's new state; `old_record` the prior state for
/// updates when the server provides it. The engine falls back to its own
/// remembered state when `old_record` is absent or partial.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    pub table: ChangeTable,
    #[serde(rename = "type")]
    pub op: ChangeOp,
    pub record: serde_json::Value,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

/// Health of the realtime subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Connecting,
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl ChannelStatus {
    /// Statuses that mean pushed events can currently be missed.
    pub fn is_degraded(self) -> bool {
        matches!(
            self,
            ChannelStatus::ChannelError | ChannelStatus::TimedOut | ChannelStatus::Closed
        )
    }
}

/// Where an event entered the engine from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Realtime,
    Catchup,
}

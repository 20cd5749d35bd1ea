//! Database row types for all tables.
//!
//! Rows also deserialize from the realtime channel's JSON records, so every
//! struct derives `Deserialize` alongside `FromRow`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle statuses that terminate a signal with a user-facing outcome.
pub const CLOSED_STATUSES: [&str; 3] = ["tp_hit", "sl_hit", "breakeven"];

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SignalRow {
    pub id: Uuid,
    pub pair: String,
    pub direction: String, // 'buy' | 'sell'
    pub category: String,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub status: String,
    pub kind: String, // 'upcoming' | 'signal'
    pub upcoming_status: Option<String>,
    pub tracking_status: Option<String>,
    pub send_updates: bool,
    pub send_closed: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl SignalRow {
    /// Status is one of the alert-worthy terminal outcomes.
    pub fn has_closed_status(&self) -> bool {
        CLOSED_STATUSES.contains(&self.status.as_str())
    }

    /// Terminal for lifecycle purposes, including the statuses that close a
    /// signal without an alert-worthy outcome.
    pub fn is_terminal(&self) -> bool {
        self.has_closed_status() || self.status == "closed" || self.status == "cancelled"
    }

    pub fn has_all_prices(&self) -> bool {
        self.entry_price.is_some() && self.stop_loss.is_some() && self.take_profit.is_some()
    }

    pub fn is_upcoming(&self) -> bool {
        self.kind == "upcoming" || self.status == "upcoming"
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TpUpdateRow {
    pub id: Uuid,
    pub signal_id: Uuid,
    /// Percent of the *remaining* position to close.
    pub close_percent: f64,
    pub target_price: f64,
    pub kind: String, // 'limit' | 'market'
    pub note: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SignalEventRow {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SignalEventRow {
    /// Update id referenced by the payload, if present and well formed.
    pub fn payload_update_id(&self) -> Option<Uuid> {
        self.payload
            .get("update_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserTradeRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub signal_id: Uuid,
    pub risk_percent: f64,
    pub risk_amount: f64,
    pub initial_risk_amount: f64,
    pub remaining_risk_amount: f64,
    pub realized_pnl: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AppliedTpUpdateRow {
    pub id: Uuid,
    pub user_trade_id: Uuid,
    pub tp_update_id: Uuid,
    pub user_id: Uuid,
    pub applied_percent: f64,
    pub realized_pnl: f64,
    pub created_at: DateTime<Utc>,
}

/// Closed-signal outcome joined for a user's equity curve.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ClosedOutcomeRow {
    pub signal_id: Uuid,
    pub direction: String,
    pub status: String,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
}

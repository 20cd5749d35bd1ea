//! Deduplication ledger — at-most-once presentation per logical event.
//!
//! Keys live for the whole session; the ledger is never evicted. A session's
//! distinct event count is small and bounded by admin activity, so this stays
//! cheap.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use uuid::Uuid;

pub struct DedupLedger {
    seen: DashSet<String>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Record a key; returns true only the first time.
    pub fn insert(&self, key: &str) -> bool {
        self.seen.insert(key.to_string())
    }

    pub fn clear(&self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Key builders — one string per logical notification-worthy event.
pub mod keys {
    use super::*;

    pub fn new_signal(signal_id: Uuid) -> String {
        format!("new-signal-{signal_id}")
    }

    pub fn signal_active(signal_id: Uuid) -> String {
        format!("signal-active-{signal_id}")
    }

    pub fn trade_closed(signal_id: Uuid, status: &str) -> String {
        format!("trade-closed-{signal_id}-{status}")
    }

    /// Carries the update timestamp so repeated identical moves do not
    /// re-fire while a genuinely new move does.
    pub fn sl_breakeven(signal_id: Uuid, updated_at: DateTime<Utc>) -> String {
        format!("sl-breakeven-{signal_id}-{}", updated_at.timestamp_millis())
    }

    pub fn trade_update_published(update_id: Uuid) -> String {
        format!("trade-update-{update_id}")
    }

    /// An update can be edited repeatedly; the history row id pins each edit
    /// fact and is stable across live and catch-up delivery.
    pub fn trade_update_edited(update_id: Uuid, event_id: Uuid) -> String {
        format!("trade-update-edited-{update_id}-{event_id}")
    }

    pub fn trade_update_deleted(update_id: Uuid) -> String {
        format!("trade-update-deleted-{update_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_first_wins() {
        let ledger = DedupLedger::new();
        let key = keys::new_signal(Uuid::new_v4());

        assert!(!ledger.contains(&key));
        assert!(ledger.insert(&key));
        assert!(!ledger.insert(&key));
        assert!(ledger.contains(&key));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn clear_resets_session_state() {
        let ledger = DedupLedger::new();
        ledger.insert("trade-closed-x-tp_hit");
        ledger.clear();
        assert!(ledger.is_empty());
        assert!(ledger.insert("trade-closed-x-tp_hit"));
    }
}

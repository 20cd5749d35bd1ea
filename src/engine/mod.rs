//! Notification reconciliation engine.
//!
//! Drives raw change events — live from the realtime channel or replayed by
//! the catch-up coordinator — through classification, enrichment and the
//! dedup gate into the queue. Every failure path degrades to "no
//! notification"; a missed alert is recoverable on the next catch-up pass,
//! a crash is not.

pub mod catchup;
pub mod classifier;
pub mod dedup;
pub mod queue;
pub mod session;
pub mod watermark;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::NotifierConfig;
use crate::db::models::{AppliedTpUpdateRow, SignalEventRow, SignalRow, TpUpdateRow, UserTradeRow};
use crate::db::queries;
use crate::realtime::types::{ChangeEvent, ChangeOp, ChangeTable, EventSource};
use crate::trademath::{reduction, ChainEntry, PositionSnapshot};

use classifier::{Classification, SignalPrior};
use dedup::{keys, DedupLedger};
use queue::{NotificationBody, NotificationQueue, UpdateAction};
use session::SessionCell;
use watermark::WatermarkStore;

/// Whether a replay surfaces notifications or only advances bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    Emitting,
    Silent,
}

/// Per-session reconciliation engine; one instance per subscriber.
pub struct Notifier {
    db: PgPool,
    config: NotifierConfig,
    session: SessionCell,
    dedup: DedupLedger,
    /// Per-signal memory: known-upcoming flag and last seen stop loss.
    memory: DashMap<Uuid, SignalPrior>,
    queue: Arc<NotificationQueue>,
    watermark: Arc<WatermarkStore>,
}

impl Notifier {
    pub fn new(
        db: PgPool,
        config: NotifierConfig,
        session: SessionCell,
        queue: Arc<NotificationQueue>,
        watermark: Arc<WatermarkStore>,
    ) -> Self {
        Self {
            db,
            config,
            session,
            dedup: DedupLedger::new(),
            memory: DashMap::new(),
            queue,
            watermark,
        }
    }

    /// Wire-path entry: parse and dispatch one raw change event.
    pub async fn handle_change(&self, event: &ChangeEvent, source: EventSource, mode: ReplayMode) {
        match event.table {
            ChangeTable::Signals => {
                let Some(row) = parse_record::<SignalRow>(&event.record) else {
                    return;
                };
                // A partial old record falls back to remembered state
                let old: Option<SignalRow> = event
                    .old_record
                    .as_ref()
                    .and_then(|v| serde_json::from_value(v.clone()).ok());
                self.process_signal(event.op, &row, old.as_ref(), source, mode)
                    .await;
            }
            ChangeTable::TpUpdates => {
                if event.op != ChangeOp::Insert {
                    return;
                }
                let Some(row) = parse_record::<TpUpdateRow>(&event.record) else {
                    return;
                };
                self.process_tp_update(&row, source, mode).await;
            }
            ChangeTable::SignalEvents => {
                if event.op != ChangeOp::Insert {
                    return;
                }
                let Some(row) = parse_record::<SignalEventRow>(&event.record) else {
                    return;
                };
                self.process_history_event(&row, source, mode).await;
            }
        }
    }

    /// Classify a signal change and emit whatever it maps to.
    /// Returns true when a notification entered the queue.
    pub async fn process_signal(
        &self,
        op: ChangeOp,
        row: &SignalRow,
        old: Option<&SignalRow>,
        source: EventSource,
        mode: ReplayMode,
    ) -> bool {
        let prior = self
            .memory
            .get(&row.id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let classification = classifier::classify_signal_change(
            op,
            row,
            old,
            &prior,
            source,
            Utc::now(),
            self.freshness_window(),
        );

        let emitted = match &classification {
            Classification::TrackUpcoming | Classification::NoAction => false,
            Classification::NewSignal => self.offer(
                mode,
                keys::new_signal(row.id),
                NotificationBody::NewSignal {
                    signal: row.clone(),
                },
            ),
            Classification::SignalActivated => {
                // Defensive duplicate guard: a publish alert for the same id
                // must win over the activation alert
                if self.dedup.contains(&keys::new_signal(row.id)) {
                    false
                } else {
                    self.offer(
                        mode,
                        keys::signal_active(row.id),
                        NotificationBody::SignalActive {
                            signal: row.clone(),
                        },
                    )
                }
            }
            Classification::TradeClosed { status } => {
                let key = keys::trade_closed(row.id, status);
                if self.dedup.contains(&key) {
                    false
                } else {
                    let trade = match queries::get_user_trade(
                        &self.db,
                        self.session.user_id(),
                        row.id,
                    )
                    .await
                    {
                        Ok(trade) => trade,
                        Err(e) => {
                            warn!(error = %e, signal_id = %row.id, "trade lookup failed");
                            None
                        }
                    };
                    self.offer(
                        mode,
                        key,
                        NotificationBody::TradeClosed {
                            signal: row.clone(),
                            status: status.clone(),
                            trade,
                        },
                    )
                }
            }
            Classification::StopMovedToBreakeven => self.offer(
                mode,
                keys::sl_breakeven(row.id, row.updated_at),
                NotificationBody::SlBreakeven {
                    signal: row.clone(),
                    stop_loss: row.stop_loss.unwrap_or_default(),
                },
            ),
        };

        // Remember state for future comparisons regardless of outcome
        {
            let mut entry = self.memory.entry(row.id).or_default();
            if classification == Classification::TrackUpcoming {
                entry.known_upcoming = true;
            }
            entry.last_stop_loss = row.stop_loss;
        }

        self.note_processed(row.updated_at.max(row.created_at));
        emitted
    }

    /// A published partial-close instruction. Only becomes a notification if
    /// it actually applied to this user's position.
    pub async fn process_tp_update(
        &self,
        row: &TpUpdateRow,
        source: EventSource,
        mode: ReplayMode,
    ) -> bool {
        if source == EventSource::Realtime
            && Utc::now() - row.created_at > self.freshness_window()
        {
            debug!(update_id = %row.id, "stale live tp update suppressed");
            self.note_processed(row.created_at);
            return false;
        }

        let key = keys::trade_update_published(row.id);
        if self.dedup.contains(&key) {
            self.note_processed(row.created_at);
            return false;
        }

        let signal = match queries::get_signal(&self.db, row.signal_id).await {
            Ok(Some(signal)) => signal,
            Ok(None) => {
                debug!(update_id = %row.id, signal_id = %row.signal_id, "parent signal missing");
                self.note_processed(row.created_at);
                return false;
            }
            Err(e) => {
                warn!(error = %e, update_id = %row.id, "parent signal lookup failed");
                return false;
            }
        };

        if !self.session.category_allowed(&signal.category) {
            self.note_processed(row.created_at);
            return false;
        }

        let trade = match queries::get_user_trade(&self.db, self.session.user_id(), signal.id).await
        {
            Ok(Some(trade)) => trade,
            Ok(None) => {
                // The user never took this signal
                self.note_processed(row.created_at);
                return false;
            }
            Err(e) => {
                warn!(error = %e, update_id = %row.id, "trade lookup failed");
                return false;
            }
        };

        let Some(applied) = self.lookup_applied_with_retry(trade.id, row.id).await else {
            // Never applied to this position (already flat, or superseded)
            self.note_processed(row.created_at);
            return false;
        };

        let order_kind = self.resolve_display_kind(row).await;
        let fill_price = self.lookup_fill_price(row.id).await;
        let position = self.position_snapshot(&trade, row.id).await;

        let emitted = self.offer(
            mode,
            key,
            NotificationBody::TradeUpdate {
                action: UpdateAction::Published,
                signal,
                update_id: row.id,
                close_percent: Some(applied.applied_percent),
                target_price: Some(row.target_price),
                order_kind: Some(order_kind),
                fill_price,
                position,
                note: row.note.clone(),
                previous: None,
                current: None,
            },
        );
        self.note_processed(row.created_at);
        emitted
    }

    /// Append-only history facts: edits and deletions of pending updates.
    pub async fn process_history_event(
        &self,
        row: &SignalEventRow,
        _source: EventSource,
        mode: ReplayMode,
    ) -> bool {
        let Some(update_id) = row.payload_update_id() else {
            debug!(event_id = %row.id, "history payload missing update id");
            self.note_processed(row.created_at);
            return false;
        };

        let (action, key) = match row.event_type.as_str() {
            "tp_update_edited" => (
                UpdateAction::Edited,
                keys::trade_update_edited(update_id, row.id),
            ),
            "tp_update_deleted" => (
                UpdateAction::Deleted,
                keys::trade_update_deleted(update_id),
            ),
            _ => {
                self.note_processed(row.created_at);
                return false;
            }
        };
        if self.dedup.contains(&key) {
            self.note_processed(row.created_at);
            return false;
        }

        let signal = match queries::get_signal(&self.db, row.signal_id).await {
            Ok(Some(signal)) => signal,
            Ok(None) => {
                debug!(event_id = %row.id, "signal for history event missing");
                self.note_processed(row.created_at);
                return false;
            }
            Err(e) => {
                warn!(error = %e, event_id = %row.id, "signal lookup failed");
                return false;
            }
        };

        if !self.session.category_allowed(&signal.category) {
            self.note_processed(row.created_at);
            return false;
        }

        match queries::get_user_trade(&self.db, self.session.user_id(), signal.id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.note_processed(row.created_at);
                return false;
            }
            Err(e) => {
                warn!(error = %e, event_id = %row.id, "trade lookup failed");
                return false;
            }
        }

        // Market-order changes fill immediately and are not user-actionable;
        // only limit-order edits and deletions surface
        let order_kind = self.resolve_history_kind(row, update_id).await;
        if order_kind.as_deref() != Some("limit") {
            self.note_processed(row.created_at);
            return false;
        }

        let previous = row.payload.get("old").cloned();
        let current = row.payload.get("new").cloned();

        let emitted = self.offer(
            mode,
            key,
            NotificationBody::TradeUpdate {
                action,
                signal,
                update_id,
                close_percent: None,
                target_price: None,
                order_kind,
                fill_price: None,
                position: None,
                note: None,
                previous,
                current,
            },
        );
        self.note_processed(row.created_at);
        emitted
    }

    /// Drop all session-local state so a silent pass can rebuild it from the
    /// store. Used by the full-resync recovery path.
    pub fn reset(&self) {
        self.dedup.clear();
        self.memory.clear();
        self.queue.dismiss_all();
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }

    pub fn watermark_ref(&self) -> &WatermarkStore {
        &self.watermark
    }

    // ── Enrichment lookups ───────────────────────────────────────

    /// The applied-join row is written asynchronously after the update row;
    /// poll a bounded number of times, then treat absence as "not applicable".
    async fn lookup_applied_with_retry(
        &self,
        trade_id: Uuid,
        update_id: Uuid,
    ) -> Option<AppliedTpUpdateRow> {
        let attempts = self.config.applied_lookup_attempts.max(1);
        for attempt in 0..attempts {
            match queries::get_applied_update(&self.db, trade_id, update_id).await {
                Ok(Some(row)) => return Some(row),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, %update_id, "applied-update lookup failed");
                    return None;
                }
            }
            if attempt + 1 < attempts {
                sleep(std::time::Duration::from_millis(
                    self.config.applied_lookup_delay_ms,
                ))
                .await;
            }
        }
        debug!(%update_id, "update never applied to this user");
        None
    }

    /// The raw update row's kind can be ambiguous on legacy rows; the
    /// publication history fact carries the kind the author actually chose.
    async fn resolve_display_kind(&self, row: &TpUpdateRow) -> String {
        match queries::events_for_update(&self.db, "tp_update_published", row.id).await {
            Ok(events) => events
                .iter()
                .find_map(|ev| ev.payload.get("kind").and_then(|v| v.as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| row.kind.clone()),
            Err(e) => {
                warn!(error = %e, update_id = %row.id, "order-kind lookup failed");
                row.kind.clone()
            }
        }
    }

    /// Kind for an edited/deleted update: payload first, then the publication
    /// fact, then the update row itself (still present for edits).
    async fn resolve_history_kind(&self, row: &SignalEventRow, update_id: Uuid) -> Option<String> {
        if let Some(kind) = row.payload.get("kind").and_then(|v| v.as_str()) {
            return Some(kind.to_string());
        }
        match queries::events_for_update(&self.db, "tp_update_published", update_id).await {
            Ok(events) => {
                if let Some(kind) = events
                    .iter()
                    .find_map(|ev| ev.payload.get("kind").and_then(|v| v.as_str()))
                {
                    return Some(kind.to_string());
                }
            }
            Err(e) => {
                warn!(error = %e, %update_id, "order-kind lookup failed");
            }
        }
        match queries::get_tp_update(&self.db, update_id).await {
            Ok(Some(update)) => Some(update.kind),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, %update_id, "update row lookup failed");
                None
            }
        }
    }

    /// Earliest fill price recorded for the update, if it triggered.
    async fn lookup_fill_price(&self, update_id: Uuid) -> Option<f64> {
        match queries::events_for_update(&self.db, "tp_update_triggered", update_id).await {
            Ok(events) => events
                .iter()
                .find_map(|ev| ev.payload.get("price").and_then(|v| v.as_f64())),
            Err(e) => {
                warn!(error = %e, %update_id, "fill-price lookup failed");
                None
            }
        }
    }

    /// Remaining position as of the given update, from the signal's full
    /// chain annotated with this user's applied records.
    async fn position_snapshot(
        &self,
        trade: &UserTradeRow,
        update_id: Uuid,
    ) -> Option<PositionSnapshot> {
        let updates = match queries::tp_updates_for_signal(&self.db, trade.signal_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, signal_id = %trade.signal_id, "update chain lookup failed");
                return None;
            }
        };
        let applied = match queries::applied_updates_for_trade(&self.db, trade.id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, trade_id = %trade.id, "applied chain lookup failed");
                return None;
            }
        };

        let applied_by_update: HashMap<Uuid, f64> = applied
            .iter()
            .map(|a| (a.tp_update_id, a.applied_percent))
            .collect();
        let chain: Vec<ChainEntry> = updates
            .iter()
            .map(|u| ChainEntry {
                update_id: u.id,
                applied_percent: applied_by_update.get(&u.id).copied(),
            })
            .collect();

        reduction::remaining_after(trade.initial_risk_amount, &chain, update_id)
    }

    // ── Gate ─────────────────────────────────────────────────────

    /// Dedup gate in front of the queue. Silent mode records the key without
    /// emitting: a silently scanned event is processed and must not resurface
    /// as a popup on a later overlapping pass.
    fn offer(&self, mode: ReplayMode, key: String, body: NotificationBody) -> bool {
        if mode == ReplayMode::Silent {
            self.dedup.insert(&key);
            return false;
        }
        if !self.session.can_notify() {
            // Key stays unrecorded so a later pass can still deliver it
            return false;
        }
        if !self.dedup.insert(&key) {
            return false;
        }
        self.queue.push(key, body);
        true
    }

    fn note_processed(&self, ts: DateTime<Utc>) {
        if self.watermark.advance(ts) {
            self.watermark.persist_logged();
        }
    }

    fn freshness_window(&self) -> Duration {
        Duration::seconds(self.config.freshness_window_secs as i64)
    }
}

fn parse_record<T: DeserializeOwned>(value: &serde_json::Value) -> Option<T> {
    match serde_json::from_value(value.clone()) {
        Ok(row) => Some(row),
        Err(e) => {
            debug!(error = %e, "malformed change record skipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::session::SessionState;
    use crate::events::bus::EventBus;
    use std::path::PathBuf;

    fn temp_state_dir() -> PathBuf {
        std::env::temp_dir().join(format!("signal-relay-test-{}", Uuid::new_v4()))
    }

    fn notifier() -> Notifier {
        let db = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let session = SessionCell::new(SessionState {
            user_id: Uuid::new_v4(),
            can_notify: true,
            allowed_categories: vec![],
        });
        let queue = Arc::new(NotificationQueue::new(Arc::new(EventBus::new(64))));
        let (watermark, _) = WatermarkStore::load(
            &temp_state_dir(),
            Uuid::new_v4(),
            Duration::minutes(10),
            Utc::now(),
        );
        Notifier::new(
            db,
            NotifierConfig {
                freshness_window_secs: 300,
                applied_lookup_attempts: 3,
                applied_lookup_delay_ms: 1,
            },
            session,
            queue,
            Arc::new(watermark),
        )
    }

    fn published_signal() -> SignalRow {
        let now = Utc::now();
        SignalRow {
            id: Uuid::new_v4(),
            pair: "GBPUSD".into(),
            direction: "buy".into(),
            category: "forex".into(),
            entry_price: Some(1.2700),
            stop_loss: Some(1.2650),
            take_profit: Some(1.2800),
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

    #[tokio::test]
    async fn same_event_live_then_catchup_yields_one_notification() {
        let notifier = notifier();
        let row = published_signal();

        let first = notifier
            .process_signal(
                ChangeOp::Insert,
                &row,
                None,
                EventSource::Realtime,
                ReplayMode::Emitting,
            )
            .await;
        let second = notifier
            .process_signal(
                ChangeOp::Insert,
                &row,
                None,
                EventSource::Catchup,
                ReplayMode::Emitting,
            )
            .await;

        assert!(first);
        assert!(!second);
        assert_eq!(notifier.queue.len(), 1);
    }

    #[tokio::test]
    async fn silent_replay_marks_without_emitting() {
        let notifier = notifier();
        let row = published_signal();

        let emitted = notifier
            .process_signal(
                ChangeOp::Insert,
                &row,
                None,
                EventSource::Catchup,
                ReplayMode::Silent,
            )
            .await;
        assert!(!emitted);
        assert!(notifier.queue.is_empty());

        // the silently scanned event must not resurface as a popup
        let replayed = notifier
            .process_signal(
                ChangeOp::Insert,
                &row,
                None,
                EventSource::Catchup,
                ReplayMode::Emitting,
            )
            .await;
        assert!(!replayed);
        assert!(notifier.queue.is_empty());
    }

    #[tokio::test]
    async fn ineligible_session_defers_instead_of_consuming_the_key() {
        let notifier = notifier();
        let row = published_signal();

        notifier.session.set_can_notify(false);
        let while_disabled = notifier
            .process_signal(
                ChangeOp::Insert,
                &row,
                None,
                EventSource::Realtime,
                ReplayMode::Emitting,
            )
            .await;
        assert!(!while_disabled);
        assert!(notifier.queue.is_empty());

        notifier.session.set_can_notify(true);
        let after_enable = notifier
            .process_signal(
                ChangeOp::Insert,
                &row,
                None,
                EventSource::Catchup,
                ReplayMode::Emitting,
            )
            .await;
        assert!(after_enable);
        assert_eq!(notifier.queue.len(), 1);
    }

    #[tokio::test]
    async fn processing_advances_the_watermark_monotonically() {
        let notifier = notifier();
        let mut newer = published_signal();
        newer.created_at = Utc::now();
        newer.updated_at = newer.created_at;

        let mut older = published_signal();
        older.created_at = newer.created_at - Duration::seconds(30);
        older.updated_at = older.created_at;

        notifier
            .process_signal(
                ChangeOp::Insert,
                &newer,
                None,
                EventSource::Catchup,
                ReplayMode::Silent,
            )
            .await;
        let after_newer = notifier.watermark.current();

        notifier
            .process_signal(
                ChangeOp::Insert,
                &older,
                None,
                EventSource::Catchup,
                ReplayMode::Silent,
            )
            .await;
        assert_eq!(notifier.watermark.current(), after_newer);
    }

    #[tokio::test]
    async fn conversion_of_tracked_upcoming_emits_activation_once() {
        let notifier = notifier();
        let mut row = published_signal();
        row.kind = "upcoming".into();
        row.status = "upcoming".into();

        notifier
            .process_signal(
                ChangeOp::Insert,
                &row,
                None,
                EventSource::Realtime,
                ReplayMode::Emitting,
            )
            .await;
        assert!(notifier.queue.is_empty());

        let mut converted = row.clone();
        converted.kind = "signal".into();
        converted.status = "active".into();
        converted.updated_at = Utc::now();

        let emitted = notifier
            .process_signal(
                ChangeOp::Update,
                &converted,
                Some(&row),
                EventSource::Realtime,
                ReplayMode::Emitting,
            )
            .await;
        assert!(emitted);

        let pending = notifier.queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body.kind(), "signal_active");
    }

    #[tokio::test]
    async fn reset_clears_session_state_for_full_resync() {
        let notifier = notifier();
        let row = published_signal();

        notifier
            .process_signal(
                ChangeOp::Insert,
                &row,
                None,
                EventSource::Realtime,
                ReplayMode::Emitting,
            )
            .await;
        assert_eq!(notifier.queue.len(), 1);
        assert_eq!(notifier.dedup_len(), 1);

        notifier.reset();
        assert!(notifier.queue.is_empty());
        assert_eq!(notifier.dedup_len(), 0);
    }
}

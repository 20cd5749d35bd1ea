//! Signal-change classification — the per-signal state machine.
//!
//! One pure entry point decides which user-facing alert, if any, a raw signal
//! change maps to. "No notification" is an explicit outcome, not a
//! fallthrough, so every branch is independently testable. Enrichment and
//! deduplication happen in the driver; this module only looks at the row, the
//! prior per-signal memory and the clock.

use chrono::{DateTime, Duration, Utc};

use crate::db::models::SignalRow;
use crate::realtime::types::{ChangeOp, EventSource};

/// Stop-loss vs entry comparisons tolerate this much float noise.
pub const STOP_EQ_TOLERANCE: f64 = 1e-8;

/// What the engine remembers about a signal between events.
#[derive(Debug, Clone, Default)]
pub struct SignalPrior {
    /// The id was seen as an upcoming placeholder, so a later activation is a
    /// conversion rather than a brand-new publish.
    pub known_upcoming: bool,
    /// Last stop-loss value, for break-even detection when the change payload
    /// carries no prior state.
    pub last_stop_loss: Option<f64>,
}

/// Outcome of classifying one signal change.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Signal reached a terminal outcome the user must hear about.
    TradeClosed { status: String },
    /// A brand-new published signal (direct publish, or a conversion the
    /// engine never saw as upcoming).
    NewSignal,
    /// A tracked upcoming placeholder converted to a live signal.
    SignalActivated,
    /// Stop loss moved onto the entry price.
    StopMovedToBreakeven,
    /// Remember the id as a known upcoming placeholder; nothing to show.
    TrackUpcoming,
    /// Nothing user-facing; the driver still refreshes remembered state.
    NoAction,
}

/// Classify a raw signal insert/update against prior memory.
///
/// Decision rules apply in priority order; the first match wins.
pub fn classify_signal_change(
    op: ChangeOp,
    new: &SignalRow,
    old: Option<&SignalRow>,
    prior: &SignalPrior,
    source: EventSource,
    now: DateTime<Utc>,
    freshness_window: Duration,
) -> Classification {
    match op {
        ChangeOp::Insert => classify_insert(new, source, now, freshness_window),
        ChangeOp::Update => classify_update(new, old, prior),
        // Row deletions are not part of the notification contract
        ChangeOp::Delete => Classification::NoAction,
    }
}

fn classify_insert(
    new: &SignalRow,
    source: EventSource,
    now: DateTime<Utc>,
    freshness_window: Duration,
) -> Classification {
    if new.is_upcoming() {
        return Classification::TrackUpcoming;
    }
    if new.kind == "signal" {
        // Stale rows arriving live are reconnect replay noise; the same row
        // coming through catch-up is a deliberate backfill and always counts.
        if source == EventSource::Catchup || now - new.created_at <= freshness_window {
            return Classification::NewSignal;
        }
        return Classification::NoAction;
    }
    Classification::NoAction
}

fn classify_update(new: &SignalRow, old: Option<&SignalRow>, prior: &SignalPrior) -> Classification {
    // 1. Terminal outcome, fired once per signal
    if new.has_closed_status() {
        let prev_closed = old.map(SignalRow::has_closed_status).unwrap_or(false);
        if !prev_closed {
            return Classification::TradeClosed {
                status: new.status.clone(),
            };
        }
        return Classification::NoAction;
    }

    // A row still in its upcoming phase only refreshes tracking; catch-up
    // replays such rows as updates when they were created before the watermark
    if new.is_upcoming() {
        return Classification::TrackUpcoming;
    }

    // 2. Activation: upcoming placeholder became a live signal
    if new.has_all_prices() && !new.is_terminal() && new.kind == "signal" {
        let kind_flipped = old.map(|o| o.kind == "upcoming").unwrap_or(false);
        let status_flipped =
            new.status == "active" && old.map(|o| o.status == "upcoming").unwrap_or(false);
        let remembered_conversion = prior.known_upcoming && new.status == "active";

        if kind_flipped || status_flipped || remembered_conversion {
            // A direct publish was never tracked as upcoming; announcing it as
            // "activated" would double-notify alongside the publish itself.
            if !prior.known_upcoming {
                return Classification::NewSignal;
            }
            return Classification::SignalActivated;
        }
    }

    // 3. Stop loss moved onto entry
    if let (Some(entry), Some(stop)) = (new.entry_price, new.stop_loss) {
        if (stop - entry).abs() <= STOP_EQ_TOLERANCE {
            let tracking_transition = new.tracking_status.as_deref() == Some("breakeven_moved")
                && old
                    .map(|o| o.tracking_status.as_deref() != Some("breakeven_moved"))
                    .unwrap_or(false);
            let prev_stop = old.and_then(|o| o.stop_loss).or(prior.last_stop_loss);
            let stop_moved = prev_stop
                .map(|p| (p - entry).abs() > STOP_EQ_TOLERANCE)
                .unwrap_or(false);
            if tracking_transition || stop_moved {
                return Classification::StopMovedToBreakeven;
            }
        }
    }

    // 4. Nothing user-facing; the driver remembers the new stop loss
    Classification::NoAction
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn signal(kind: &str, status: &str) -> SignalRow {
        let now = Utc::now();
        SignalRow {
            id: Uuid::new_v4(),
            pair: "EURUSD".into(),
            direction: "buy".into(),
            category: "forex".into(),
            entry_price: Some(1.2050),
            stop_loss: Some(1.2000),
            take_profit: Some(1.2150),
            status: status.into(),
            kind: kind.into(),
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

    fn window() -> Duration {
        Duration::seconds(300)
    }

    #[test]
    fn fresh_published_insert_is_new_signal() {
        let row = signal("signal", "active");
        let got = classify_signal_change(
            ChangeOp::Insert,
            &row,
            None,
            &SignalPrior::default(),
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(got, Classification::NewSignal);
    }

    #[test]
    fn stale_live_insert_is_suppressed_but_catchup_is_not() {
        let mut row = signal("signal", "active");
        row.created_at = Utc::now() - Duration::minutes(20);

        let live = classify_signal_change(
            ChangeOp::Insert,
            &row,
            None,
            &SignalPrior::default(),
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(live, Classification::NoAction);

        let replayed = classify_signal_change(
            ChangeOp::Insert,
            &row,
            None,
            &SignalPrior::default(),
            EventSource::Catchup,
            Utc::now(),
            window(),
        );
        assert_eq!(replayed, Classification::NewSignal);
    }

    #[test]
    fn upcoming_insert_is_tracked_silently() {
        let row = signal("upcoming", "upcoming");
        let got = classify_signal_change(
            ChangeOp::Insert,
            &row,
            None,
            &SignalPrior::default(),
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(got, Classification::TrackUpcoming);
    }

    #[test]
    fn untracked_conversion_is_new_signal_not_activation() {
        let old = signal("upcoming", "upcoming");
        let mut new = old.clone();
        new.kind = "signal".into();
        new.status = "active".into();

        let got = classify_signal_change(
            ChangeOp::Update,
            &new,
            Some(&old),
            &SignalPrior::default(),
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(got, Classification::NewSignal);
    }

    #[test]
    fn tracked_conversion_is_activation() {
        let old = signal("upcoming", "upcoming");
        let mut new = old.clone();
        new.kind = "signal".into();
        new.status = "active".into();

        let prior = SignalPrior {
            known_upcoming: true,
            last_stop_loss: None,
        };
        let got = classify_signal_change(
            ChangeOp::Update,
            &new,
            Some(&old),
            &prior,
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(got, Classification::SignalActivated);
    }

    #[test]
    fn tracked_conversion_detected_from_memory_without_old_record() {
        let mut new = signal("signal", "active");
        new.status = "active".into();

        let prior = SignalPrior {
            known_upcoming: true,
            last_stop_loss: None,
        };
        let got = classify_signal_change(
            ChangeOp::Update,
            &new,
            None,
            &prior,
            EventSource::Catchup,
            Utc::now(),
            window(),
        );
        assert_eq!(got, Classification::SignalActivated);
    }

    #[test]
    fn close_transition_fires_and_beats_activation() {
        let old = signal("upcoming", "active");
        let mut new = old.clone();
        new.kind = "signal".into();
        new.status = "tp_hit".into();

        let got = classify_signal_change(
            ChangeOp::Update,
            &new,
            Some(&old),
            &SignalPrior::default(),
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(
            got,
            Classification::TradeClosed {
                status: "tp_hit".into()
            }
        );
    }

    #[test]
    fn already_closed_signal_does_not_refire() {
        let old = signal("signal", "sl_hit");
        let mut new = old.clone();
        new.tracking_status = Some("archived".into());

        let got = classify_signal_change(
            ChangeOp::Update,
            &new,
            Some(&old),
            &SignalPrior::default(),
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(got, Classification::NoAction);
    }

    #[test]
    fn stop_moving_onto_entry_fires_once() {
        let old = signal("signal", "active");
        let mut new = old.clone();
        new.stop_loss = new.entry_price;

        let got = classify_signal_change(
            ChangeOp::Update,
            &new,
            Some(&old),
            &SignalPrior::default(),
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(got, Classification::StopMovedToBreakeven);

        // duplicate delivery of the same move: prior stop already equals entry
        let prior = SignalPrior {
            known_upcoming: false,
            last_stop_loss: new.stop_loss,
        };
        let repeat = classify_signal_change(
            ChangeOp::Update,
            &new,
            Some(&new.clone()),
            &prior,
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(repeat, Classification::NoAction);
    }

    #[test]
    fn breakeven_detected_via_tracking_status_transition() {
        let mut old = signal("signal", "active");
        old.stop_loss = old.entry_price;
        let mut new = old.clone();
        new.tracking_status = Some("breakeven_moved".into());

        // remembered stop already equals entry, so only the tracking-status
        // transition can carry the detection
        let prior = SignalPrior {
            known_upcoming: false,
            last_stop_loss: old.stop_loss,
        };
        let got = classify_signal_change(
            ChangeOp::Update,
            &new,
            Some(&old),
            &prior,
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(got, Classification::StopMovedToBreakeven);
    }

    #[test]
    fn plain_update_is_no_action() {
        let old = signal("signal", "active");
        let mut new = old.clone();
        new.upcoming_status = Some("near_entry".into());

        let got = classify_signal_change(
            ChangeOp::Update,
            &new,
            Some(&old),
            &SignalPrior::default(),
            EventSource::Realtime,
            Utc::now(),
            window(),
        );
        assert_eq!(got, Classification::NoAction);
    }
}

//! Per-user processed-up-to watermark, persisted across sessions.
//!
//! A single timestamp meaning "everything at or before this time has been
//! processed". It only ever moves forward; interleaved live and catch-up
//! paths both advance it with monotonic-max semantics.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

pub struct WatermarkStore {
    path: PathBuf,
    current: RwLock<DateTime<Utc>>,
}

impl WatermarkStore {
    /// Load the stored watermark for a user, or default to `now - lookback`.
    ///
    /// Defaulting to a bounded lookback instead of the beginning of time caps
    /// the first backfill; very old unacknowledged events are deliberately
    /// not resurfaced. The second return value says whether a prior watermark
    /// existed.
    pub fn load(
        state_dir: &Path,
        user_id: Uuid,
        initial_lookback: Duration,
        now: DateTime<Utc>,
    ) -> (Self, bool) {
        let path = state_dir.join(format!("notifications-last-sync-{user_id}"));

        let stored = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|ts| ts.with_timezone(&Utc));

        match stored {
            Some(ts) => {
                debug!(watermark = %ts, "loaded stored watermark");
                (
                    Self {
                        path,
                        current: RwLock::new(ts),
                    },
                    true,
                )
            }
            None => {
                let fallback = now - initial_lookback;
                debug!(watermark = %fallback, "no stored watermark, starting from lookback");
                (
                    Self {
                        path,
                        current: RwLock::new(fallback),
                    },
                    false,
                )
            }
        }
    }

    pub fn current(&self) -> DateTime<Utc> {
        *self.current.read()
    }

    /// Monotonic-max advance. Returns true when the watermark actually moved.
    pub fn advance(&self, ts: DateTime<Utc>) -> bool {
        let mut current = self.current.write();
        if ts > *current {
            *current = ts;
            true
        } else {
            false
        }
    }

    /// Write the current watermark to its per-user key file.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let value = self.current().to_rfc3339();
        fs::write(&self.path, value)?;
        Ok(())
    }

    /// Persist, downgrading failure to a log line. Durable storage being
    /// briefly unavailable must not abort event processing.
    pub fn persist_logged(&self) {
        if let Err(e) = self.persist() {
            warn!(error = %e, path = %self.path.display(), "failed to persist watermark");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_state_dir() -> PathBuf {
        std::env::temp_dir().join(format!("signal-relay-test-{}", Uuid::new_v4()))
    }

    #[test]
    fn missing_file_defaults_to_lookback() {
        let now = Utc::now();
        let (store, had_prior) =
            WatermarkStore::load(&temp_state_dir(), Uuid::new_v4(), Duration::minutes(10), now);
        assert!(!had_prior);
        assert_eq!(store.current(), now - Duration::minutes(10));
    }

    #[test]
    fn advance_is_monotonic_regardless_of_arrival_order() {
        let now = Utc::now();
        let (store, _) =
            WatermarkStore::load(&temp_state_dir(), Uuid::new_v4(), Duration::minutes(10), now);

        let t1 = now + Duration::seconds(10);
        let t2 = now + Duration::seconds(30);

        assert!(store.advance(t2));
        // out-of-order older row must not regress the watermark
        assert!(!store.advance(t1));
        assert_eq!(store.current(), t2);
        // and neither must an exact repeat
        assert!(!store.advance(t2));
        assert_eq!(store.current(), t2);
    }

    #[test]
    fn persist_then_reload_round_trips() {
        let dir = temp_state_dir();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let (store, _) = WatermarkStore::load(&dir, user, Duration::minutes(10), now);
        let advanced = now + Duration::seconds(42);
        store.advance(advanced);
        store.persist().unwrap();

        let (reloaded, had_prior) = WatermarkStore::load(&dir, user, Duration::minutes(10), now);
        assert!(had_prior);
        // RFC-3339 keeps sub-second precision, so the round trip is exact
        assert_eq!(reloaded.current(), advanced);

        let _ = fs::remove_dir_all(&dir);
    }
}

//! Remaining-risk fold for partially closed positions.
//!
//! Each take-profit update closes a percentage of the position *remaining* at
//! that point, not of the original size. Updates that never applied to this
//! user (unfilled, or the position was already flat) are skipped without
//! resetting the running total.

use serde::Serialize;
use uuid::Uuid;

/// One link of a signal's update chain, annotated with the percent actually
/// applied to this user's position (`None` when no applied record exists).
#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub update_id: Uuid,
    pub applied_percent: Option<f64>,
}

/// Remaining position after folding the chain up to a target update.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PositionSnapshot {
    pub remaining_risk: f64,
    pub remaining_percent: f64,
}

/// Fold the chain in creation order up to and including `target`.
///
/// Returns `None` when the target update is never reached (superseded, or not
/// part of this chain) or the initial risk is not positive.
pub fn remaining_after(
    initial_risk: f64,
    chain: &[ChainEntry],
    target: Uuid,
) -> Option<PositionSnapshot> {
    if initial_risk <= 0.0 {
        return None;
    }

    let mut remaining = initial_risk;
    for entry in chain {
        if let Some(percent) = entry.applied_percent {
            if percent >= 100.0 {
                remaining = 0.0;
            } else {
                remaining -= remaining * (percent / 100.0);
            }
            remaining = remaining.max(0.0);
        }
        if entry.update_id == target {
            return Some(PositionSnapshot {
                remaining_risk: remaining,
                remaining_percent: remaining / initial_risk * 100.0,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(id: Uuid, percent: f64) -> ChainEntry {
        ChainEntry {
            update_id: id,
            applied_percent: Some(percent),
        }
    }

    #[test]
    fn successive_halves_reach_zero_without_going_negative() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chain = vec![applied(a, 50.0), applied(b, 50.0), applied(c, 10.0)];

        let snap = remaining_after(100.0, &chain, a).unwrap();
        assert!((snap.remaining_risk - 50.0).abs() < 1e-9);
        assert!((snap.remaining_percent - 50.0).abs() < 1e-9);

        let snap = remaining_after(100.0, &chain, b).unwrap();
        // 50% of remaining 50 → 25, not zero
        assert!((snap.remaining_risk - 25.0).abs() < 1e-9);

        let snap = remaining_after(100.0, &chain, c).unwrap();
        assert!(snap.remaining_risk >= 0.0);
        assert!((snap.remaining_risk - 22.5).abs() < 1e-9);
    }

    #[test]
    fn full_close_forces_exact_zero_and_floors_after() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let chain = vec![applied(a, 100.0), applied(b, 10.0)];

        let snap = remaining_after(100.0, &chain, a).unwrap();
        assert_eq!(snap.remaining_risk, 0.0);

        // further closes after flat stay at exactly zero
        let snap = remaining_after(100.0, &chain, b).unwrap();
        assert_eq!(snap.remaining_risk, 0.0);
        assert_eq!(snap.remaining_percent, 0.0);
    }

    #[test]
    fn unapplied_links_are_skipped_without_reset() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chain = vec![
            applied(a, 50.0),
            ChainEntry {
                update_id: b,
                applied_percent: None,
            },
            applied(c, 50.0),
        ];

        let snap = remaining_after(100.0, &chain, c).unwrap();
        assert!((snap.remaining_risk - 25.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_target_or_bad_initial_risk_is_none() {
        let a = Uuid::new_v4();
        let chain = vec![applied(a, 50.0)];

        assert!(remaining_after(100.0, &chain, Uuid::new_v4()).is_none());
        assert!(remaining_after(0.0, &chain, a).is_none());
        assert!(remaining_after(-10.0, &chain, a).is_none());
    }
}

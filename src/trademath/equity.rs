//! Running-balance equity simulation over closed trade outcomes.
//!
//! The same walk feeds the dashboard curve and any notification payload that
//! quotes drawdown or health figures, so both must go through these functions
//! rather than re-deriving the numbers.
//!
//! Recurrence, with risk fraction `r` and reward multiple `R`:
//!   tp_hit:    balance += balance * r * R
//!   sl_hit:    balance -= balance * r
//!   breakeven: balance unchanged

use serde::Serialize;

/// Terminal outcome of a closed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    TpHit,
    SlHit,
    Breakeven,
}

impl OutcomeKind {
    pub fn from_status(status: &str) -> Option<Self> {
        match status {
            "tp_hit" => Some(OutcomeKind::TpHit),
            "sl_hit" => Some(OutcomeKind::SlHit),
            "breakeven" => Some(OutcomeKind::Breakeven),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    pub fn from_str(direction: &str) -> Option<Self> {
        match direction {
            "buy" => Some(TradeDirection::Buy),
            "sell" => Some(TradeDirection::Sell),
            _ => None,
        }
    }
}

/// One closed event in the equity walk.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClosedOutcome {
    pub kind: OutcomeKind,
    pub reward_multiple: f64,
}

impl ClosedOutcome {
    /// Build an outcome from raw signal fields. `None` when the status is not
    /// terminal or the direction is unrecognized.
    pub fn from_parts(
        direction: &str,
        status: &str,
        entry: Option<f64>,
        stop: Option<f64>,
        take_profit: Option<f64>,
    ) -> Option<Self> {
        let kind = OutcomeKind::from_status(status)?;
        let direction = TradeDirection::from_str(direction)?;
        let reward_multiple = match (entry, stop, take_profit) {
            (Some(e), Some(s), Some(tp)) => reward_multiple(direction, e, s, tp),
            _ => 1.0,
        };
        Some(Self {
            kind,
            reward_multiple,
        })
    }
}

/// Reward distance over risk distance for a trade.
///
/// Falls back to `1.0` when the stop distance is zero; publishable signals
/// should never carry `entry == stop_loss`, but a malformed row must not
/// produce a division by zero here.
pub fn reward_multiple(direction: TradeDirection, entry: f64, stop: f64, take_profit: f64) -> f64 {
    let (reward, risk) = match direction {
        TradeDirection::Buy => ((take_profit - entry).abs(), (entry - stop).abs()),
        TradeDirection::Sell => ((entry - take_profit).abs(), (stop - entry).abs()),
    };
    if risk < 1e-12 {
        return 1.0;
    }
    reward / risk
}

/// Result of walking the recurrence over an outcome sequence.
#[derive(Debug, Clone, Serialize)]
pub struct EquityWalk {
    /// Balance after each closed event, in order.
    pub balances: Vec<f64>,
    pub final_balance: f64,
    pub peak_balance: f64,
    pub current_drawdown_pct: f64,
    pub max_drawdown_pct: f64,
    /// Losing streak counting backward from the latest closed event.
    pub consecutive_losses: usize,
}

/// Walk the recurrence over chronologically ordered closed outcomes.
pub fn simulate(starting_balance: f64, risk_fraction: f64, outcomes: &[ClosedOutcome]) -> EquityWalk {
    let mut balance = starting_balance;
    let mut peak = starting_balance;
    let mut max_drawdown_pct = 0.0f64;
    let mut balances = Vec::with_capacity(outcomes.len());

    for outcome in outcomes {
        match outcome.kind {
            OutcomeKind::TpHit => balance += balance * risk_fraction * outcome.reward_multiple,
            OutcomeKind::SlHit => balance -= balance * risk_fraction,
            OutcomeKind::Breakeven => {}
        }
        if balance > peak {
            peak = balance;
        }
        let dd = drawdown_pct(peak, balance);
        if dd > max_drawdown_pct {
            max_drawdown_pct = dd;
        }
        balances.push(balance);
    }

    let consecutive_losses = outcomes
        .iter()
        .rev()
        .take_while(|o| o.kind == OutcomeKind::SlHit)
        .count();

    EquityWalk {
        balances,
        final_balance: balance,
        peak_balance: peak,
        current_drawdown_pct: drawdown_pct(peak, balance),
        max_drawdown_pct,
        consecutive_losses,
    }
}

fn drawdown_pct(peak: f64, balance: f64) -> f64 {
    if peak <= 0.0 {
        return 0.0;
    }
    ((peak - balance) / peak * 100.0).max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    Safe,
    Warning,
    Critical,
}

impl HealthBand {
    fn from_score(score: f64) -> Self {
        if score < 40.0 {
            HealthBand::Critical
        } else if score < 70.0 {
            HealthBand::Warning
        } else {
            HealthBand::Safe
        }
    }
}

/// Account health score (0–100) and its band.
#[derive(Debug, Clone, Serialize)]
pub struct AccountHealth {
    pub score: f64,
    pub band: HealthBand,
    pub current_drawdown_pct: f64,
    pub consecutive_losses: usize,
    pub pending_exposure_pct: f64,
}

/// Score the walk: start at 100, penalize drawdown, losing streaks and open
/// exposure, then shift by the net outcome of the last five closed events.
pub fn health_score(
    walk: &EquityWalk,
    outcomes: &[ClosedOutcome],
    pending_exposure_pct: f64,
) -> AccountHealth {
    if outcomes.is_empty() {
        return AccountHealth {
            score: 100.0,
            band: HealthBand::Safe,
            current_drawdown_pct: 0.0,
            consecutive_losses: 0,
            pending_exposure_pct,
        };
    }

    let mut score = 100.0;
    score -= (walk.current_drawdown_pct * 2.0).min(40.0);
    score -= (walk.consecutive_losses as f64 * 10.0).min(30.0);
    score -= (pending_exposure_pct * 2.0).min(20.0);

    let recent = &outcomes[outcomes.len().saturating_sub(5)..];
    let wins = recent.iter().filter(|o| o.kind == OutcomeKind::TpHit).count();
    let losses = recent.iter().filter(|o| o.kind == OutcomeKind::SlHit).count();
    if wins >= losses {
        score += 10.0;
    } else {
        score -= 10.0;
    }

    let score = score.clamp(0.0, 100.0);
    AccountHealth {
        score,
        band: HealthBand::from_score(score),
        current_drawdown_pct: walk.current_drawdown_pct,
        consecutive_losses: walk.consecutive_losses,
        pending_exposure_pct,
    }
}

/// Open exposure when trades are simulated at a fixed per-position risk.
pub fn pending_exposure_simulated(open_position_count: usize, risk_fraction: f64) -> f64 {
    open_position_count as f64 * risk_fraction * 100.0
}

/// Open exposure from the real per-user risk ledger.
pub fn pending_exposure_ledger(open_risk_total: f64, balance: f64) -> f64 {
    if balance <= 0.0 {
        return 0.0;
    }
    open_risk_total / balance * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp(r: f64) -> ClosedOutcome {
        ClosedOutcome {
            kind: OutcomeKind::TpHit,
            reward_multiple: r,
        }
    }
    fn sl() -> ClosedOutcome {
        ClosedOutcome {
            kind: OutcomeKind::SlHit,
            reward_multiple: 1.0,
        }
    }
    fn be() -> ClosedOutcome {
        ClosedOutcome {
            kind: OutcomeKind::Breakeven,
            reward_multiple: 1.0,
        }
    }

    #[test]
    fn recurrence_walk() {
        let walk = simulate(1000.0, 0.02, &[tp(2.0), sl(), be()]);
        assert!((walk.balances[0] - 1040.0).abs() < 1e-9, "{walk:?}");
        assert!((walk.balances[1] - 1019.2).abs() < 1e-9, "{walk:?}");
        assert!((walk.balances[2] - 1019.2).abs() < 1e-9, "{walk:?}");
        // peak 1040, trough 1019.2 → 2.0%
        assert!((walk.max_drawdown_pct - 2.0).abs() < 1e-9, "{walk:?}");
    }

    #[test]
    fn consecutive_losses_counted_from_tail() {
        let walk = simulate(1000.0, 0.02, &[tp(1.0), sl(), sl()]);
        assert_eq!(walk.consecutive_losses, 2);

        let walk = simulate(1000.0, 0.02, &[sl(), sl(), tp(1.0)]);
        assert_eq!(walk.consecutive_losses, 0);

        // breakeven is a non-loss and breaks the streak
        let walk = simulate(1000.0, 0.02, &[sl(), be(), sl()]);
        assert_eq!(walk.consecutive_losses, 1);
    }

    #[test]
    fn empty_sequence_is_healthy() {
        let walk = simulate(1000.0, 0.02, &[]);
        assert_eq!(walk.final_balance, 1000.0);
        assert_eq!(walk.current_drawdown_pct, 0.0);
        assert_eq!(walk.max_drawdown_pct, 0.0);

        let health = health_score(&walk, &[], 4.0);
        assert_eq!(health.score, 100.0);
        assert_eq!(health.band, HealthBand::Safe);
    }

    #[test]
    fn health_penalties_and_clamps() {
        // Deep losing streak: drawdown and streak penalties cap out
        let outcomes: Vec<ClosedOutcome> = std::iter::repeat(sl()).take(40).collect();
        let walk = simulate(1000.0, 0.03, &outcomes);
        let health = health_score(&walk, &outcomes, 50.0);
        // 100 - 40 - 30 - 20 - 10 → clamped at 0
        assert_eq!(health.score, 0.0);
        assert_eq!(health.band, HealthBand::Critical);

        // Clean run stays safe
        let outcomes = vec![tp(2.0), tp(1.5)];
        let walk = simulate(1000.0, 0.02, &outcomes);
        let health = health_score(&walk, &outcomes, 0.0);
        assert_eq!(health.score, 100.0);
        assert_eq!(health.band, HealthBand::Safe);
    }

    #[test]
    fn health_bands() {
        assert_eq!(HealthBand::from_score(39.9), HealthBand::Critical);
        assert_eq!(HealthBand::from_score(40.0), HealthBand::Warning);
        assert_eq!(HealthBand::from_score(69.9), HealthBand::Warning);
        assert_eq!(HealthBand::from_score(70.0), HealthBand::Safe);
    }

    #[test]
    fn reward_multiple_directions() {
        // BUY: entry 1.20, stop 1.19, tp 1.22 → 2R
        let r = reward_multiple(TradeDirection::Buy, 1.20, 1.19, 1.22);
        assert!((r - 2.0).abs() < 1e-9);

        // SELL mirrored: entry 1.20, stop 1.21, tp 1.18 → 2R
        let r = reward_multiple(TradeDirection::Sell, 1.20, 1.21, 1.18);
        assert!((r - 2.0).abs() < 1e-9);
    }

    #[test]
    fn reward_multiple_zero_stop_distance_defaults_to_one() {
        let r = reward_multiple(TradeDirection::Buy, 1.20, 1.20, 1.25);
        assert_eq!(r, 1.0);
    }

    #[test]
    fn exposure_modes() {
        assert!((pending_exposure_simulated(3, 0.02) - 6.0).abs() < 1e-9);
        assert!((pending_exposure_ledger(150.0, 1000.0) - 15.0).abs() < 1e-9);
        assert_eq!(pending_exposure_ledger(150.0, 0.0), 0.0);
    }
}

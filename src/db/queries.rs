//! SQL query functions for all tables.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::*;

// ── Signals ──────────────────────────────────────────────────────

pub async fn get_signal(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<SignalRow>> {
    let row = sqlx::query_as::<_, SignalRow>("SELECT * FROM signals WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Everything created or touched after the watermark, oldest change first.
pub async fn signals_changed_since(
    pool: &PgPool,
    since: DateTime<Utc>,
    limit: i64,
) -> anyhow::Result<Vec<SignalRow>> {
    let rows = sqlx::query_as::<_, SignalRow>(
        "SELECT * FROM signals WHERE created_at > $1 OR updated_at > $1
         ORDER BY updated_at ASC LIMIT $2",
    )
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ── Take-profit updates ──────────────────────────────────────────

pub async fn tp_updates_since(
    pool: &PgPool,
    since: DateTime<Utc>,
    limit: i64,
) -> anyhow::Result<Vec<TpUpdateRow>> {
    let rows = sqlx::query_as::<_, TpUpdateRow>(
        "SELECT * FROM tp_updates WHERE created_at > $1 ORDER BY created_at ASC LIMIT $2",
    )
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_tp_update(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<TpUpdateRow>> {
    let row = sqlx::query_as::<_, TpUpdateRow>("SELECT * FROM tp_updates WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// A signal's full update chain in creation order.
pub async fn tp_updates_for_signal(
    pool: &PgPool,
    signal_id: Uuid,
) -> anyhow::Result<Vec<TpUpdateRow>> {
    let rows = sqlx::query_as::<_, TpUpdateRow>(
        "SELECT * FROM tp_updates WHERE signal_id = $1 ORDER BY created_at ASC",
    )
    .bind(signal_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ── Event history ────────────────────────────────────────────────

/// Edit/delete facts after the watermark. The updates table itself does not
/// reveal this history, so catch-up scans the log instead.
pub async fn edit_events_since(
    pool: &PgPool,
    since: DateTime<Utc>,
    limit: i64,
) -> anyhow::Result<Vec<SignalEventRow>> {
    let rows = sqlx::query_as::<_, SignalEventRow>(
        "SELECT * FROM signal_events
         WHERE created_at > $1 AND event_type IN ('tp_update_edited', 'tp_update_deleted')
         ORDER BY created_at ASC LIMIT $2",
    )
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// History rows of one type referencing an update id, earliest first.
pub async fn events_for_update(
    pool: &PgPool,
    event_type: &str,
    update_id: Uuid,
) -> anyhow::Result<Vec<SignalEventRow>> {
    let rows = sqlx::query_as::<_, SignalEventRow>(
        "SELECT * FROM signal_events
         WHERE event_type = $1 AND payload ->> 'update_id' = $2
         ORDER BY created_at ASC",
    )
    .bind(event_type)
    .bind(update_id.to_string())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ── User trades ──────────────────────────────────────────────────

pub async fn get_user_trade(
    pool: &PgPool,
    user_id: Uuid,
    signal_id: Uuid,
) -> anyhow::Result<Option<UserTradeRow>> {
    let row = sqlx::query_as::<_, UserTradeRow>(
        "SELECT * FROM user_trades WHERE user_id = $1 AND signal_id = $2",
    )
    .bind(user_id)
    .bind(signal_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Trades still carrying open risk on live signals.
pub async fn open_trades_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> anyhow::Result<Vec<UserTradeRow>> {
    let rows = sqlx::query_as::<_, UserTradeRow>(
        "SELECT ut.* FROM user_trades ut
         JOIN signals s ON s.id = ut.signal_id
         WHERE ut.user_id = $1 AND ut.remaining_risk_amount > 0 AND s.status = 'active'
         ORDER BY ut.created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ── Applied take-profit updates ──────────────────────────────────

pub async fn get_applied_update(
    pool: &PgPool,
    user_trade_id: Uuid,
    tp_update_id: Uuid,
) -> anyhow::Result<Option<AppliedTpUpdateRow>> {
    let row = sqlx::query_as::<_, AppliedTpUpdateRow>(
        "SELECT * FROM applied_tp_updates WHERE user_trade_id = $1 AND tp_update_id = $2",
    )
    .bind(user_trade_id)
    .bind(tp_update_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn applied_updates_for_trade(
    pool: &PgPool,
    user_trade_id: Uuid,
) -> anyhow::Result<Vec<AppliedTpUpdateRow>> {
    let rows = sqlx::query_as::<_, AppliedTpUpdateRow>(
        "SELECT * FROM applied_tp_updates WHERE user_trade_id = $1 ORDER BY created_at ASC",
    )
    .bind(user_trade_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ── Equity curve ─────────────────────────────────────────────────

/// Closed outcomes for a user's taken signals in close order, the input to
/// the equity walk.
pub async fn closed_outcomes_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> anyhow::Result<Vec<ClosedOutcomeRow>> {
    let rows = sqlx::query_as::<_, ClosedOutcomeRow>(
        "SELECT s.id AS signal_id, s.direction, s.status,
                s.entry_price, s.stop_loss, s.take_profit, s.closed_at
         FROM signals s
         JOIN user_trades ut ON ut.signal_id = s.id
         WHERE ut.user_id = $1 AND s.status IN ('tp_hit', 'sl_hit', 'breakeven')
         ORDER BY s.closed_at ASC NULLS LAST",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

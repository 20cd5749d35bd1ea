//! HTTP route handlers for the introspection API.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::db::queries;
use crate::trademath::equity::{self, ClosedOutcome};

use super::server::AppState;

/// Build all API routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(notifications))
        .route("/api/notifications/:id/dismiss", post(dismiss))
        .route("/api/notifications/dismiss-all", post(dismiss_all))
        .route("/api/equity", get(equity_curve))
        .route("/api/status", get(status))
        .route("/health", get(health))
}

/// GET /api/notifications — pending queue in order.
async fn notifications(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "notifications": state.queue.pending() }))
}

/// POST /api/notifications/{id}/dismiss — remove one notification.
async fn dismiss(State(state): State<AppState>, Path(id): Path<u64>) -> Json<Value> {
    let dismissed = state.queue.dismiss(id);
    Json(json!({ "dismissed": dismissed }))
}

/// POST /api/notifications/dismiss-all — clear the queue.
async fn dismiss_all(State(state): State<AppState>) -> Json<Value> {
    let dismissed = state.queue.dismiss_all();
    Json(json!({ "dismissed": dismissed }))
}

/// GET /api/equity — the user's equity walk and account health, from the
/// same math the notification payloads use.
async fn equity_curve(State(state): State<AppState>) -> Json<Value> {
    let user_id = state.session.user_id();

    let rows = match queries::closed_outcomes_for_user(&state.db, user_id).await {
        Ok(rows) => rows,
        Err(e) => return Json(json!({ "error": e.to_string() })),
    };
    let outcomes: Vec<ClosedOutcome> = rows
        .iter()
        .filter_map(|row| {
            ClosedOutcome::from_parts(
                &row.direction,
                &row.status,
                row.entry_price,
                row.stop_loss,
                row.take_profit,
            )
        })
        .collect();

    let walk = equity::simulate(
        state.equity.starting_balance,
        state.equity.risk_fraction,
        &outcomes,
    );

    let open_risk_total = match queries::open_trades_for_user(&state.db, user_id).await {
        Ok(trades) => trades.iter().map(|t| t.remaining_risk_amount).sum(),
        Err(e) => return Json(json!({ "error": e.to_string() })),
    };
    let exposure = equity::pending_exposure_ledger(open_risk_total, walk.final_balance);
    let health = equity::health_score(&walk, &outcomes, exposure);

    Json(json!({ "equity": walk, "health": health }))
}

/// GET /api/status — session, connectivity, watermark and queue depth.
async fn status(State(state): State<AppState>) -> Json<Value> {
    let session = state.session.snapshot();
    Json(json!({
        "user_id": session.user_id,
        "can_notify": session.can_notify,
        "allowed_categories": session.allowed_categories,
        "degraded": state.monitor.is_degraded(),
        "advisory_active": state.monitor.advisory_active(),
        "advisory_message": state
            .monitor
            .advisory_active()
            .then(|| crate::connectivity::ADVISORY_MESSAGE),
        "watermark": state.watermark.current(),
        "queue_depth": state.queue.len(),
    }))
}

/// GET /health — simple health check.
async fn health() -> &'static str {
    "ok"
}

//! signal-relay — Entry Point
//!
//! Loads configuration, initializes all subsystems, and runs the engine until
//! shutdown. Handles graceful shutdown on SIGINT/SIGTERM.

mod config;
mod connectivity;
mod db;
mod engine;
mod error;
mod events;
mod logging;
mod realtime;
mod trademath;
mod web;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::db::pool;
use crate::engine::catchup::CatchupCoordinator;
use crate::engine::queue::NotificationQueue;
use crate::engine::session::{SessionCell, SessionState};
use crate::engine::watermark::WatermarkStore;
use crate::engine::{Notifier, ReplayMode};
use crate::error::RelayError;
use crate::events::bus::EventBus;
use crate::realtime::types::EventSource;
use crate::realtime::ChangeChannel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (ignore if missing)
    let _ = dotenvy::dotenv();

    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    logging::structured::init_logging(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        user = %config.session.user_id,
        "signal-relay starting"
    );

    let user_id = Uuid::parse_str(&config.session.user_id)
        .map_err(|e| RelayError::Config(format!("invalid session.user_id: {e}")))?;

    // Initialize database
    let db_pool = pool::create_pool(&config.database.url).await?;
    pool::run_migrations(&db_pool).await?;
    info!("database connected and migrations applied");

    // Initialize event bus
    let event_bus = Arc::new(EventBus::new(1024));

    // Session cell — long-lived handlers read the latest values from here
    let session = SessionCell::new(SessionState {
        user_id,
        can_notify: config.session.notifications_enabled,
        allowed_categories: config.session.allowed_categories.clone(),
    });

    // Durable per-user watermark
    let (watermark, had_watermark) = WatermarkStore::load(
        Path::new(&config.session.state_dir),
        user_id,
        chrono::Duration::seconds(config.catchup.initial_lookback_secs as i64),
        Utc::now(),
    );
    let watermark = Arc::new(watermark);

    // Engine: queue, notifier, catch-up coordinator
    let queue = Arc::new(NotificationQueue::new(event_bus.clone()));
    let notifier = Arc::new(Notifier::new(
        db_pool.clone(),
        config.notifier.clone(),
        session.clone(),
        queue.clone(),
        watermark.clone(),
    ));
    let catchup = Arc::new(CatchupCoordinator::new(
        db_pool.clone(),
        config.catchup.clone(),
        notifier.clone(),
        event_bus.clone(),
    ));

    // Initial sync: silent on a fresh watermark (historical bookkeeping
    // only), emitting otherwise to surface anything missed while offline
    let initial_mode = if had_watermark {
        ReplayMode::Emitting
    } else {
        ReplayMode::Silent
    };
    catchup.run_once(initial_mode).await;
    info!(fresh_watermark = !had_watermark, "initial sync complete");

    // Realtime change channel
    let channel = Arc::new(ChangeChannel::new(config.realtime.clone()));
    // Online signal for the monitor; an external probe may flip this
    let (online_tx, online_rx) = tokio::sync::watch::channel(true);

    let monitor = Arc::new(ConnectivityMonitor::new(
        &config.connectivity,
        channel.status(),
        online_rx,
        session.clone(),
        notifier.clone(),
        catchup.clone(),
        event_bus.clone(),
    ));

    // Spawn realtime channel
    let channel_run = channel.clone();
    let _channel_handle = tokio::spawn(async move { channel_run.run().await });

    // Spawn live change consumer — paused while the monitor says degraded
    let mut change_rx = channel.subscribe_changes();
    let notifier_live = notifier.clone();
    let monitor_live = monitor.clone();
    let _consumer_handle = tokio::spawn(async move {
        loop {
            match change_rx.recv().await {
                Ok(event) => {
                    if monitor_live.is_degraded() {
                        continue;
                    }
                    notifier_live
                        .handle_change(&event, EventSource::Realtime, ReplayMode::Emitting)
                        .await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "live change consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Spawn connectivity monitor
    let monitor_run = monitor.clone();
    let _monitor_handle = tokio::spawn(async move { monitor_run.run().await });

    // Spawn catch-up safety-net loop
    let catchup_loop = catchup.clone();
    let _catchup_handle = tokio::spawn(async move { catchup_loop.run_loop().await });

    // Spawn web introspection API (if enabled)
    let _web_handle = if config.web.enabled {
        let server = web::server::WebServer::new(
            config.web.clone(),
            db_pool.clone(),
            queue.clone(),
            monitor.clone(),
            watermark.clone(),
            session.clone(),
            config.equity.clone(),
        );
        Some(tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!(error = %e, "web server error");
            }
        }))
    } else {
        None
    };

    info!("all subsystems started, waiting for shutdown signal");

    // Wait for shutdown signal
    let shutdown = async {
        let ctrl_c = signal::ctrl_c();
        #[cfg(unix)]
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c => { info!("received SIGINT"); }
            _ = sigterm.recv() => { info!("received SIGTERM"); }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received SIGINT");
        }
    };

    shutdown.await;

    // Keep the online signal alive until shutdown
    drop(online_tx);

    if let Err(e) = watermark.persist() {
        warn!(error = %e, "failed to persist watermark on shutdown");
    }

    info!("shutdown complete");
    Ok(())
}

//! Axum HTTP introspection server.

use std::sync::Arc;

use axum::Router;
use sqlx::PgPool;
use tracing::info;

use crate::config::{EquityConfig, WebConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::engine::queue::NotificationQueue;
use crate::engine::session::SessionCell;
use crate::engine::watermark::WatermarkStore;

use super::routes;

/// Shared state for all web routes.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<NotificationQueue>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub watermark: Arc<WatermarkStore>,
    pub session: SessionCell,
    pub equity: EquityConfig,
}

/// JSON API server for queue, equity and connectivity introspection.
pub struct WebServer {
    config: WebConfig,
    state: AppState,
}

impl WebServer {
    pub fn new(
        config: WebConfig,
        db: PgPool,
        queue: Arc<NotificationQueue>,
        monitor: Arc<ConnectivityMonitor>,
        watermark: Arc<WatermarkStore>,
        session: SessionCell,
        equity: EquityConfig,
    ) -> Self {
        Self {
            config,
            state: AppState {
                db,
                queue,
                monitor,
                watermark,
                session,
                equity,
            },
        }
    }

    /// Start the HTTP server.
    pub async fn start(self) -> anyhow::Result<()> {
        let app = Router::new()
            .merge(routes::api_routes())
            .with_state(self.state);

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.port));
        info!(port = self.config.port, "introspection API starting");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

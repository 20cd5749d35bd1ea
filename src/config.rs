//! Configuration — TOML file defaults + environment variable overrides.
//!
//! Tunables live in `config/default.toml`. Secrets (database URL) come from
//! environment variables.

use serde::Deserialize;
use std::env;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub realtime: RealtimeConfig,
    pub notifier: NotifierConfig,
    pub catchup: CatchupConfig,
    pub connectivity: ConnectivityConfig,
    pub equity: EquityConfig,
    pub session: SessionConfig,
    pub web: WebConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Fixed delay between reconnect attempts. Deliberately not exponential:
    /// the managed channel has its own retry policy underneath.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// A channel with no traffic for this long is considered timed out.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_ws_url() -> String {
    "ws://localhost:4000/realtime".into()
}
fn default_reconnect_delay() -> u64 {
    1200
}
fn default_ping_interval() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Live events older than this are treated as replay noise and suppressed.
    #[serde(default = "default_freshness_window")]
    pub freshness_window_secs: u64,
    /// Bounded retry for the eventually-consistent applied-update join row.
    #[serde(default = "default_lookup_attempts")]
    pub applied_lookup_attempts: u32,
    #[serde(default = "default_lookup_delay")]
    pub applied_lookup_delay_ms: u64,
}

fn default_freshness_window() -> u64 {
    300
}
fn default_lookup_attempts() -> u32 {
    3
}
fn default_lookup_delay() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatchupConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_row_limit")]
    pub row_limit: i64,
    /// First-ever sync starts this far back instead of at the beginning of time.
    #[serde(default = "default_initial_lookback")]
    pub initial_lookback_secs: u64,
}

fn default_poll_interval() -> u64 {
    12
}
fn default_row_limit() -> i64 {
    200
}
fn default_initial_lookback() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
    /// Delay before the full resync once the channel recovers from a degraded
    /// state in which the advisory was shown.
    #[serde(default = "default_reload_delay")]
    pub reload_delay_ms: u64,
}

fn default_reload_delay() -> u64 {
    900
}

#[derive(Debug, Clone, Deserialize)]
pub struct EquityConfig {
    #[serde(default = "default_starting_balance")]
    pub starting_balance: f64,
    #[serde(default = "default_risk_fraction")]
    pub risk_fraction: f64,
}

fn default_starting_balance() -> f64 {
    10_000.0
}
fn default_risk_fraction() -> f64 {
    0.02
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// The subscriber this relay instance reconciles for.
    #[serde(default)]
    pub user_id: String,
    /// Empty list means every category is allowed.
    #[serde(default)]
    pub allowed_categories: Vec<String>,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    /// Directory for per-user durable state (watermark files).
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_true() -> bool {
    true
}
fn default_state_dir() -> String {
    "state".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_output: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from `config/default.toml` merged with env vars.
    /// Env overrides use the `SR` prefix, e.g. `SR__WEB__PORT=9090`.
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("SR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Config = builder.try_deserialize()?;

        // Secrets and deployment identity always win from the plain env
        if let Ok(v) = env::var("DATABASE_URL") {
            cfg.database.url = v;
        }
        if let Ok(v) = env::var("REALTIME_WS_URL") {
            cfg.realtime.ws_url = v;
        }
        if let Ok(v) = env::var("RELAY_USER_ID") {
            cfg.session.user_id = v;
        }

        Ok(cfg)
    }
}

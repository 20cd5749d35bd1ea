//! Realtime change-subscription WebSocket client.
//!
//! Protocol: connect, send one subscribe message per collection, then read
//! JSON change events. Delivery is at-least-once with no ordering guarantee
//! across collections; the catch-up coordinator covers anything missed while
//! the channel is down. Must respond to server pings; also sends its own
//! keepalive pings and treats a silent channel as timed out.

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, sleep, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, error, info, warn};

use crate::config::RealtimeConfig;

use super::types::{ChangeEvent, ChannelStatus};

const SUBSCRIBED_TABLES: [&str; 3] = ["signals", "tp_updates", "signal_events"];

/// WebSocket client for the store's change feed.
pub struct ChangeChannel {
    config: RealtimeConfig,
    change_tx: broadcast::Sender<ChangeEvent>,
    status_tx: watch::Sender<ChannelStatus>,
    /// Bumped on every (re)connect so callbacks from a torn-down subscription
    /// are naturally ignored.
    generation: AtomicU64,
}

impl ChangeChannel {
    pub fn new(config: RealtimeConfig) -> Self {
        let (change_tx, _) = broadcast::channel(4096);
        let (status_tx, _) = watch::channel(ChannelStatus::Connecting);
        Self {
            config,
            change_tx,
            status_tx,
            generation: AtomicU64::new(0),
        }
    }

    /// Receiver for parsed change events.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }

    /// Watch the channel's health transitions.
    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }

    /// Main run loop — connects, subscribes, reads events, reconnects after a
    /// fixed delay on any failure. The delay is deliberately not exponential.
    pub async fn run(&self) {
        let reconnect_delay = Duration::from_millis(self.config.reconnect_delay_ms);

        loop {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.set_status(ChannelStatus::Connecting);
            info!(url = %self.config.ws_url, generation, "connecting to realtime channel");

            match connect_async(&self.config.ws_url).await {
                Ok((ws_stream, _)) => {
                    let (mut write, mut read) = ws_stream.split();

                    // Subscribe to every collection's change stream
                    let mut subscribe_failed = false;
                    for table in SUBSCRIBED_TABLES {
                        let sub_msg = serde_json::json!({
                            "event": "subscribe",
                            "table": table,
                            "ops": ["INSERT", "UPDATE"],
                        });
                        if let Err(e) =
                            write.send(tungstenite::Message::Text(sub_msg.to_string())).await
                        {
                            warn!(error = %e, table, "failed to send subscribe message");
                            subscribe_failed = true;
                            break;
                        }
                        debug!(table, "subscribed to change stream");
                    }

                    if subscribe_failed {
                        self.set_status(ChannelStatus::ChannelError);
                        sleep(reconnect_delay).await;
                        continue;
                    }

                    self.set_status(ChannelStatus::Subscribed);

                    let mut ping_interval =
                        interval(Duration::from_secs(self.config.ping_interval_secs));
                    // Skip the immediate first tick
                    ping_interval.tick().await;
                    let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);
                    let mut last_traffic = Instant::now();

                    let exit_status = loop {
                        // A newer connection owns the channel handle
                        if self.generation.load(Ordering::SeqCst) != generation {
                            break ChannelStatus::Closed;
                        }

                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(tungstenite::Message::Text(text))) => {
                                        last_traffic = Instant::now();
                                        self.handle_message(&text);
                                    }
                                    Some(Ok(tungstenite::Message::Ping(data))) => {
                                        last_traffic = Instant::now();
                                        let _ = write.send(tungstenite::Message::Pong(data)).await;
                                    }
                                    Some(Ok(tungstenite::Message::Close(_))) => {
                                        warn!("realtime channel closed by server");
                                        break ChannelStatus::Closed;
                                    }
                                    Some(Err(e)) => {
                                        error!(error = %e, "realtime channel error");
                                        break ChannelStatus::ChannelError;
                                    }
                                    None => {
                                        warn!("realtime stream ended");
                                        break ChannelStatus::Closed;
                                    }
                                    _ => {}
                                }
                            }
                            _ = ping_interval.tick() => {
                                if last_traffic.elapsed() > idle_timeout {
                                    warn!(
                                        idle_secs = last_traffic.elapsed().as_secs(),
                                        "realtime channel idle past timeout"
                                    );
                                    break ChannelStatus::TimedOut;
                                }
                                if let Err(e) = write.send(tungstenite::Message::Ping(vec![])).await {
                                    warn!(error = %e, "failed to send WS ping");
                                    break ChannelStatus::ChannelError;
                                }
                            }
                        }
                    };

                    self.set_status(exit_status);
                }
                Err(e) => {
                    error!(error = %e, "realtime connection failed");
                    self.set_status(ChannelStatus::ChannelError);
                }
            }

            sleep(reconnect_delay).await;
        }
    }

    fn handle_message(&self, text: &str) {
        // Some servers send literal text pong
        if text == "PONG" || text == "pong" {
            return;
        }

        let event: ChangeEvent = match serde_json::from_str(text) {
            Ok(ev) => ev,
            Err(e) => {
                debug!(error = %e, text_len = text.len(), "unparseable realtime message");
                return;
            }
        };

        let _ = self.change_tx.send(event);
    }

    fn set_status(&self, status: ChannelStatus) {
        if *self.status_tx.borrow() != status {
            info!(status = ?status, "realtime channel status");
            let _ = self.status_tx.send(status);
        }
    }
}

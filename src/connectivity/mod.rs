//! Connectivity monitor — channel health, blocking advisory, recovery.
//!
//! State machine: connected → degraded → connected. Degraded on a failing
//! channel status or an offline signal. While degraded and the user is
//! notification-eligible, a blocking advisory tells them live updates are
//! paused. Recovery after an advisory rebuilds engine state from scratch
//! instead of reconciling incrementally; a clean reconnect only needs an
//! emitting catch-up pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::config::ConnectivityConfig;
use crate::engine::catchup::CatchupCoordinator;
use crate::engine::session::SessionCell;
use crate::engine::{Notifier, ReplayMode};
use crate::events::bus::{EventBus, RelayEvent};
use crate::realtime::types::ChannelStatus;

pub const ADVISORY_MESSAGE: &str =
    "Live updates paused — do not trade until the connection recovers.";

pub struct ConnectivityMonitor {
    status_rx: watch::Receiver<ChannelStatus>,
    online_rx: watch::Receiver<bool>,
    session: SessionCell,
    notifier: Arc<Notifier>,
    catchup: Arc<CatchupCoordinator>,
    bus: Arc<EventBus>,
    degraded: AtomicBool,
    advisory: AtomicBool,
    reload_delay: Duration,
}

impl ConnectivityMonitor {
    pub fn new(
        config: &ConnectivityConfig,
        status_rx: watch::Receiver<ChannelStatus>,
        online_rx: watch::Receiver<bool>,
        session: SessionCell,
        notifier: Arc<Notifier>,
        catchup: Arc<CatchupCoordinator>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            status_rx,
            online_rx,
            session,
            notifier,
            catchup,
            bus,
            degraded: AtomicBool::new(false),
            advisory: AtomicBool::new(false),
            reload_delay: Duration::from_millis(config.reload_delay_ms),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn advisory_active(&self) -> bool {
        self.advisory.load(Ordering::SeqCst)
    }

    /// Main loop — reacts to channel status transitions and online/offline
    /// signals until both sources close.
    pub async fn run(&self) {
        let mut status_rx = self.status_rx.clone();
        let mut online_rx = self.online_rx.clone();

        loop {
            tokio::select! {
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *status_rx.borrow_and_update();
                    self.on_status(status).await;
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if !online {
                        self.enter_degraded("network offline").await;
                    } else if !self.is_degraded() {
                        // Back online without the channel having noticed a
                        // problem: still cover the gap
                        self.catchup.run_once(ReplayMode::Emitting).await;
                    }
                }
            }
        }
    }

    async fn on_status(&self, status: ChannelStatus) {
        self.bus.publish(RelayEvent::ChannelStatusChanged { status });

        if status.is_degraded() {
            self.enter_degraded(&format!("channel status {status:?}")).await;
        } else if status == ChannelStatus::Subscribed {
            self.on_subscribed().await;
        }
    }

    async fn enter_degraded(&self, reason: &str) {
        if self.degraded.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(reason, "live updates degraded");
        self.bus.publish(RelayEvent::ConnectionDegraded {
            reason: reason.to_string(),
        });

        // The advisory blocks the user from acting on stale data; it only
        // applies when they could have been receiving updates at all
        if self.session.can_notify() && !self.advisory.swap(true, Ordering::SeqCst) {
            self.bus.publish(RelayEvent::AdvisoryRaised {
                message: ADVISORY_MESSAGE.to_string(),
            });
        }
        // Reconnecting is the channel's job; it retries on its fixed delay
    }

    async fn on_subscribed(&self) {
        let was_degraded = self.degraded.swap(false, Ordering::SeqCst);

        if !was_degraded {
            // Fresh subscription on a clean connection: cover whatever
            // happened before the stream was live
            self.catchup.run_once(ReplayMode::Emitting).await;
            return;
        }

        if self.advisory.swap(false, Ordering::SeqCst) {
            self.bus.publish(RelayEvent::AdvisoryCleared);
            sleep(self.reload_delay).await;
            info!("rebuilding state after degraded period");
            self.notifier.reset();
            self.catchup.run_once(ReplayMode::Silent).await;
            self.bus
                .publish(RelayEvent::ConnectionRecovered { full_resync: true });
        } else {
            self.catchup.run_once(ReplayMode::Emitting).await;
            self.bus
                .publish(RelayEvent::ConnectionRecovered { full_resync: false });
        }
    }
}

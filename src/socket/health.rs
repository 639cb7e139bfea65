//! Periodic liveness monitor for an active socket connection.
//!
//! The monitor pings on a jittered ~30s cadence and tracks the time since the
//! last acknowledged event. When the ack window lapses it asks its callback to
//! recover; the callback decides whether a reconnect is actually warranted.

use async_trait::async_trait;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const HEALTH_CHECK_INTERVAL_MIN: Duration = Duration::from_secs(25);
const HEALTH_CHECK_INTERVAL_MAX: Duration = Duration::from_secs(35);

/// How long we tolerate silence before asking the callback to recover.
const HEALTH_ACK_WINDOW: Duration = Duration::from_secs(60);

#[async_trait]
pub(crate) trait HealthCallback: Send + Sync + 'static {
    /// Invoked every interval; expected to ping only when it makes sense.
    async fn check_health(self: Arc<Self>);

    /// Invoked when no ack arrived within the window.
    async fn on_health_lost(self: Arc<Self>);
}

pub(crate) struct HealthMonitor {
    last_ack: Arc<Mutex<Instant>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            last_ack: Arc::new(Mutex::new(Instant::now())),
            handle: Mutex::new(None),
        }
    }

    /// Starts the monitor loop, replacing any previous one.
    pub fn start(&self, callback: Arc<dyn HealthCallback>) {
        self.stop();
        *self.last_ack.lock().unwrap() = Instant::now();

        let last_ack = Arc::clone(&self.last_ack);
        let handle = tokio::spawn(async move {
            loop {
                let interval_ms = rand::rng().random_range(
                    HEALTH_CHECK_INTERVAL_MIN.as_millis()..=HEALTH_CHECK_INTERVAL_MAX.as_millis(),
                );
                tokio::time::sleep(Duration::from_millis(interval_ms as u64)).await;

                callback.clone().check_health().await;

                let window_lapsed = last_ack.lock().unwrap().elapsed() >= HEALTH_ACK_WINDOW;
                if window_lapsed {
                    callback.clone().on_health_lost().await;
                }
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Records that the connection produced a live event.
    pub fn ack(&self) {
        *self.last_ack.lock().unwrap() = Instant::now();
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

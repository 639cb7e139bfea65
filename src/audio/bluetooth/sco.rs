//! Bounded-retry SCO polling jobs.
//!
//! A job does not detect success on its own: it fires its action every 500ms
//! until either the manager cancels it (the platform confirmed the route
//! change) or 5 seconds elapse. Ticks are delivered through the manager's own
//! channel so all state transitions stay on the manager's event loop.

use log::debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub(crate) const SCO_JOB_TIMEOUT: Duration = Duration::from_millis(5000);
pub(crate) const SCO_RETRY_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoJobKind {
    Enable,
    Disable,
}

/// One scheduled invocation of a job's action.
#[derive(Clone, Copy, Debug)]
pub struct ScoTick {
    pub kind: ScoJobKind,
    pub(crate) generation: u64,
}

struct ScoRunnable {
    started_at: Instant,
    ticker: JoinHandle<()>,
}

pub(crate) struct BluetoothScoJob {
    kind: ScoJobKind,
    tick_tx: mpsc::Sender<ScoTick>,
    /// Bumped on every execute so ticks from a canceled run are ignored even
    /// if they were already queued when the cancel happened.
    generation: u64,
    runnable: Option<ScoRunnable>,
}

impl BluetoothScoJob {
    pub fn new(kind: ScoJobKind, tick_tx: mpsc::Sender<ScoTick>) -> Self {
        Self {
            kind,
            tick_tx,
            generation: 0,
            runnable: None,
        }
    }

    /// Starts polling, replacing any run already in flight.
    pub fn execute(&mut self) {
        self.cancel();
        self.generation += 1;
        debug!(target: "Bluetooth", "[scoJob] start {:?} (run {})", self.kind, self.generation);

        let tick = ScoTick {
            kind: self.kind,
            generation: self.generation,
        };
        let tick_tx = self.tick_tx.clone();
        let ticker = tokio::spawn(async move {
            loop {
                if tick_tx.send(tick).await.is_err() {
                    break;
                }
                tokio::time::sleep(SCO_RETRY_INTERVAL).await;
            }
        });
        self.runnable = Some(ScoRunnable {
            started_at: Instant::now(),
            ticker,
        });
    }

    /// Stops polling. Safe to call with no run in flight.
    pub fn cancel(&mut self) {
        if let Some(runnable) = self.runnable.take() {
            debug!(target: "Bluetooth", "[scoJob] cancel {:?}", self.kind);
            runnable.ticker.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.runnable.is_some()
    }

    /// Time since the current run started, if one is in flight.
    pub fn elapsed(&self) -> Option<Duration> {
        self.runnable.as_ref().map(|r| r.started_at.elapsed())
    }

    /// Whether a received tick belongs to the current run.
    pub fn accepts(&self, tick: &ScoTick) -> bool {
        self.runnable.is_some() && tick.generation == self.generation
    }
}

impl Drop for BluetoothScoJob {
    fn drop(&mut self) {
        self.cancel();
    }
}

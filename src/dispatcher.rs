use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::db;
use crate::processor::{self, Outcome};
use crate::state::SharedState;

/// Counts from one claim-and-process pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub reaped: u64,
    pub claimed: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    /// Entries removed while their attempt was in flight.
    pub dropped: usize,
    /// Entries whose outcome could not be recorded. They stay leased and
    /// become due again when the lease expires.
    pub errored: usize,
    pub claim_failed: bool,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the periodic claim loop for one process.
///
/// `start` and `stop` are idempotent and safe to call from any thread.
/// Other processes may run their own dispatchers against the same database;
/// `claim_batch` keeps them from ever sharing an entry.
pub struct Dispatcher {
    state: SharedState,
    running: Mutex<Option<Running>>,
}

impl Dispatcher {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            running: Mutex::new(None),
        }
    }

    /// Spawn the loop: one immediate pass, then one per `interval`.
    /// Returns false without doing anything if already running.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, interval: Duration) -> bool {
        let mut running = self.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::debug!("Dispatcher already running");
            return false;
        }

        let (shutdown, rx) = watch::channel(false);
        let interval = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(run(self.state.clone(), interval, rx));
        *running = Some(Running { shutdown, handle });
        true
    }

    /// Stop scheduling new passes. Returns false if not running.
    ///
    /// Does not wait for or cancel a pass already in progress; its attempts
    /// run to completion in the background.
    pub fn stop(&self) -> bool {
        match self.lock().take() {
            Some(running) => {
                let _ = running.shutdown.send(true);
                drop(running.handle);
                tracing::info!("Dispatcher stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Run a single pass on the caller's task.
    pub async fn run_tick(&self) -> TickReport {
        tick(&self.state).await
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(state: SharedState, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("Dispatcher started (interval={}ms)", interval.as_millis());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        if *shutdown.borrow() {
            break;
        }

        let report = tick(&state).await;
        if report.claimed > 0 || report.reaped > 0 {
            tracing::info!(
                "Tick: claimed={} delivered={} rescheduled={} exhausted={} dropped={} errored={} reaped={}",
                report.claimed,
                report.delivered,
                report.rescheduled,
                report.exhausted,
                report.dropped,
                report.errored,
                report.reaped
            );
        }
    }

    tracing::debug!("Dispatcher loop exited");
}

/// Reap, claim one batch, and process every claimed entry concurrently.
///
/// Store failures are logged and end the pass early; they never propagate.
/// One entry's failure or panic never affects the others.
pub async fn tick(state: &SharedState) -> TickReport {
    let mut report = TickReport::default();

    match processor::reap(&state.pool).await {
        Ok(n) => report.reaped = n,
        Err(e) => tracing::error!("Failed to reap queue entries: {e}"),
    }

    let entries = match db::retry_queue::claim_batch(
        &state.pool,
        state.config.batch_size,
        state.config.claim_lease,
    )
    .await
    {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Failed to claim queue entries: {e}");
            report.claim_failed = true;
            return report;
        }
    };

    if entries.is_empty() {
        return report;
    }
    report.claimed = entries.len();

    let mut tasks = JoinSet::new();
    for entry in entries {
        let submission_id = entry.submission_id;
        let state = state.clone();
        tasks.spawn(async move { (submission_id, processor::process(state, entry).await) });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(Outcome::Delivered))) => report.delivered += 1,
            Ok((_, Ok(Outcome::Rescheduled { .. }))) => report.rescheduled += 1,
            Ok((_, Ok(Outcome::Exhausted { .. }))) => report.exhausted += 1,
            Ok((_, Ok(Outcome::Dropped))) => report.dropped += 1,
            Ok((submission_id, Err(e))) => {
                tracing::error!("Failed to record outcome for submission {submission_id}: {e}");
                report.errored += 1;
            }
            Err(e) => {
                tracing::error!("Delivery task panicked: {e}");
                report.errored += 1;
            }
        }
    }

    report
}

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{SCHEDULER_OUTCOMES_TOTAL, SCHEDULER_TICK_DURATION_SECONDS};

pub const COMPACTION_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// What one scan over the fleet did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub activated: usize,
    pub completed: usize,
    /// Lost a race with a manual transition.
    pub skipped: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == TickReport::default()
    }
}

#[derive(Clone, Copy)]
enum Due {
    Activate,
    Complete,
}

impl Due {
    fn of(r: &Reservation, now: Ms) -> Option<Self> {
        match r.status {
            ReservationStatus::Pending if now >= r.span.start => Some(Due::Activate),
            ReservationStatus::Active if now > r.span.end => Some(Due::Complete),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Due::Activate => "activate",
            Due::Complete => "complete",
        }
    }
}

/// One pass over every reservation: start the ones whose time has come,
/// finish the ones that have run out. Never fails; problems are logged.
pub async fn run_tick(engine: &Engine) -> TickReport {
    let started = Instant::now();
    let now = engine.now();
    let mut report = TickReport::default();

    for r in engine.list_reservations() {
        let Some(due) = Due::of(&r, now) else {
            continue;
        };
        let result = match due {
            Due::Activate => engine.activate_reservation(r.id).await,
            Due::Complete => engine.complete_reservation(r.id, SYSTEM_ACTOR).await,
        };
        let outcome = match result {
            Ok(_) => {
                match due {
                    Due::Activate => report.activated += 1,
                    Due::Complete => report.completed += 1,
                }
                "ok"
            }
            Err(e @ EngineError::InvalidTransition { .. }) => {
                debug!("scheduler skip {} ({}): {e}", r.id, due.label());
                report.skipped += 1;
                "skipped"
            }
            Err(e) => {
                warn!("scheduler failed to {} {}: {e}", due.label(), r.id);
                report.failed += 1;
                "failed"
            }
        };
        metrics::counter!(SCHEDULER_OUTCOMES_TOTAL, "action" => due.label(), "outcome" => outcome)
            .increment(1);
    }

    metrics::histogram!(SCHEDULER_TICK_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    report
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Recurring lifecycle scan for one fleet. `start` and `stop` are idempotent;
/// the first tick fires as soon as the scheduler starts.
pub struct Scheduler {
    engine: Arc<Engine>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, interval: Duration) -> Self {
        Self {
            engine,
            interval: interval.max(Duration::from_millis(1)),
            running: Mutex::new(None),
        }
    }

    /// Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(self.engine.clone(), self.interval, cancel.clone()));
        *running = Some(Running { cancel, handle });
        info!("scheduler started, every {:?}", self.interval);
        true
    }

    /// Returns `false` if it was not running. Waits for an in-flight tick.
    pub async fn stop(&self) -> bool {
        let taken = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = taken else {
            return false;
        };
        running.cancel.cancel();
        let _ = running.handle.await;
        info!("scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Run one scan now, outside the timer.
    pub async fn tick(&self) -> TickReport {
        run_tick(&self.engine).await
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.cancel.cancel();
        }
    }
}

async fn run_loop(engine: Arc<Engine>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = run_tick(&engine).await;
                if !report.is_idle() {
                    info!(
                        "scheduler tick: {} activated, {} completed, {} skipped, {} failed",
                        report.activated, report.completed, report.skipped, report.failed
                    );
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(COMPACTION_CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let appends = engine.wal_appends_since_compact().await;
                if appends < threshold {
                    continue;
                }
                match engine.compact_wal().await {
                    Ok(()) => info!("compacted WAL after {appends} appends"),
                    Err(e) => warn!("WAL compaction failed: {e}"),
                }
            }
        }
    }
}

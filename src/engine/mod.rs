mod clock;
mod conflict;
mod error;
mod fleet;
mod lifecycle;
mod queries;
mod store;
mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::EngineError;
pub use store::FleetStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use ulid::Ulid;

use crate::activity::ActivitySink;
use crate::model::*;
use crate::wal::Wal;

pub const DEFAULT_STORE_DEADLINE: Duration = Duration::from_secs(5);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued,
/// fsync once, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-buffered bytes don't leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

// ── Keyed locks ──────────────────────────────────────────

/// One async mutex per vehicle or driver id. Lock order is always the
/// vehicle first, then drivers in ascending id order.
#[derive(Default)]
pub(super) struct KeyedLocks {
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(super) async fn lock(&self, id: Ulid) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(id).or_default().clone();
        mutex.lock_owned().await
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct EngineOptions {
    pub clock: Arc<dyn Clock>,
    /// Upper bound on a single WAL round-trip before it fails as `Persistence`.
    pub store_deadline: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            store_deadline: DEFAULT_STORE_DEADLINE,
        }
    }
}

pub struct Engine {
    pub(super) store: FleetStore,
    wal_tx: mpsc::Sender<WalCommand>,
    activity: Arc<dyn ActivitySink>,
    clock: Arc<dyn Clock>,
    store_deadline: Duration,
    /// Held shared by every persist and exclusively by compaction, so a
    /// snapshot never misses an event that is durable but not yet applied.
    persist_gate: RwLock<()>,
    pub(super) vehicle_locks: KeyedLocks,
    pub(super) driver_locks: KeyedLocks,
}

impl Engine {
    pub fn new(wal_path: PathBuf, activity: Arc<dyn ActivitySink>) -> io::Result<Self> {
        Self::with_options(wal_path, activity, EngineOptions::default())
    }

    pub fn with_options(
        wal_path: PathBuf,
        activity: Arc<dyn ActivitySink>,
        options: EngineOptions,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = FleetStore::new();
        for event in &events {
            store.apply(event);
        }
        tracing::debug!(
            "replayed {} events from {}",
            events.len(),
            wal_path.display()
        );

        Ok(Self {
            store,
            wal_tx,
            activity,
            clock: options.clock,
            store_deadline: options.store_deadline,
            persist_gate: RwLock::new(()),
            vehicle_locks: KeyedLocks::default(),
            driver_locks: KeyedLocks::default(),
        })
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    /// Durably append `event` within the store deadline, then apply it.
    pub(super) async fn persist(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.persist_gate.read().await;
        tokio::time::timeout(self.store_deadline, self.wal_append(&event))
            .await
            .map_err(|_| EngineError::Persistence("store deadline exceeded".into()))??;
        self.store.apply(&event);
        Ok(())
    }

    /// Best-effort activity record; sink failures never fail the caller.
    pub(super) fn emit(&self, activity: Activity) {
        if let Err(e) = self.activity.record(&activity) {
            tracing::debug!("dropped {:?} for {}: {e}", activity.kind, activity.reservation_id);
        }
    }

    /// Rewrite the WAL with one put per live document.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.persist_gate.write().await;
        let events = self.store.snapshot();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

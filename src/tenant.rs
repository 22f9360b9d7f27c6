use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityHub;
use crate::engine::{Engine, EngineOptions, SystemClock};
use crate::limits::*;
use crate::scheduler::{self, Scheduler};

/// Knobs applied to every fleet the manager opens.
#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub compact_threshold: u64,
    pub scheduler_interval: Duration,
    pub store_deadline: Duration,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            compact_threshold: 1000,
            scheduler_interval: Duration::from_secs(30),
            store_deadline: crate::engine::DEFAULT_STORE_DEADLINE,
        }
    }
}

/// A loaded fleet: its engine, activity hub and background tasks.
pub struct Fleet {
    pub engine: Arc<Engine>,
    pub activity: Arc<ActivityHub>,
    pub scheduler: Scheduler,
    compactor: CancellationToken,
}

/// Manages per-fleet engines. Each fleet gets its own Engine + WAL + scheduler.
/// Fleet = database name from the pgwire connection.
pub struct TenantManager {
    fleets: DashMap<String, Arc<Fleet>>,
    data_dir: PathBuf,
    settings: FleetSettings,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, settings: FleetSettings) -> Self {
        Self {
            fleets: DashMap::new(),
            data_dir,
            settings,
        }
    }

    /// Get or lazily open the fleet for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Fleet>> {
        if let Some(fleet) = self.fleets.get(tenant) {
            return Ok(fleet.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.fleets.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        // Two connections may race to open the same fleet; the entry lock
        // makes sure only one engine owns the WAL file.
        let entry = self.fleets.entry(tenant.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let activity = Arc::new(ActivityHub::new());
        let engine = Arc::new(Engine::with_options(
            wal_path,
            activity.clone(),
            EngineOptions {
                clock: Arc::new(SystemClock),
                store_deadline: self.settings.store_deadline,
            },
        )?);

        let scheduler = Scheduler::new(engine.clone(), self.settings.scheduler_interval);
        scheduler.start();
        let compactor = CancellationToken::new();
        tokio::spawn(scheduler::run_compactor(
            engine.clone(),
            self.settings.compact_threshold,
            compactor.clone(),
        ));

        let fleet = Arc::new(Fleet {
            engine,
            activity,
            scheduler,
            compactor,
        });
        entry.or_insert(fleet.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.fleets.len() as f64);
        tracing::info!("opened fleet {tenant}");
        Ok(fleet)
    }

    /// Stop every scheduler and compactor. Engines stay readable.
    pub async fn shutdown(&self) {
        let fleets: Vec<Arc<Fleet>> = self.fleets.iter().map(|e| e.value().clone()).collect();
        for fleet in fleets {
            fleet.compactor.cancel();
            fleet.scheduler.stop().await;
        }
    }
}

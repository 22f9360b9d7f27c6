use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Activity;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct ActivityError(pub String);

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "activity sink: {}", self.0)
    }
}

impl std::error::Error for ActivityError {}

/// Where lifecycle activity records go. Recording is fire-and-forget:
/// the engine logs and drops any error.
pub trait ActivitySink: Send + Sync {
    fn record(&self, activity: &Activity) -> Result<(), ActivityError>;
}

/// Broadcast hub for activity records, per vehicle and fleet-wide.
pub struct ActivityHub {
    fleet: broadcast::Sender<Activity>,
    vehicles: DashMap<Ulid, broadcast::Sender<Activity>>,
}

impl Default for ActivityHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityHub {
    pub fn new() -> Self {
        Self {
            fleet: broadcast::channel(CHANNEL_CAPACITY).0,
            vehicles: DashMap::new(),
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Activity> {
        self.fleet.subscribe()
    }

    /// Subscribe to one vehicle's activity. Creates the channel if needed.
    pub fn subscribe_vehicle(&self, vehicle_id: Ulid) -> broadcast::Receiver<Activity> {
        self.vehicles
            .entry(vehicle_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl ActivitySink for ActivityHub {
    /// No-op if nobody is listening.
    fn record(&self, activity: &Activity) -> Result<(), ActivityError> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload = serde_json::to_string(activity).map_err(|e| ActivityError(e.to_string()))?;
            tracing::debug!(target: "motorpool::activity", "{payload}");
        }
        if let Some(sender) = self.vehicles.get(&activity.vehicle_id) {
            let _ = sender.send(activity.clone());
        }
        let _ = self.fleet.send(activity.clone());
        Ok(())
    }
}

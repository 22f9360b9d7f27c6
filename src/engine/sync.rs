//! The only writers of `Vehicle::current_driver` and `Driver::assigned_vehicle`.
//!
//! Callers hold the vehicle lock; these functions take driver locks
//! themselves, in ascending id order. Any write of a `current_driver`
//! that names a driver happens under that driver's lock.

use tokio::sync::OwnedMutexGuard;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Point the reservation's vehicle and driver at each other. Whoever held
    /// either side before (a driver handed this vehicle, or a vehicle handed
    /// this driver) loses its pointer so both directions stay in step.
    pub(super) async fn claim(&self, r: &Reservation) -> Result<(), EngineError> {
        let holder = self
            .store
            .vehicle(&r.vehicle_id)
            .ok_or(EngineError::NotFound(r.vehicle_id))?
            .current_driver;
        let _driver_guards = self.lock_drivers(holder.into_iter().chain([r.driver_id])).await;

        let now = self.now();
        let mut vehicle = self
            .store
            .vehicle(&r.vehicle_id)
            .ok_or(EngineError::NotFound(r.vehicle_id))?;
        let mut driver = self
            .store
            .driver(&r.driver_id)
            .ok_or(EngineError::NotFound(r.driver_id))?;

        if let Some(pid) = vehicle.current_driver.filter(|p| *p != r.driver_id)
            && let Some(mut prev) = self.store.driver(&pid)
            && prev.assigned_vehicle == Some(r.vehicle_id)
        {
            prev.status = DriverStatus::Available;
            prev.assigned_vehicle = None;
            prev.updated_at = now;
            self.persist(Event::DriverPut(prev)).await?;
            tracing::debug!("driver {pid} lost vehicle {} to a reservation", r.vehicle_id);
        }

        // The other vehicle's lock is not held; the driver lock is, and every
        // writer of a `current_driver` naming this driver takes it too.
        if let Some(other) = driver.assigned_vehicle.filter(|v| *v != r.vehicle_id)
            && let Some(mut stale) = self.store.vehicle(&other)
            && stale.current_driver == Some(r.driver_id)
        {
            stale.current_driver = None;
            if stale.status != VehicleStatus::Maintenance {
                stale.status = VehicleStatus::Available;
            }
            stale.updated_at = now;
            self.persist(Event::VehiclePut(stale)).await?;
            tracing::debug!("vehicle {other} lost driver {} to a reservation", r.driver_id);
        }

        vehicle.status = VehicleStatus::Reserved;
        vehicle.current_driver = Some(r.driver_id);
        vehicle.updated_at = now;
        self.persist(Event::VehiclePut(vehicle)).await?;

        driver.status = DriverStatus::Reserved;
        driver.assigned_vehicle = Some(r.vehicle_id);
        driver.updated_at = now;
        self.persist(Event::DriverPut(driver)).await?;

        tracing::debug!("claimed vehicle {} for driver {}", r.vehicle_id, r.driver_id);
        Ok(())
    }

    /// Undo `claim`, but only on the side whose pointer still names this
    /// reservation's counterpart. A newer assignment keeps its fields.
    pub(super) async fn release(&self, r: &Reservation) -> Result<(), EngineError> {
        let _driver_guard = self.driver_locks.lock(r.driver_id).await;
        let now = self.now();

        if let Some(mut vehicle) = self.store.vehicle(&r.vehicle_id) {
            if vehicle.current_driver == Some(r.driver_id) && !self.pair_still_active(r) {
                vehicle.status = VehicleStatus::Available;
                vehicle.current_driver = None;
                vehicle.updated_at = now;
                self.persist(Event::VehiclePut(vehicle)).await?;
            } else {
                tracing::debug!(
                    "vehicle {} kept: held by {:?}",
                    r.vehicle_id,
                    vehicle.current_driver
                );
            }
        }

        if let Some(mut driver) = self.store.driver(&r.driver_id) {
            if driver.assigned_vehicle == Some(r.vehicle_id) && !self.pair_still_active(r) {
                driver.status = DriverStatus::Available;
                driver.assigned_vehicle = None;
                driver.updated_at = now;
                self.persist(Event::DriverPut(driver)).await?;
            } else {
                tracing::debug!(
                    "driver {} kept: assigned to {:?}",
                    r.driver_id,
                    driver.assigned_vehicle
                );
            }
        }
        Ok(())
    }

    /// Lock each distinct driver in ascending id order.
    async fn lock_drivers(&self, ids: impl IntoIterator<Item = Ulid>) -> Vec<OwnedMutexGuard<()>> {
        let mut ids: Vec<Ulid> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.driver_locks.lock(id).await);
        }
        guards
    }

    /// Another Active reservation pairs the same vehicle and driver.
    fn pair_still_active(&self, r: &Reservation) -> bool {
        self.store.reservations_for_vehicle(&r.vehicle_id).iter().any(|o| {
            o.id != r.id && o.driver_id == r.driver_id && o.status == ReservationStatus::Active
        })
    }

    /// Hand a vehicle to a driver outside any reservation, or take it back
    /// with `None`. The previous driver is released if it still points here.
    pub async fn reassign_vehicle(
        &self,
        vehicle_id: Ulid,
        driver_id: Option<Ulid>,
    ) -> Result<Vehicle, EngineError> {
        let _vehicle_guard = self.vehicle_locks.lock(vehicle_id).await;
        let mut vehicle = self
            .store
            .vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        if vehicle.status == VehicleStatus::Maintenance {
            return Err(EngineError::InvalidTransition {
                id: vehicle_id,
                from: vehicle.status.as_str(),
                action: "reassign",
            });
        }
        if let Some(did) = driver_id
            && !self.store.contains_driver(&did)
        {
            return Err(EngineError::NotFound(did));
        }

        let previous = vehicle.current_driver.filter(|p| Some(*p) != driver_id);
        let _driver_guards = self.lock_drivers(previous.into_iter().chain(driver_id)).await;
        // A claim elsewhere may have cleared our driver while we waited.
        vehicle = self
            .store
            .vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let previous = vehicle.current_driver.filter(|p| Some(*p) != driver_id);

        let now = self.now();
        if let Some(did) = driver_id {
            let mut driver = self.store.driver(&did).ok_or(EngineError::NotFound(did))?;
            if let Some(other) = driver.assigned_vehicle
                && other != vehicle_id
            {
                return Err(EngineError::InvalidTransition {
                    id: did,
                    from: driver.status.as_str(),
                    action: "assign",
                });
            }
            driver.status = DriverStatus::OnDuty;
            driver.assigned_vehicle = Some(vehicle_id);
            driver.updated_at = now;
            self.persist(Event::DriverPut(driver)).await?;
        }

        if let Some(pid) = previous
            && let Some(mut prev) = self.store.driver(&pid)
            && prev.assigned_vehicle == Some(vehicle_id)
        {
            prev.status = DriverStatus::Available;
            prev.assigned_vehicle = None;
            prev.updated_at = now;
            self.persist(Event::DriverPut(prev)).await?;
        }

        vehicle.current_driver = driver_id;
        vehicle.status = match driver_id {
            Some(_) => VehicleStatus::InUse,
            None => VehicleStatus::Available,
        };
        vehicle.updated_at = now;
        self.persist(Event::VehiclePut(vehicle.clone())).await?;
        tracing::info!("vehicle {vehicle_id} reassigned to {driver_id:?}");
        Ok(vehicle)
    }

    /// Take a vehicle out of service, or put it back. Refused while a driver
    /// holds the vehicle.
    pub async fn set_vehicle_maintenance(
        &self,
        vehicle_id: Ulid,
        in_maintenance: bool,
    ) -> Result<Vehicle, EngineError> {
        let _vehicle_guard = self.vehicle_locks.lock(vehicle_id).await;
        let holder = self
            .store
            .vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?
            .current_driver;
        let _driver_guards = self.lock_drivers(holder).await;
        let mut vehicle = self
            .store
            .vehicle(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;

        let next = match (in_maintenance, vehicle.status) {
            (true, VehicleStatus::Maintenance) | (false, VehicleStatus::Available) => {
                return Ok(vehicle);
            }
            (true, _) if vehicle.current_driver.is_some() => {
                return Err(EngineError::InvalidTransition {
                    id: vehicle_id,
                    from: vehicle.status.as_str(),
                    action: "start maintenance on",
                });
            }
            (true, _) => VehicleStatus::Maintenance,
            (false, VehicleStatus::Maintenance) => VehicleStatus::Available,
            (false, _) => return Ok(vehicle),
        };

        vehicle.status = next;
        vehicle.updated_at = self.now();
        self.persist(Event::VehiclePut(vehicle.clone())).await?;
        tracing::info!("vehicle {vehicle_id} is now {}", next.as_str());
        Ok(vehicle)
    }
}

use ulid::Ulid;

use crate::model::*;

use super::conflict::{find_conflict, validate_query_window};
use super::{Engine, EngineError};

impl Engine {
    pub fn get_reservation(&self, id: &Ulid) -> Result<Reservation, EngineError> {
        self.store.reservation(id).ok_or(EngineError::NotFound(*id))
    }

    /// Every reservation, ordered by start.
    pub fn list_reservations(&self) -> Vec<Reservation> {
        self.store.all_reservations()
    }

    pub fn list_reservations_by_vehicle(&self, vehicle_id: &Ulid) -> Vec<Reservation> {
        self.store.reservations_for_vehicle(vehicle_id)
    }

    pub fn list_reservations_by_driver(&self, driver_id: &Ulid) -> Vec<Reservation> {
        self.store.reservations_for_driver(driver_id)
    }

    /// Everything not yet `Completed`. Cancelled and rejected records are
    /// included.
    pub fn list_active_reservations(&self) -> Vec<Reservation> {
        self.store
            .all_reservations()
            .into_iter()
            .filter(|r| r.status != ReservationStatus::Completed)
            .collect()
    }

    /// Would `[start, end)` on this vehicle collide with a blocking reservation?
    pub fn check_conflict(
        &self,
        vehicle_id: &Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let window = validate_query_window(start, end)?;
        Ok(self
            .store
            .with_calendar(vehicle_id, |cal| find_conflict(cal, &window, exclude))
            .is_some())
    }

    /// Vehicles in `Available` or `Reserved` status that are free for the
    /// whole window.
    pub fn list_available_vehicles(
        &self,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Vehicle>, EngineError> {
        let window = validate_query_window(start, end)?;
        Ok(self
            .store
            .vehicles()
            .into_iter()
            .filter(|v| matches!(v.status, VehicleStatus::Available | VehicleStatus::Reserved))
            .filter(|v| {
                self.store
                    .with_calendar(&v.id, |cal| find_conflict(cal, &window, exclude))
                    .is_none()
            })
            .collect())
    }

    pub fn get_vehicle(&self, id: &Ulid) -> Result<Vehicle, EngineError> {
        self.store.vehicle(id).ok_or(EngineError::NotFound(*id))
    }

    pub fn get_driver(&self, id: &Ulid) -> Result<Driver, EngineError> {
        self.store.driver(id).ok_or(EngineError::NotFound(*id))
    }

    pub fn list_vehicles(&self) -> Vec<Vehicle> {
        self.store.vehicles()
    }

    pub fn list_drivers(&self) -> Vec<Driver> {
        self.store.drivers()
    }
}

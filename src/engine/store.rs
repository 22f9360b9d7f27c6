use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// In-memory fleet documents rebuilt from the WAL.
///
/// Reservations are keyed by id and indexed by vehicle (a calendar sorted by
/// start, used for the overlap query) and by driver. Vehicle and driver ids on
/// a reservation never change, so both indexes only ever grow.
pub struct FleetStore {
    reservations: DashMap<Ulid, Reservation>,
    calendars: DashMap<Ulid, VehicleCalendar>,
    by_driver: DashMap<Ulid, Vec<Ulid>>,
    vehicles: DashMap<Ulid, Vehicle>,
    drivers: DashMap<Ulid, Driver>,
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetStore {
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
            calendars: DashMap::new(),
            by_driver: DashMap::new(),
            vehicles: DashMap::new(),
            drivers: DashMap::new(),
        }
    }

    // ── Reservations ─────────────────────────────────────────

    pub fn reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn contains_reservation(&self, id: &Ulid) -> bool {
        self.reservations.contains_key(id)
    }

    pub fn all_reservations(&self) -> Vec<Reservation> {
        let mut all: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| (r.span.start, r.id));
        all
    }

    /// Reservations of one vehicle in calendar order.
    pub fn reservations_for_vehicle(&self, vehicle_id: &Ulid) -> Vec<Reservation> {
        let ids: Vec<Ulid> = self
            .calendars
            .get(vehicle_id)
            .map(|cal| cal.slots.iter().map(|s| s.reservation_id).collect())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.reservation(id)).collect()
    }

    pub fn reservations_for_driver(&self, driver_id: &Ulid) -> Vec<Reservation> {
        let ids = self
            .by_driver
            .get(driver_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut found: Vec<Reservation> = ids.iter().filter_map(|id| self.reservation(id)).collect();
        found.sort_by_key(|r| (r.span.start, r.id));
        found
    }

    /// Reservations on the vehicle that can still change. Terminal history
    /// is kept forever and does not count against the cap.
    pub fn open_reservation_count_for_vehicle(&self, vehicle_id: &Ulid) -> usize {
        self.calendars.get(vehicle_id).map_or(0, |cal| {
            cal.slots.iter().filter(|s| !s.status.is_terminal()).count()
        })
    }

    /// Run `f` against a vehicle's calendar. Unknown vehicles see an empty one.
    pub fn with_calendar<R>(&self, vehicle_id: &Ulid, f: impl FnOnce(&VehicleCalendar) -> R) -> R {
        match self.calendars.get(vehicle_id) {
            Some(cal) => f(cal.value()),
            None => f(&VehicleCalendar::new(*vehicle_id)),
        }
    }

    // ── Vehicles & drivers ───────────────────────────────────

    pub fn vehicle(&self, id: &Ulid) -> Option<Vehicle> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub fn contains_vehicle(&self, id: &Ulid) -> bool {
        self.vehicles.contains_key(id)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn vehicles(&self) -> Vec<Vehicle> {
        let mut all: Vec<Vehicle> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|v| v.id);
        all
    }

    pub fn driver(&self, id: &Ulid) -> Option<Driver> {
        self.drivers.get(id).map(|e| e.value().clone())
    }

    pub fn contains_driver(&self, id: &Ulid) -> bool {
        self.drivers.contains_key(id)
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    pub fn drivers(&self) -> Vec<Driver> {
        let mut all: Vec<Driver> = self.drivers.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|d| d.id);
        all
    }

    // ── Event application ────────────────────────────────────

    pub fn apply(&self, event: &Event) {
        match event {
            Event::VehiclePut(vehicle) => {
                self.vehicles.insert(vehicle.id, vehicle.clone());
            }
            Event::DriverPut(driver) => {
                self.drivers.insert(driver.id, driver.clone());
            }
            Event::ReservationPut(r) => {
                let is_new = self.reservations.insert(r.id, r.clone()).is_none();
                self.calendars
                    .entry(r.vehicle_id)
                    .or_insert_with(|| VehicleCalendar::new(r.vehicle_id))
                    .upsert_slot(Slot {
                        reservation_id: r.id,
                        span: r.span,
                        status: r.status,
                    });
                if is_new {
                    self.by_driver.entry(r.driver_id).or_default().push(r.id);
                }
            }
        }
    }

    /// One put per live document, in an order that replays cleanly.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.vehicles.len() + self.drivers.len() + self.reservations.len(),
        );
        events.extend(self.vehicles().into_iter().map(Event::VehiclePut));
        events.extend(self.drivers().into_iter().map(Event::DriverPut));
        events.extend(self.all_reservations().into_iter().map(Event::ReservationPut));
        events
    }
}

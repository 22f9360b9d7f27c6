use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Every timestamp in the crate uses this.
pub type Ms = i64;

/// Identity the scheduler acts under when it completes reservations.
pub const SYSTEM_ACTOR: &str = "system";

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Statuses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Active,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Statuses that hold a vehicle's time slot against other bookings.
    pub fn is_blocking(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationStatus::Completed | ReservationStatus::Cancelled | ReservationStatus::Rejected
        )
    }

    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, Active)
                | (Approved, Cancelled)
                | (Active, Completed)
                | (Active, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "approved" => Some(ReservationStatus::Approved),
            "rejected" => Some(ReservationStatus::Rejected),
            "active" => Some(ReservationStatus::Active),
            "completed" => Some(ReservationStatus::Completed),
            "cancelled" | "canceled" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    Available,
    InUse,
    Maintenance,
    Reserved,
}

impl VehicleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VehicleStatus::Available => "available",
            VehicleStatus::InUse => "in_use",
            VehicleStatus::Maintenance => "maintenance",
            VehicleStatus::Reserved => "reserved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    Available,
    OnDuty,
    OffDuty,
    Reserved,
}

impl DriverStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DriverStatus::Available => "available",
            DriverStatus::OnDuty => "on_duty",
            DriverStatus::OffDuty => "off_duty",
            DriverStatus::Reserved => "reserved",
        }
    }
}

// ── Documents ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Ulid,
    pub name: Option<String>,
    pub status: VehicleStatus,
    /// Back-reference owned by the assignment synchronizer.
    pub current_driver: Option<Ulid>,
    pub updated_at: Ms,
}

impl Vehicle {
    pub fn new(id: Ulid, name: Option<String>, now: Ms) -> Self {
        Self {
            id,
            name,
            status: VehicleStatus::Available,
            current_driver: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: Ulid,
    pub name: Option<String>,
    pub status: DriverStatus,
    /// Back-reference owned by the assignment synchronizer.
    pub assigned_vehicle: Option<Ulid>,
    pub updated_at: Ms,
}

impl Driver {
    pub fn new(id: Ulid, name: Option<String>, now: Ms) -> Self {
        Self {
            id,
            name,
            status: DriverStatus::Available,
            assigned_vehicle: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub driver_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
    pub purpose: String,
    pub notes: Option<String>,
    pub created_by: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<Ms>,
    pub rejected_by: Option<String>,
    pub rejection_note: Option<String>,
    pub rejected_at: Option<Ms>,
    /// Last actor to change the record after creation.
    pub updated_by: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// Caller-supplied fields for a new reservation.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub driver_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub purpose: String,
    pub notes: Option<String>,
    pub created_by: String,
}

/// Caller-supplied fields for rescheduling / re-describing a reservation.
#[derive(Debug, Clone)]
pub struct ReservationChanges {
    pub start: Ms,
    pub end: Ms,
    pub purpose: String,
    pub notes: Option<String>,
    pub updated_by: String,
}

// ── Vehicle calendar ─────────────────────────────────────────────

/// A reservation's footprint on its vehicle's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub reservation_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
}

/// Every reservation ever made for one vehicle, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct VehicleCalendar {
    pub vehicle_id: Ulid,
    pub slots: Vec<Slot>,
}

impl VehicleCalendar {
    pub fn new(vehicle_id: Ulid) -> Self {
        Self {
            vehicle_id,
            slots: Vec::new(),
        }
    }

    /// Insert slot maintaining sort order by span.start.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, reservation_id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.reservation_id == reservation_id)?;
        Some(self.slots.remove(pos))
    }

    /// Replace the slot for `slot.reservation_id`, re-sorting if its start moved.
    pub fn upsert_slot(&mut self, slot: Slot) {
        if let Some(existing) = self
            .slots
            .iter_mut()
            .find(|s| s.reservation_id == slot.reservation_id)
            && existing.span.start == slot.span.start
        {
            *existing = slot;
            return;
        }
        self.remove_slot(slot.reservation_id);
        self.insert_slot(slot);
    }

    /// Return only slots whose span overlaps the query window.
    /// Uses binary search to skip slots starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        let right_bound = self.slots.partition_point(|s| s.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// Whole-document puts. Replaying them in order rebuilds the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehiclePut(Vehicle),
    DriverPut(Driver),
    ReservationPut(Reservation),
}

// ── Activity records ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    ReservationCreated,
    ReservationUpdated,
    ReservationApproved,
    ReservationRejected,
    ReservationActivated,
    ReservationCompleted,
    ReservationCancelled,
}

/// Domain activity emitted to the activity sink after a lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub kind: ActivityKind,
    pub reservation_id: Ulid,
    pub vehicle_id: Ulid,
    pub driver_id: Ulid,
    pub span: Span,
    /// `None` when nobody in particular caused it (activation).
    pub actor: Option<String>,
    pub at: Ms,
}

impl Activity {
    pub fn for_reservation(kind: ActivityKind, r: &Reservation, actor: Option<&str>, at: Ms) -> Self {
        Self {
            kind,
            reservation_id: r.id,
            vehicle_id: r.vehicle_id,
            driver_id: r.driver_id,
            span: r.span,
            actor: actor.map(str::to_string),
            at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(start: Ms, end: Ms) -> Slot {
        Slot {
            reservation_id: Ulid::new(),
            span: Span::new(start, end),
            status: ReservationStatus::Pending,
        }
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
        assert_eq!(a.duration_ms(), 100);
    }

    #[test]
    fn blocking_statuses() {
        use ReservationStatus::*;
        assert!(Pending.is_blocking());
        assert!(Active.is_blocking());
        for s in [Approved, Rejected, Completed, Cancelled] {
            assert!(!s.is_blocking(), "{s} must not block");
        }
    }

    #[test]
    fn terminal_statuses_accept_nothing() {
        use ReservationStatus::*;
        let all = [Pending, Approved, Rejected, Active, Completed, Cancelled];
        for from in [Completed, Cancelled, Rejected] {
            assert!(from.is_terminal());
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn transition_table() {
        use ReservationStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Cancelled));
        assert!(!Active.can_transition_to(Active));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Approved.can_transition_to(Completed));
        assert!(!Approved.can_transition_to(Rejected));
    }

    #[test]
    fn status_parse() {
        assert_eq!(ReservationStatus::parse("ACTIVE"), Some(ReservationStatus::Active));
        assert_eq!(ReservationStatus::parse("canceled"), Some(ReservationStatus::Cancelled));
        assert_eq!(ReservationStatus::parse("on_hold"), None);
        for s in ["pending", "approved", "rejected", "active", "completed", "cancelled"] {
            assert_eq!(ReservationStatus::parse(s).map(|st| st.as_str()), Some(s));
        }
    }

    #[test]
    fn calendar_ordering() {
        let mut cal = VehicleCalendar::new(Ulid::new());
        cal.insert_slot(slot(300, 400));
        cal.insert_slot(slot(100, 200));
        cal.insert_slot(slot(200, 300));
        let starts: Vec<Ms> = cal.slots.iter().map(|s| s.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn upsert_moves_rescheduled_slot() {
        let mut cal = VehicleCalendar::new(Ulid::new());
        let first = slot(100, 200);
        cal.insert_slot(first);
        cal.insert_slot(slot(300, 400));

        cal.upsert_slot(Slot {
            span: Span::new(500, 600),
            ..first
        });
        assert_eq!(cal.slots.len(), 2);
        assert_eq!(cal.slots[1].reservation_id, first.reservation_id);
        assert_eq!(cal.slots[1].span, Span::new(500, 600));
    }

    #[test]
    fn upsert_in_place_keeps_status_change() {
        let mut cal = VehicleCalendar::new(Ulid::new());
        let s = slot(100, 200);
        cal.insert_slot(s);
        cal.upsert_slot(Slot {
            status: ReservationStatus::Cancelled,
            ..s
        });
        assert_eq!(cal.slots.len(), 1);
        assert_eq!(cal.slots[0].status, ReservationStatus::Cancelled);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut cal = VehicleCalendar::new(Ulid::new());
        cal.insert_slot(slot(100, 200));
        cal.insert_slot(slot(450, 600));
        cal.insert_slot(slot(1000, 1100));

        let hits: Vec<_> = cal.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut cal = VehicleCalendar::new(Ulid::new());
        cal.insert_slot(slot(100, 200));
        assert_eq!(cal.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(cal.overlapping(&Span::new(0, 100)).count(), 0);
    }

    #[test]
    fn overlapping_single_ms_overlap() {
        let mut cal = VehicleCalendar::new(Ulid::new());
        cal.insert_slot(slot(100, 201));
        assert_eq!(cal.overlapping(&Span::new(200, 300)).count(), 1);
    }

    #[test]
    fn overlapping_long_slot_spanning_query() {
        let mut cal = VehicleCalendar::new(Ulid::new());
        cal.insert_slot(slot(0, 10_000));
        assert_eq!(cal.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut cal = VehicleCalendar::new(Ulid::new());
        cal.insert_slot(slot(100, 200));
        assert!(cal.remove_slot(Ulid::new()).is_none());
        assert_eq!(cal.slots.len(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::VehiclePut(Vehicle::new(Ulid::new(), Some("Van 12".into()), 1_000));
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

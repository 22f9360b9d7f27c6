use tokio::sync::OwnedMutexGuard;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::RESERVATION_TRANSITIONS_TOTAL;

use super::conflict::{check_no_conflict, validate_actor, validate_span, validate_text};
use super::{Engine, EngineError};

impl Engine {
    /// Book `[start, end)` on a vehicle for a driver. The reservation starts
    /// `Pending`; if its start has already arrived it is activated on the spot.
    pub async fn create_reservation(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        let span = validate_span(new.start, new.end)?;
        validate_text(&new.purpose, new.notes.as_deref())?;
        validate_actor(&new.created_by)?;
        let now = self.now();
        if span.start < now {
            return Err(EngineError::Validation("start is in the past"));
        }
        if !self.store.contains_vehicle(&new.vehicle_id) {
            return Err(EngineError::NotFound(new.vehicle_id));
        }
        if !self.store.contains_driver(&new.driver_id) {
            return Err(EngineError::NotFound(new.driver_id));
        }

        let guard = self.vehicle_locks.lock(new.vehicle_id).await;
        if self.store.contains_reservation(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        let open = self.store.open_reservation_count_for_vehicle(&new.vehicle_id);
        if open >= MAX_OPEN_RESERVATIONS_PER_VEHICLE {
            return Err(EngineError::Validation("too many open reservations on vehicle"));
        }
        self.store
            .with_calendar(&new.vehicle_id, |cal| check_no_conflict(cal, &span, None))?;

        let reservation = Reservation {
            id: new.id,
            vehicle_id: new.vehicle_id,
            driver_id: new.driver_id,
            span,
            status: ReservationStatus::Pending,
            purpose: new.purpose,
            notes: new.notes,
            created_by: new.created_by,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejection_note: None,
            rejected_at: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        self.persist(Event::ReservationPut(reservation.clone())).await?;
        metrics::counter!(RESERVATION_TRANSITIONS_TOTAL, "to" => "pending").increment(1);
        tracing::info!(
            "reservation {} created on vehicle {} for driver {}",
            reservation.id,
            reservation.vehicle_id,
            reservation.driver_id
        );
        self.emit(Activity::for_reservation(
            ActivityKind::ReservationCreated,
            &reservation,
            Some(reservation.created_by.as_str()),
            now,
        ));
        drop(guard);

        if now >= reservation.span.start {
            match self.activate_reservation(reservation.id).await {
                Ok(active) => return Ok(active),
                Err(e) => tracing::warn!(
                    "immediate activation of {} failed, leaving it to the scheduler: {e}",
                    reservation.id
                ),
            }
        }
        Ok(reservation)
    }

    /// Reschedule or re-describe a reservation. Status is left alone.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        changes: ReservationChanges,
    ) -> Result<Reservation, EngineError> {
        let span = validate_span(changes.start, changes.end)?;
        validate_text(&changes.purpose, changes.notes.as_deref())?;
        validate_actor(&changes.updated_by)?;

        let vehicle_id = self
            .store
            .reservation(&id)
            .ok_or(EngineError::NotFound(id))?
            .vehicle_id;
        let _guard = self.vehicle_locks.lock(vehicle_id).await;
        let mut r = self.store.reservation(&id).ok_or(EngineError::NotFound(id))?;
        if matches!(
            r.status,
            ReservationStatus::Completed | ReservationStatus::Cancelled
        ) {
            return Err(EngineError::transition(id, r.status, "update"));
        }
        self.store
            .with_calendar(&vehicle_id, |cal| check_no_conflict(cal, &span, Some(id)))?;

        let now = self.now();
        r.span = span;
        r.purpose = changes.purpose;
        r.notes = changes.notes;
        r.updated_by = Some(changes.updated_by);
        r.updated_at = now;
        self.persist(Event::ReservationPut(r.clone())).await?;
        tracing::info!("reservation {id} updated");
        self.emit(Activity::for_reservation(
            ActivityKind::ReservationUpdated,
            &r,
            r.updated_by.as_deref(),
            now,
        ));
        Ok(r)
    }

    pub async fn cancel_reservation(&self, id: Ulid, cancelled_by: &str) -> Result<Reservation, EngineError> {
        validate_actor(cancelled_by)?;
        let (r, prior, _guard) = self
            .transition(id, ReservationStatus::Cancelled, "cancel", Some(cancelled_by), |_, _| {})
            .await?;
        if prior == ReservationStatus::Active {
            self.release(&r).await?;
        }
        self.emit(Activity::for_reservation(
            ActivityKind::ReservationCancelled,
            &r,
            Some(cancelled_by),
            r.updated_at,
        ));
        Ok(r)
    }

    /// Move a `Pending` or `Approved` reservation to `Active` and claim its
    /// vehicle and driver. No time check: callers decide when it is due.
    pub async fn activate_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (r, _, _guard) = self
            .transition(id, ReservationStatus::Active, "activate", None, |_, _| {})
            .await?;
        self.claim(&r).await?;
        self.emit(Activity::for_reservation(
            ActivityKind::ReservationActivated,
            &r,
            None,
            r.updated_at,
        ));
        Ok(r)
    }

    pub async fn complete_reservation(&self, id: Ulid, completed_by: &str) -> Result<Reservation, EngineError> {
        validate_actor(completed_by)?;
        let (r, _, _guard) = self
            .transition(id, ReservationStatus::Completed, "complete", Some(completed_by), |_, _| {})
            .await?;
        self.release(&r).await?;
        self.emit(Activity::for_reservation(
            ActivityKind::ReservationCompleted,
            &r,
            Some(completed_by),
            r.updated_at,
        ));
        Ok(r)
    }

    pub async fn approve_reservation(&self, id: Ulid, approver: &str) -> Result<Reservation, EngineError> {
        validate_actor(approver)?;
        let (r, _, _guard) = self
            .transition(id, ReservationStatus::Approved, "approve", Some(approver), |r, now| {
                r.approved_by = Some(approver.to_string());
                r.approved_at = Some(now);
            })
            .await?;
        self.emit(Activity::for_reservation(
            ActivityKind::ReservationApproved,
            &r,
            Some(approver),
            r.updated_at,
        ));
        Ok(r)
    }

    pub async fn reject_reservation(
        &self,
        id: Ulid,
        rejector: &str,
        note: Option<String>,
    ) -> Result<Reservation, EngineError> {
        validate_actor(rejector)?;
        if note.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(EngineError::Validation("rejection note too long"));
        }
        let (r, _, _guard) = self
            .transition(id, ReservationStatus::Rejected, "reject", Some(rejector), |r, now| {
                r.rejected_by = Some(rejector.to_string());
                r.rejection_note = note;
                r.rejected_at = Some(now);
            })
            .await?;
        self.emit(Activity::for_reservation(
            ActivityKind::ReservationRejected,
            &r,
            Some(rejector),
            r.updated_at,
        ));
        Ok(r)
    }

    /// Re-read the reservation under its vehicle lock, check the move is legal
    /// and persist it. Returns the new record, the prior status and the lock,
    /// so claim/release run before anyone else touches this vehicle.
    async fn transition(
        &self,
        id: Ulid,
        next: ReservationStatus,
        action: &'static str,
        actor: Option<&str>,
        stamp: impl FnOnce(&mut Reservation, Ms),
    ) -> Result<(Reservation, ReservationStatus, OwnedMutexGuard<()>), EngineError> {
        let vehicle_id = self
            .store
            .reservation(&id)
            .ok_or(EngineError::NotFound(id))?
            .vehicle_id;
        let guard = self.vehicle_locks.lock(vehicle_id).await;
        let mut r = self.store.reservation(&id).ok_or(EngineError::NotFound(id))?;
        let prior = r.status;
        if !prior.can_transition_to(next) {
            return Err(EngineError::transition(id, prior, action));
        }

        let now = self.now();
        r.status = next;
        r.updated_at = now;
        if let Some(actor) = actor {
            r.updated_by = Some(actor.to_string());
        }
        stamp(&mut r, now);
        self.persist(Event::ReservationPut(r.clone())).await?;
        metrics::counter!(RESERVATION_TRANSITIONS_TOTAL, "to" => next.as_str()).increment(1);
        tracing::info!("reservation {id}: {prior} -> {next}");
        Ok((r, prior, guard))
    }
}

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Check `[start, end)` is a bookable interval and build its span.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::Validation("start must be before end"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::Validation("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_RESERVATION_DURATION_MS {
        return Err(EngineError::Validation("reservation too long"));
    }
    Ok(span)
}

/// Like `validate_span` but for read-side windows, which may be wider.
pub(crate) fn validate_query_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::Validation("start must be before end"));
    }
    if end - start > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::Validation("query window too wide"));
    }
    Ok(Span::new(start, end))
}

pub(crate) fn validate_text(purpose: &str, notes: Option<&str>) -> Result<(), EngineError> {
    if purpose.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::Validation("purpose too long"));
    }
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::Validation("notes too long"));
    }
    Ok(())
}

pub(crate) fn validate_actor(actor: &str) -> Result<(), EngineError> {
    if actor.is_empty() {
        return Err(EngineError::Validation("actor must not be empty"));
    }
    if actor.len() > MAX_ACTOR_LEN {
        return Err(EngineError::Validation("actor too long"));
    }
    Ok(())
}

/// First blocking reservation on the calendar overlapping `span`, skipping `exclude`.
///
/// Only `Pending` and `Active` block. Intervals are half-open, so a slot
/// ending exactly at `span.start` is not a conflict.
pub(crate) fn find_conflict(
    calendar: &VehicleCalendar,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    calendar
        .overlapping(span)
        .filter(|slot| Some(slot.reservation_id) != exclude)
        .find(|slot| slot.status.is_blocking())
        .map(|slot| slot.reservation_id)
}

pub(crate) fn check_no_conflict(
    calendar: &VehicleCalendar,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(calendar, span, exclude) {
        Some(id) => {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(id))
        }
        None => Ok(()),
    }
}

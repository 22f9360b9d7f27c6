use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input: bad interval, start in the past, oversized text.
    Validation(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested slot overlaps this blocking reservation.
    Conflict(Ulid),
    /// The operation is not legal from the reservation's (or vehicle's) current state.
    InvalidTransition {
        id: Ulid,
        from: &'static str,
        action: &'static str,
    },
    /// Store unreachable within its deadline, or the WAL writer failed.
    Persistence(String),
}

impl EngineError {
    pub(crate) fn transition(id: Ulid, from: ReservationStatus, action: &'static str) -> Self {
        EngineError::InvalidTransition {
            id,
            from: from.as_str(),
            action,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Conflict(_) => "conflict",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Persistence(_) => "persistence",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::InvalidTransition { id, from, action } => {
                write!(f, "cannot {action} {id}: status is {from}")
            }
            EngineError::Persistence(e) => write!(f, "persistence error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

//! Errors returned by the admission API

use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::directory::DirectoryError;
use crate::persistence::LedgerError;

/// Every failure a caller of [`AdmissionService`](crate::AdmissionService) can see
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    /// Registration for an event whose date has passed
    #[error("event {event_id} was held on {held_on} and no longer accepts registrations")]
    PastEvent { event_id: Uuid, held_on: NaiveDate },

    #[error("user {user_id} is already registered for event {event_id}")]
    Duplicate { user_id: Uuid, event_id: Uuid },

    #[error("user {user_id} is not registered for event {event_id}")]
    NotFound { user_id: Uuid, event_id: Uuid },

    /// The event lock was busy for longer than the configured timeout
    #[error("event {event_id} is busy, gave up after {waited:?}")]
    Contended { event_id: Uuid, waited: Duration },

    #[error("internal invariant violated: {0}")]
    Invariant(String),

    /// Storage or a collaborator failed
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl AdmissionError {
    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contended { .. })
    }

    /// Whether the request was refused because of its input rather than a failure
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::EventNotFound(_)
                | Self::PastEvent { .. }
                | Self::Duplicate { .. }
                | Self::NotFound { .. }
        )
    }
}

impl From<LedgerError> for AdmissionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Duplicate { user_id, event_id } => Self::Duplicate { user_id, event_id },
            LedgerError::NotFound { user_id, event_id } => Self::NotFound { user_id, event_id },
            LedgerError::AttendanceNotFound(id) => {
                Self::Invariant(format!("attendance {id} vanished inside its section"))
            }
            LedgerError::Contended { event_id, waited } => Self::Contended { event_id, waited },
            LedgerError::Invariant(msg) => Self::Invariant(msg),
            LedgerError::Database(msg) => Self::Unavailable(msg),
        }
    }
}

impl From<DirectoryError> for AdmissionError {
    fn from(err: DirectoryError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

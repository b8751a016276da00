//! AttendanceLedger trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Attendance, AttendanceStatus, Role, StatusKind};

/// Error type for ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The user already holds a record for this event
    #[error("user {user_id} already has an attendance for event {event_id}")]
    Duplicate { user_id: Uuid, event_id: Uuid },

    /// No record for this (user, event) pair
    #[error("user {user_id} has no attendance for event {event_id}")]
    NotFound { user_id: Uuid, event_id: Uuid },

    /// No record with this id
    #[error("attendance not found: {0}")]
    AttendanceNotFound(Uuid),

    /// The event lock could not be acquired in time
    #[error("timed out after {waited:?} waiting for the lock on event {event_id}")]
    Contended { event_id: Uuid, waited: Duration },

    /// Stored data breaks a waitlist invariant
    #[error("ledger invariant violated: {0}")]
    Invariant(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),
}

impl LedgerError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        LedgerError::Invariant(msg.into())
    }

    /// Whether retrying the same operation later can succeed
    ///
    /// The promotion worker retries database errors with backoff. Callers of
    /// `register`/`cancel` see them as `AdmissionError::Unavailable`, which is
    /// not retryable, because the request may already have committed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contended { .. } | Self::Database(_))
    }
}

/// Durable record of who is attending or waiting for which event
///
/// Reads on the ledger itself see committed state only and take no lock.
/// Every write goes through an [`EventSection`], which holds the event's
/// exclusive lock from the first read to the commit.
#[async_trait]
pub trait AttendanceLedger: Send + Sync + 'static {
    /// Enter the critical section for one event
    ///
    /// Fails with [`LedgerError::Contended`] if the lock is not granted
    /// within `timeout`.
    async fn lock_event(
        &self,
        event_id: Uuid,
        timeout: Duration,
    ) -> Result<Box<dyn EventSection>, LedgerError>;

    /// Get the record for a (user, event) pair
    async fn find(&self, user_id: Uuid, event_id: Uuid)
        -> Result<Option<Attendance>, LedgerError>;

    /// Get a record by its id
    async fn find_by_id(&self, attendance_id: Uuid) -> Result<Option<Attendance>, LedgerError>;

    /// Count an event's records with the given status
    async fn count_by_status(&self, event_id: Uuid, kind: StatusKind)
        -> Result<u32, LedgerError>;

    /// List an event's records with the given status
    ///
    /// Waitlisted records come ordered by position, attending records by
    /// registration time.
    async fn list_by_status(
        &self,
        event_id: Uuid,
        kind: StatusKind,
    ) -> Result<Vec<Attendance>, LedgerError>;

    /// Events that currently have at least one waitlisted record
    async fn events_with_waitlist(&self) -> Result<Vec<Uuid>, LedgerError>;
}

/// Exclusive, transactional view of one event's records
///
/// Writes become visible to other readers only on [`commit`](Self::commit).
/// Dropping a section without committing discards them and releases the lock.
#[async_trait]
pub trait EventSection: Send {
    /// The event this section locks
    fn event_id(&self) -> Uuid;

    /// Create a record; fails with [`LedgerError::Duplicate`] if the user
    /// already has one for this event
    async fn insert(
        &mut self,
        user_id: Uuid,
        status: AttendanceStatus,
        role: Option<Role>,
    ) -> Result<Attendance, LedgerError>;

    /// Delete a user's record and return it as it was
    async fn remove(&mut self, user_id: Uuid) -> Result<Attendance, LedgerError>;

    /// Count records with the given status
    async fn count_by_status(&mut self, kind: StatusKind) -> Result<u32, LedgerError>;

    /// Waitlisted records ordered by position
    async fn list_waitlisted(&mut self) -> Result<Vec<Attendance>, LedgerError>;

    /// Highest waitlist position in use, None when the waitlist is empty
    async fn max_waitlist_position(&mut self) -> Result<Option<u32>, LedgerError>;

    /// Waitlisted record with the lowest position
    async fn waitlist_head(&mut self) -> Result<Option<Attendance>, LedgerError>;

    /// Move a waitlisted record to attending, clearing its position and
    /// stamping `promoted_at`
    async fn mark_promoted(
        &mut self,
        attendance_id: Uuid,
        promoted_at: DateTime<Utc>,
    ) -> Result<Attendance, LedgerError>;

    /// Decrement every waitlist position greater than `position` by one
    ///
    /// Returns the number of records moved.
    async fn shift_waitlist_after(&mut self, position: u32) -> Result<u64, LedgerError>;

    /// Publish the section's writes and release the lock
    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}

//! Event lookup
//!
//! The admission engine never owns events; it asks an [`EventDirectory`]
//! for the capacity and date of the event being registered for.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use sqlx::PgPool;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::model::Event;

/// Error type for event lookups
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The backing store could not be reached
    #[error("event directory unavailable: {0}")]
    Unavailable(String),

    /// A stored event could not be interpreted
    #[error("invalid event {event_id}: {reason}")]
    Invalid { event_id: Uuid, reason: String },
}

/// Read-only source of events
#[async_trait]
pub trait EventDirectory: Send + Sync + 'static {
    /// Look up an event; Ok(None) when it does not exist
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, DirectoryError>;
}

/// In-memory directory for tests and database-less runs
#[derive(Clone, Default)]
pub struct InMemoryEventDirectory {
    events: Arc<RwLock<HashMap<Uuid, Event>>>,
}

impl InMemoryEventDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an event
    pub fn insert(&self, event: Event) {
        self.events.write().insert(event.id, event);
    }

    pub fn remove(&self, event_id: Uuid) -> Option<Event> {
        self.events.write().remove(&event_id)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventDirectory for InMemoryEventDirectory {
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, DirectoryError> {
        Ok(self.events.read().get(&event_id).cloned())
    }
}

/// Directory backed by the `events` table
#[derive(Clone)]
pub struct PostgresEventDirectory {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    held_on: NaiveDate,
    capacity: Option<i32>,
}

impl TryFrom<EventRow> for Event {
    type Error = DirectoryError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let capacity = row
            .capacity
            .map(|c| {
                u32::try_from(c)
                    .ok()
                    .and_then(NonZeroU32::new)
                    .ok_or_else(|| DirectoryError::Invalid {
                        event_id: row.id,
                        reason: format!("capacity must be positive, got {c}"),
                    })
            })
            .transpose()?;

        Ok(Event {
            id: row.id,
            title: row.title,
            held_on: row.held_on,
            capacity,
        })
    }
}

impl PostgresEventDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventDirectory for PostgresEventDirectory {
    #[instrument(skip(self))]
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, DirectoryError> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT id, title, held_on, capacity FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(%event_id, "Event lookup failed: {}", e);
            DirectoryError::Unavailable(e.to_string())
        })?;

        row.map(Event::try_from).transpose()
    }
}

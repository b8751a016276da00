//! Event as seen by the admission engine
//!
//! Events are owned by the event-management collaborator; this crate only
//! reads their scheduling date and capacity.

use std::num::NonZeroU32;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A schedulable event with an optional attendance cap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,

    /// Day the event takes place
    pub held_on: NaiveDate,

    /// Maximum number of attending participants (None = unlimited)
    pub capacity: Option<NonZeroU32>,
}

impl Event {
    /// Create an event with unlimited capacity
    pub fn new(title: impl Into<String>, held_on: NaiveDate) -> Self {
        Self {
            id: Uuid::now_v7(),
            title: title.into(),
            held_on,
            capacity: None,
        }
    }

    /// Cap the number of attending participants
    pub fn with_capacity(mut self, capacity: NonZeroU32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Use a specific id
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Whether the event happened before `today`
    ///
    /// An event held today is not past.
    pub fn is_past_on(&self, today: NaiveDate) -> bool {
        self.held_on < today
    }

    /// Whether the event happened before the current UTC date
    pub fn is_past(&self) -> bool {
        self.is_past_on(Utc::now().date_naive())
    }

    /// Whether `attending` participants fill the event
    pub fn is_at_capacity(&self, attending: u32) -> bool {
        match self.capacity {
            Some(capacity) => attending >= capacity.get(),
            None => false,
        }
    }

    /// Free attending slots, or None when capacity is unlimited
    pub fn remaining_slots(&self, attending: u32) -> Option<u32> {
        self.capacity
            .map(|capacity| capacity.get().saturating_sub(attending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn capacity(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn test_is_past_on() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();

        let last_week = Event::new("Jam", today - Duration::days(7));
        let same_day = Event::new("Jam", today);
        let next_week = Event::new("Jam", today + Duration::days(7));

        assert!(last_week.is_past_on(today));
        assert!(!same_day.is_past_on(today));
        assert!(!next_week.is_past_on(today));
    }

    #[test]
    fn test_unlimited_capacity_is_never_full() {
        let event = Event::new("Open jam", Utc::now().date_naive());

        assert!(!event.is_at_capacity(0));
        assert!(!event.is_at_capacity(10_000));
        assert_eq!(event.remaining_slots(42), None);
    }

    #[test]
    fn test_at_capacity() {
        let event = Event::new("Small jam", Utc::now().date_naive()).with_capacity(capacity(2));

        assert!(!event.is_at_capacity(0));
        assert!(!event.is_at_capacity(1));
        assert!(event.is_at_capacity(2));
        assert!(event.is_at_capacity(3));

        assert_eq!(event.remaining_slots(1), Some(1));
        assert_eq!(event.remaining_slots(5), Some(0));
    }

    #[test]
    fn test_serialization() {
        let event = Event::new("Jam", NaiveDate::from_ymd_opt(2026, 3, 14).unwrap())
            .with_capacity(capacity(20));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["held_on"], "2026-03-14");
        assert_eq!(json["capacity"], 20);

        let parsed: Event = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }
}

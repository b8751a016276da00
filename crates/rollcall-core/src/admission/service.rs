//! Admission API

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::gate::{self, Admission};
use super::sequencer::{assign_next_position, compact_after, verify_dense};
use crate::config::AdmissionConfig;
use crate::directory::EventDirectory;
use crate::error::AdmissionError;
use crate::model::{Attendance, AttendanceStatus, Event, Role, RsvpStatus, StatusKind};
use crate::persistence::AttendanceLedger;
use crate::worker::PromotionQueue;

/// Outcome of a successful cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    /// The record as it was just before removal
    pub attendance: Attendance,

    /// Whether a promotion was queued for the freed seat
    pub promotion_scheduled: bool,
}

/// Everyone registered for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub event: Event,

    /// Attending records in registration order
    pub attending: Vec<Attendance>,

    /// Waitlisted records by position
    pub waitlist: Vec<Attendance>,

    pub attending_count: u32,
    pub waitlist_len: u32,

    /// None when capacity is unlimited
    pub remaining_slots: Option<u32>,
    pub is_at_capacity: bool,
}

/// Entry point for registering, cancelling and querying RSVPs
///
/// # Example
///
/// ```ignore
/// let (queue, receiver) = PromotionQueue::new();
/// let service = AdmissionService::new(ledger, directory, queue, AdmissionConfig::from_env());
///
/// let attendance = service.register(user_id, event_id).await?;
/// let cancellation = service.cancel(user_id, event_id).await?;
/// ```
#[derive(Clone)]
pub struct AdmissionService {
    ledger: Arc<dyn AttendanceLedger>,
    directory: Arc<dyn EventDirectory>,
    queue: PromotionQueue,
    config: AdmissionConfig,
}

impl AdmissionService {
    pub fn new(
        ledger: Arc<dyn AttendanceLedger>,
        directory: Arc<dyn EventDirectory>,
        queue: PromotionQueue,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            ledger,
            directory,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Register a user as an attendee
    pub async fn register(
        &self,
        user_id: Uuid,
        event_id: Uuid,
    ) -> Result<Attendance, AdmissionError> {
        self.register_as(user_id, event_id, Role::Attendee).await
    }

    /// Register a user with an explicit role
    ///
    /// The user gets a seat if one is free, otherwise the next waitlist
    /// position. Capacity check, position assignment and insert happen in
    /// one event section.
    #[instrument(skip(self))]
    pub async fn register_as(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        role: Role,
    ) -> Result<Attendance, AdmissionError> {
        let event = self
            .directory
            .get_event(event_id)
            .await?
            .ok_or(AdmissionError::EventNotFound(event_id))?;

        if event.is_past() {
            debug!(%event_id, %user_id, held_on = %event.held_on, "rejected registration for past event");
            return Err(AdmissionError::PastEvent {
                event_id,
                held_on: event.held_on,
            });
        }

        let mut section = self
            .ledger
            .lock_event(event_id, self.config.lock_timeout)
            .await?;

        let status = match gate::decide(section.as_mut(), &event).await? {
            Admission::Attending => AttendanceStatus::Attending,
            Admission::Waitlisted => AttendanceStatus::Waitlisted {
                position: assign_next_position(section.as_mut()).await?,
            },
        };

        let attendance = match section.insert(user_id, status, Some(role)).await {
            Ok(attendance) => attendance,
            Err(e) => {
                debug!(%event_id, %user_id, "registration rejected: {}", e);
                return Err(e.into());
            }
        };

        if status.is_waitlisted() {
            verify_dense(section.as_mut()).await?;
        }
        section.commit().await?;

        info!(
            %event_id,
            %user_id,
            attendance_id = %attendance.id,
            status = %status.kind(),
            position = ?status.waitlist_position(),
            "registered"
        );
        Ok(attendance)
    }

    /// Withdraw a user's registration
    ///
    /// A freed seat is handed to the promotion queue after commit; a freed
    /// waitlist spot is compacted inside the same section as the removal.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        user_id: Uuid,
        event_id: Uuid,
    ) -> Result<Cancellation, AdmissionError> {
        let mut section = self
            .ledger
            .lock_event(event_id, self.config.lock_timeout)
            .await?;

        let attendance = match section.remove(user_id).await {
            Ok(attendance) => attendance,
            Err(e) => {
                debug!(%event_id, %user_id, "cancellation rejected: {}", e);
                return Err(e.into());
            }
        };

        if let Some(position) = attendance.status.waitlist_position() {
            compact_after(section.as_mut(), Some(position)).await?;
            verify_dense(section.as_mut()).await?;
        }
        section.commit().await?;

        let promotion_scheduled = attendance.status.is_attending() && self.schedule_promotion(event_id);

        info!(
            %event_id,
            %user_id,
            attendance_id = %attendance.id,
            status = %attendance.status.kind(),
            promotion_scheduled,
            "cancelled"
        );
        Ok(Cancellation {
            attendance,
            promotion_scheduled,
        })
    }

    /// Where a user stands for an event; never takes the event lock
    pub async fn status(&self, user_id: Uuid, event_id: Uuid) -> Result<RsvpStatus, AdmissionError> {
        let attendance = self.ledger.find(user_id, event_id).await?;
        Ok(RsvpStatus::from(attendance.as_ref()))
    }

    /// All registrations for an event with capacity figures
    #[instrument(skip(self))]
    pub async fn roster(&self, event_id: Uuid) -> Result<Roster, AdmissionError> {
        let event = self
            .directory
            .get_event(event_id)
            .await?
            .ok_or(AdmissionError::EventNotFound(event_id))?;

        let attending = self
            .ledger
            .list_by_status(event_id, StatusKind::Attending)
            .await?;
        let waitlist = self
            .ledger
            .list_by_status(event_id, StatusKind::Waitlisted)
            .await?;

        let attending_count = attending.len() as u32;
        Ok(Roster {
            remaining_slots: event.remaining_slots(attending_count),
            is_at_capacity: event.is_at_capacity(attending_count),
            attending_count,
            waitlist_len: waitlist.len() as u32,
            event,
            attending,
            waitlist,
        })
    }

    /// Look up a record by id
    pub async fn attendance(&self, attendance_id: Uuid) -> Result<Option<Attendance>, AdmissionError> {
        Ok(self.ledger.find_by_id(attendance_id).await?)
    }

    fn schedule_promotion(&self, event_id: Uuid) -> bool {
        match self.queue.enqueue(event_id) {
            Ok(()) => true,
            Err(e) => {
                // The seat stays open until the vacancy sweep fills it
                error!(%event_id, "Failed to schedule promotion: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::time::Duration;

    use chrono::{Days, Utc};

    use super::*;
    use crate::directory::InMemoryEventDirectory;
    use crate::persistence::InMemoryAttendanceLedger;
    use crate::worker::PromotionReceiver;

    struct Fixture {
        service: AdmissionService,
        directory: InMemoryEventDirectory,
        receiver: PromotionReceiver,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryAttendanceLedger::new());
        let directory = InMemoryEventDirectory::new();
        let (queue, receiver) = PromotionQueue::new();
        let service = AdmissionService::new(
            ledger,
            Arc::new(directory.clone()),
            queue,
            AdmissionConfig::default().with_lock_timeout(Duration::from_millis(200)),
        );
        Fixture {
            service,
            directory,
            receiver,
        }
    }

    fn upcoming(capacity: u32) -> Event {
        let held_on = Utc::now().date_naive() + Days::new(7);
        Event::new("Thursday jam", held_on).with_capacity(NonZeroU32::new(capacity).unwrap())
    }

    #[tokio::test]
    async fn test_register_fills_then_waitlists() {
        let fx = fixture();
        let event = upcoming(1);
        fx.directory.insert(event.clone());

        let first = fx.service.register(Uuid::now_v7(), event.id).await.unwrap();
        let second = fx.service.register(Uuid::now_v7(), event.id).await.unwrap();

        assert_eq!(first.status, AttendanceStatus::Attending);
        assert_eq!(first.role, Some(Role::Attendee));
        assert_eq!(second.status, AttendanceStatus::Waitlisted { position: 1 });
    }

    #[tokio::test]
    async fn test_register_as_keeps_role() {
        let fx = fixture();
        let event = upcoming(5);
        fx.directory.insert(event.clone());

        let attendance = fx
            .service
            .register_as(Uuid::now_v7(), event.id, Role::Speaker)
            .await
            .unwrap();
        assert_eq!(attendance.role, Some(Role::Speaker));
    }

    #[tokio::test]
    async fn test_register_unknown_event() {
        let fx = fixture();
        let event_id = Uuid::now_v7();

        let err = fx.service.register(Uuid::now_v7(), event_id).await.unwrap_err();
        assert!(matches!(err, AdmissionError::EventNotFound(id) if id == event_id));
    }

    #[tokio::test]
    async fn test_event_today_is_open() {
        let fx = fixture();
        let event = Event::new("Tonight", Utc::now().date_naive());
        fx.directory.insert(event.clone());

        assert!(fx.service.register(Uuid::now_v7(), event.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_attending_schedules_promotion() {
        let mut fx = fixture();
        let event = upcoming(1);
        fx.directory.insert(event.clone());
        let user_id = Uuid::now_v7();
        fx.service.register(user_id, event.id).await.unwrap();

        let cancellation = fx.service.cancel(user_id, event.id).await.unwrap();
        assert!(cancellation.promotion_scheduled);
        assert_eq!(fx.receiver.recv().await.unwrap().event_id, event.id);
        assert_eq!(
            fx.service.status(user_id, event.id).await.unwrap(),
            RsvpStatus::NotRegistered
        );
    }

    #[tokio::test]
    async fn test_cancel_waitlisted_compacts_without_promotion() {
        let fx = fixture();
        let event = upcoming(1);
        fx.directory.insert(event.clone());
        let users: Vec<Uuid> = (0..4).map(|_| Uuid::now_v7()).collect();
        for user_id in &users {
            fx.service.register(*user_id, event.id).await.unwrap();
        }

        let cancellation = fx.service.cancel(users[1], event.id).await.unwrap();
        assert!(!cancellation.promotion_scheduled);
        assert_eq!(
            cancellation.attendance.status,
            AttendanceStatus::Waitlisted { position: 1 }
        );

        assert_eq!(
            fx.service.status(users[2], event.id).await.unwrap(),
            RsvpStatus::Waitlisted { position: 1 }
        );
        assert_eq!(
            fx.service.status(users[3], event.id).await.unwrap(),
            RsvpStatus::Waitlisted { position: 2 }
        );
    }

    #[tokio::test]
    async fn test_cancel_unregistered_is_not_found() {
        let fx = fixture();
        let event = upcoming(1);
        fx.directory.insert(event.clone());

        let err = fx.service.cancel(Uuid::now_v7(), event.id).await.unwrap_err();
        assert!(matches!(err, AdmissionError::NotFound { .. }));
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_cancel_reports_unscheduled_when_queue_closed() {
        let fx = fixture();
        let event = upcoming(1);
        fx.directory.insert(event.clone());
        let user_id = Uuid::now_v7();
        fx.service.register(user_id, event.id).await.unwrap();

        drop(fx.receiver);
        let cancellation = fx.service.cancel(user_id, event.id).await.unwrap();
        assert!(!cancellation.promotion_scheduled);
    }

    #[tokio::test]
    async fn test_roster() {
        let fx = fixture();
        let event = upcoming(2);
        fx.directory.insert(event.clone());
        for _ in 0..3 {
            fx.service.register(Uuid::now_v7(), event.id).await.unwrap();
        }

        let roster = fx.service.roster(event.id).await.unwrap();
        assert_eq!(roster.attending_count, 2);
        assert_eq!(roster.waitlist_len, 1);
        assert_eq!(roster.remaining_slots, Some(0));
        assert!(roster.is_at_capacity);
        assert_eq!(roster.waitlist[0].status, AttendanceStatus::Waitlisted { position: 1 });
    }

    #[tokio::test]
    async fn test_attendance_lookup() {
        let fx = fixture();
        let event = upcoming(2);
        fx.directory.insert(event.clone());
        let registered = fx.service.register(Uuid::now_v7(), event.id).await.unwrap();

        assert_eq!(
            fx.service.attendance(registered.id).await.unwrap(),
            Some(registered)
        );
        assert_eq!(fx.service.attendance(Uuid::now_v7()).await.unwrap(), None);
    }
}

//! Waitlist promotion
//!
//! Moving the waitlist head into a free seat is one atomic step: the head's
//! status change and the compaction of everyone behind it commit together
//! under the event's lock, or not at all.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::sequencer::{compact_after, verify_dense};
use crate::model::{Attendance, Event, StatusKind};
use crate::notify::{PromotionNotice, PromotionNotifier};
use crate::persistence::{AttendanceLedger, EventSection, LedgerError};

/// Promotes waitlisted records into attending seats
pub struct PromotionCoordinator {
    ledger: Arc<dyn AttendanceLedger>,
    notifier: Arc<dyn PromotionNotifier>,
    lock_timeout: Duration,
}

impl PromotionCoordinator {
    pub fn new(
        ledger: Arc<dyn AttendanceLedger>,
        notifier: Arc<dyn PromotionNotifier>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            notifier,
            lock_timeout,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn AttendanceLedger> {
        &self.ledger
    }

    /// Promote the longest-waiting record of an event into one free seat
    ///
    /// Returns Ok(None) when the waitlist is empty or the event is already
    /// full. The seat a cancellation freed may have gone to a newer
    /// registrant or to the vacancy sweep before this runs.
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn promote_next(&self, event: &Event) -> Result<Option<Attendance>, LedgerError> {
        let promoted = self.fill(event, Some(1)).await?;
        Ok(promoted.into_iter().next())
    }

    /// Promote heads until the event is full or the waitlist is empty
    ///
    /// Picks up seats whose promotion request never ran, for instance
    /// because the process stopped right after a cancellation committed.
    #[instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn fill_vacancies(&self, event: &Event) -> Result<Vec<Attendance>, LedgerError> {
        self.fill(event, None).await
    }

    async fn fill(
        &self,
        event: &Event,
        limit: Option<usize>,
    ) -> Result<Vec<Attendance>, LedgerError> {
        let mut section = self.ledger.lock_event(event.id, self.lock_timeout).await?;
        let mut promoted = Vec::new();

        while limit.map_or(true, |limit| promoted.len() < limit) {
            if event.capacity.is_some() {
                let attending = section.count_by_status(StatusKind::Attending).await?;
                if event.is_at_capacity(attending) {
                    debug!(event_id = %event.id, attending, "no free seat to promote into");
                    break;
                }
            }

            match promote_head(section.as_mut()).await? {
                Some(attendance) => promoted.push(attendance),
                None => break,
            }
        }

        if promoted.is_empty() {
            return Ok(promoted);
        }

        verify_dense(section.as_mut()).await?;
        section.commit().await?;

        for attendance in &promoted {
            info!(
                event_id = %event.id,
                attendance_id = %attendance.id,
                user_id = %attendance.user_id,
                "promoted from waitlist"
            );
            self.dispatch_notice(attendance);
        }

        Ok(promoted)
    }

    fn dispatch_notice(&self, attendance: &Attendance) {
        let Some(notice) = PromotionNotice::for_attendance(attendance) else {
            return;
        };

        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let attendance_id = notice.attendance_id;
            if let Err(e) = notifier.notify_promoted(notice).await {
                warn!(%attendance_id, "Failed to deliver promotion notice: {}", e);
            }
        });
    }
}

/// Move the head into a seat and compact the rest, inside `section`
async fn promote_head(section: &mut dyn EventSection) -> Result<Option<Attendance>, LedgerError> {
    let Some(head) = section.waitlist_head().await? else {
        return Ok(None);
    };

    let position = head.status.waitlist_position().ok_or_else(|| {
        LedgerError::invariant(format!("waitlist head {} has no position", head.id))
    })?;

    let promoted = section.mark_promoted(head.id, Utc::now()).await?;
    compact_after(section, Some(position)).await?;

    Ok(Some(promoted))
}

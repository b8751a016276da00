//! Promotion notices
//!
//! After a promotion commits, the coordinator hands a [`PromotionNotice`]
//! to a [`PromotionNotifier`] on a detached task. Delivery failures are
//! logged and never touch the promotion itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::model::Attendance;

/// "This user just got a seat"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionNotice {
    pub attendance_id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub promoted_at: DateTime<Utc>,
}

impl PromotionNotice {
    /// Build a notice from a freshly promoted record
    ///
    /// Returns None if the record was never promoted.
    pub fn for_attendance(attendance: &Attendance) -> Option<Self> {
        attendance.promoted_at.map(|promoted_at| Self {
            attendance_id: attendance.id,
            user_id: attendance.user_id,
            event_id: attendance.event_id,
            promoted_at,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The receiving side has gone away
    #[error("notification channel closed")]
    Closed,

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Downstream consumer of promotion notices (mailer, push, webhook)
#[async_trait]
pub trait PromotionNotifier: Send + Sync + 'static {
    async fn notify_promoted(&self, notice: PromotionNotice) -> Result<(), NotifyError>;
}

/// Writes each notice as a structured log line
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl PromotionNotifier for TracingNotifier {
    async fn notify_promoted(&self, notice: PromotionNotice) -> Result<(), NotifyError> {
        info!(
            attendance_id = %notice.attendance_id,
            user_id = %notice.user_id,
            event_id = %notice.event_id,
            promoted_at = %notice.promoted_at,
            "User promoted from waitlist"
        );
        Ok(())
    }
}

/// Forwards notices onto an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<PromotionNotice>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiver its notices arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PromotionNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PromotionNotifier for ChannelNotifier {
    async fn notify_promoted(&self, notice: PromotionNotice) -> Result<(), NotifyError> {
        self.tx.send(notice).map_err(|_| NotifyError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttendanceStatus;

    #[test]
    fn test_notice_requires_promotion() {
        let mut attendance = Attendance::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            AttendanceStatus::Attending,
            None,
        );
        assert!(PromotionNotice::for_attendance(&attendance).is_none());

        let now = Utc::now();
        attendance.promoted_at = Some(now);
        let notice = PromotionNotice::for_attendance(&attendance).unwrap();
        assert_eq!(notice.attendance_id, attendance.id);
        assert_eq!(notice.promoted_at, now);
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::channel();
        let notice = PromotionNotice {
            attendance_id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            event_id: Uuid::now_v7(),
            promoted_at: Utc::now(),
        };

        notifier.notify_promoted(notice.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(notice));
    }

    #[tokio::test]
    async fn test_channel_notifier_closed() {
        let (notifier, rx) = ChannelNotifier::channel();
        drop(rx);

        let result = notifier
            .notify_promoted(PromotionNotice {
                attendance_id: Uuid::now_v7(),
                user_id: Uuid::now_v7(),
                event_id: Uuid::now_v7(),
                promoted_at: Utc::now(),
            })
            .await;
        assert!(matches!(result, Err(NotifyError::Closed)));
    }
}

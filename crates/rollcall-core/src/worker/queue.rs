//! In-process promotion queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// "A seat freed up at this event"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub event_id: Uuid,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The worker side of the queue has been dropped
    #[error("promotion queue is closed")]
    Closed,
}

/// Sending half of the queue, shared by everything that frees seats
///
/// Enqueueing never blocks, so it is safe to call right after a commit on
/// the request path.
#[derive(Debug, Clone)]
pub struct PromotionQueue {
    tx: mpsc::UnboundedSender<PromotionRequest>,
}

/// Receiving half, owned by the [`PromotionWorker`](super::PromotionWorker)
#[derive(Debug)]
pub struct PromotionReceiver {
    rx: mpsc::UnboundedReceiver<PromotionRequest>,
}

impl PromotionQueue {
    /// Create a queue and its receiving half
    pub fn new() -> (Self, PromotionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, PromotionReceiver { rx })
    }

    /// Ask for one promotion at `event_id`
    pub fn enqueue(&self, event_id: Uuid) -> Result<(), QueueError> {
        self.tx
            .send(PromotionRequest {
                event_id,
                requested_at: Utc::now(),
            })
            .map_err(|_| QueueError::Closed)?;

        debug!(%event_id, "promotion requested");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PromotionReceiver {
    /// Next request; None once every sender is gone
    pub async fn recv(&mut self) -> Option<PromotionRequest> {
        self.rx.recv().await
    }
}

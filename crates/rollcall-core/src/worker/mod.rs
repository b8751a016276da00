//! Background promotion
//!
//! This module provides:
//! - [`PromotionQueue`] - Non-blocking hand-off from cancellations to the worker
//! - [`PromotionWorker`] - Concurrent, retrying consumer plus the vacancy sweep
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  enqueue(event_id)  ┌──────────────────────────────┐
//! │ AdmissionService │ ──────────────────▶ │        PromotionQueue        │
//! │    (cancel)      │                     │   (unbounded mpsc channel)   │
//! └──────────────────┘                     └──────────────┬───────────────┘
//!                                                         │
//!                                                         ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          PromotionWorker                             │
//! │  ┌──────────────────────────────┐   ┌─────────────────────────────┐  │
//! │  │ Consume loop                 │   │ Vacancy sweep (60s)         │  │
//! │  │ (Semaphore-limited, retries) │   │ events_with_waitlist →      │  │
//! │  │ get_event → promote_next     │   │ fill_vacancies(event)       │  │
//! │  └──────────────────────────────┘   └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

mod pool;
mod queue;

pub use pool::{PromotionWorker, PromotionWorkerConfig, WorkerError, WorkerStatus};
pub use queue::{PromotionQueue, PromotionReceiver, PromotionRequest, QueueError};

//! # Rollcall Core
//!
//! Capacity-limited RSVPs with a first-come, first-served waitlist.
//!
//! ## Features
//!
//! - **Per-event serialization**: every write to an event's registrations runs
//!   inside an exclusive event section, so capacity decisions and waitlist
//!   positions never race
//! - **Dense waitlist**: positions are always exactly 1..N
//! - **Atomic promotion**: the waitlist head moves into a freed seat and the
//!   rest of the queue shifts forward in a single commit
//! - **Background promotion**: cancellations hand freed seats to a worker and
//!   return immediately; a periodic sweep fills any seat that slipped through
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     AdmissionService                         │
//! │  (register / cancel / status / roster, capacity gate)       │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │ enqueue
//!            ▼                                   ▼
//! ┌──────────────────────────┐    ┌─────────────────────────────┐
//! │     AttendanceLedger     │◀───│  PromotionWorker            │
//! │  (EventSection per event │    │  → PromotionCoordinator     │
//! │   memory or PostgreSQL)  │    │  → PromotionNotifier        │
//! └──────────────────────────┘    └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_core::prelude::*;
//!
//! let ledger: Arc<dyn AttendanceLedger> = Arc::new(InMemoryAttendanceLedger::new());
//! let directory = Arc::new(InMemoryEventDirectory::new());
//! let (queue, receiver) = PromotionQueue::new();
//!
//! let coordinator = Arc::new(PromotionCoordinator::new(
//!     ledger.clone(),
//!     Arc::new(TracingNotifier),
//!     Duration::from_secs(5),
//! ));
//! let worker = PromotionWorker::new(coordinator, directory.clone(), PromotionWorkerConfig::default());
//! worker.start(receiver)?;
//!
//! let service = AdmissionService::new(ledger, directory, queue, AdmissionConfig::default());
//! let attendance = service.register(user_id, event_id).await?;
//! ```

pub mod admission;
pub mod config;
pub mod directory;
pub mod error;
pub mod model;
pub mod notify;
pub mod persistence;
pub mod reliability;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::admission::{AdmissionService, Cancellation, PromotionCoordinator, Roster};
    pub use crate::config::AdmissionConfig;
    pub use crate::directory::{EventDirectory, InMemoryEventDirectory, PostgresEventDirectory};
    pub use crate::error::AdmissionError;
    pub use crate::model::{Attendance, AttendanceStatus, Event, Role, RsvpStatus, StatusKind};
    pub use crate::notify::{ChannelNotifier, PromotionNotice, PromotionNotifier, TracingNotifier};
    pub use crate::persistence::{
        AttendanceLedger, EventSection, InMemoryAttendanceLedger, LedgerError,
        PostgresAttendanceLedger,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::worker::{PromotionQueue, PromotionWorker, PromotionWorkerConfig};
}

// Re-export key types at crate root
pub use admission::{AdmissionService, Cancellation, PromotionCoordinator, Roster};
pub use config::AdmissionConfig;
pub use directory::{DirectoryError, EventDirectory, InMemoryEventDirectory, PostgresEventDirectory};
pub use error::AdmissionError;
pub use model::{Attendance, AttendanceStatus, Event, Role, RsvpStatus, StatusKind};
pub use notify::{ChannelNotifier, NotifyError, PromotionNotice, PromotionNotifier, TracingNotifier};
pub use persistence::{
    AttendanceLedger, EventSection, InMemoryAttendanceLedger, LedgerError, PostgresAttendanceLedger,
};
pub use reliability::RetryPolicy;
pub use worker::{
    PromotionQueue, PromotionReceiver, PromotionWorker, PromotionWorkerConfig, QueueError,
    WorkerError, WorkerStatus,
};

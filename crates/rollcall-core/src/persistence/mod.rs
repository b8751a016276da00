//! Persistence layer for attendance records
//!
//! This module provides:
//! - [`AttendanceLedger`] trait for committed reads and per-event sections
//! - [`EventSection`] trait for locked, transactional writes
//! - [`InMemoryAttendanceLedger`] for testing and database-less runs
//! - [`PostgresAttendanceLedger`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryAttendanceLedger;
pub use postgres::PostgresAttendanceLedger;
pub use store::{AttendanceLedger, EventSection, LedgerError};

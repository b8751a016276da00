//! Domain types shared by the ledger, the coordinator and the admission service

mod attendance;
mod event;

pub use attendance::{Attendance, AttendanceStatus, Role, RsvpStatus, StatusKind, UnknownVariant};
pub use event::Event;

//! Admission: who gets a seat, who waits, and who moves up
//!
//! This module provides:
//! - [`gate`] - Capacity decision for a new registrant
//! - [`sequencer`] - Dense waitlist positions
//! - [`PromotionCoordinator`] - Atomic promotion of the waitlist head
//! - [`AdmissionService`] - register / cancel / status entry points

pub mod gate;
mod promotion;
pub mod sequencer;
mod service;

pub use gate::Admission;
pub use promotion::PromotionCoordinator;
pub use service::{AdmissionService, Cancellation, Roster};

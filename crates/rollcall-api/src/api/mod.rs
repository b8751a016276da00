// HTTP API routes
//
// Attendance routes carry the admission engine; common holds the error
// mapping and caller extraction they share.

pub mod attendance;
pub mod common;

// Re-export common types
pub use common::{ApiError, ErrorResponse};

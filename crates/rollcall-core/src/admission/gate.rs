//! Capacity gate

use tracing::debug;

use crate::model::{Event, StatusKind};
use crate::persistence::{EventSection, LedgerError};

/// Where a new registration lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Attending,
    Waitlisted,
}

/// Decide whether a new registrant gets a seat
///
/// Must run inside the same section that inserts the record, otherwise two
/// registrants can both see the last free seat.
pub async fn decide(
    section: &mut dyn EventSection,
    event: &Event,
) -> Result<Admission, LedgerError> {
    let Some(capacity) = event.capacity else {
        return Ok(Admission::Attending);
    };

    let attending = section.count_by_status(StatusKind::Attending).await?;
    debug!(event_id = %event.id, attending, capacity = capacity.get(), "capacity check");

    if event.is_at_capacity(attending) {
        Ok(Admission::Waitlisted)
    } else {
        Ok(Admission::Attending)
    }
}

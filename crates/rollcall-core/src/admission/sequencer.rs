//! Waitlist position bookkeeping
//!
//! Positions of an event's waitlist are always exactly 1..=N. New entries
//! take N+1; removing or promoting the entry at `p` shifts everything
//! behind it forward by one.

use tracing::{debug, error};

use crate::persistence::{EventSection, LedgerError};

/// Position for the next waitlisted registrant
pub async fn assign_next_position(section: &mut dyn EventSection) -> Result<u32, LedgerError> {
    let max = section.max_waitlist_position().await?;
    Ok(max.unwrap_or(0) + 1)
}

/// Close the gap left at `removed`
///
/// A `None` position means the removed record was not waitlisted and
/// nothing moves.
pub async fn compact_after(
    section: &mut dyn EventSection,
    removed: Option<u32>,
) -> Result<u64, LedgerError> {
    let Some(position) = removed else {
        return Ok(0);
    };

    let moved = section.shift_waitlist_after(position).await?;
    debug!(event_id = %section.event_id(), position, moved, "compacted waitlist");
    Ok(moved)
}

/// Check that positions are exactly 1..=N before the section commits
pub async fn verify_dense(section: &mut dyn EventSection) -> Result<(), LedgerError> {
    let waitlist = section.list_waitlisted().await?;

    for (index, attendance) in waitlist.iter().enumerate() {
        let expected = index as u32 + 1;
        let actual = attendance.status.waitlist_position();
        if actual != Some(expected) {
            error!(
                event_id = %section.event_id(),
                attendance_id = %attendance.id,
                expected,
                ?actual,
                "waitlist is not dense"
            );
            return Err(LedgerError::invariant(format!(
                "event {} waitlist has {:?} where position {expected} belongs",
                section.event_id(),
                actual
            )));
        }
    }

    Ok(())
}

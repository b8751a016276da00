//! Attendance records and their status

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a registration currently stands
///
/// A waitlist position exists only on the `Waitlisted` variant. Cancelled
/// registrations are deleted rather than kept with a third status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Holds one of the event's seats
    Attending,

    /// Queued for a seat; position 1 is promoted first
    Waitlisted { position: u32 },
}

impl AttendanceStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Attending => StatusKind::Attending,
            Self::Waitlisted { .. } => StatusKind::Waitlisted,
        }
    }

    pub fn waitlist_position(&self) -> Option<u32> {
        match self {
            Self::Attending => None,
            Self::Waitlisted { position } => Some(*position),
        }
    }

    pub fn is_attending(&self) -> bool {
        matches!(self, Self::Attending)
    }

    pub fn is_waitlisted(&self) -> bool {
        matches!(self, Self::Waitlisted { .. })
    }
}

/// Status without its payload, used for counting and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Attending,
    Waitlisted,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attending => "attending",
            Self::Waitlisted => "waitlisted",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attending" => Ok(Self::Attending),
            "waitlisted" => Ok(Self::Waitlisted),
            other => Err(UnknownVariant::new("status", other)),
        }
    }
}

/// What a participant does at the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Organizer,
    Attendee,
    Speaker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organizer => "organizer",
            Self::Attendee => "attendee",
            Self::Speaker => "speaker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organizer" => Ok(Self::Organizer),
            "attendee" => Ok(Self::Attendee),
            "speaker" => Ok(Self::Speaker),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

/// A stored value that matches none of the known variants
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {field} value: {value:?}")]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

/// One user's registration for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,

    #[serde(flatten)]
    pub status: AttendanceStatus,

    /// Set once, when the record left the waitlist through promotion
    pub promoted_at: Option<DateTime<Utc>>,

    pub role: Option<Role>,
    pub created_at: DateTime<Utc>,
}

impl Attendance {
    /// Build a fresh record; the ledger calls this on insert
    pub fn new(
        user_id: Uuid,
        event_id: Uuid,
        status: AttendanceStatus,
        role: Option<Role>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            event_id,
            status,
            promoted_at: None,
            role,
            created_at: Utc::now(),
        }
    }

    /// Whether the seat came from the waitlist rather than direct admission
    pub fn was_promoted(&self) -> bool {
        self.promoted_at.is_some()
    }
}

/// Answer to "where does this user stand for this event?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RsvpStatus {
    Attending,
    Waitlisted { position: u32 },
    NotRegistered,
}

impl From<Option<&Attendance>> for RsvpStatus {
    fn from(attendance: Option<&Attendance>) -> Self {
        match attendance.map(|a| a.status) {
            Some(AttendanceStatus::Attending) => Self::Attending,
            Some(AttendanceStatus::Waitlisted { position }) => Self::Waitlisted { position },
            None => Self::NotRegistered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_accessors() {
        let attending = AttendanceStatus::Attending;
        let waitlisted = AttendanceStatus::Waitlisted { position: 3 };

        assert!(attending.is_attending());
        assert_eq!(attending.waitlist_position(), None);
        assert_eq!(attending.kind(), StatusKind::Attending);

        assert!(waitlisted.is_waitlisted());
        assert_eq!(waitlisted.waitlist_position(), Some(3));
        assert_eq!(waitlisted.kind(), StatusKind::Waitlisted);
    }

    #[test]
    fn test_parse_status_kind() {
        assert_eq!("attending".parse::<StatusKind>(), Ok(StatusKind::Attending));
        assert_eq!("waitlisted".parse::<StatusKind>(), Ok(StatusKind::Waitlisted));

        let err = "cancelled".parse::<StatusKind>().unwrap_err();
        assert_eq!(err.field, "status");
        assert_eq!(err.value, "cancelled");
    }

    #[test]
    fn test_parse_role() {
        for role in [Role::Organizer, Role::Attendee, Role::Speaker] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("invalid_role".parse::<Role>().is_err());
    }

    #[test]
    fn test_attendance_json_shape() {
        let user_id = Uuid::now_v7();
        let event_id = Uuid::now_v7();
        let attendance = Attendance::new(
            user_id,
            event_id,
            AttendanceStatus::Waitlisted { position: 2 },
            Some(Role::Attendee),
        );

        let value = serde_json::to_value(&attendance).unwrap();
        assert_eq!(value["status"], json!("waitlisted"));
        assert_eq!(value["position"], json!(2));
        assert_eq!(value["role"], json!("attendee"));
        assert_eq!(value["promoted_at"], json!(null));

        let parsed: Attendance = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, attendance);
    }

    #[test]
    fn test_attending_json_has_no_position() {
        let attendance = Attendance::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            AttendanceStatus::Attending,
            None,
        );

        let value = serde_json::to_value(&attendance).unwrap();
        assert_eq!(value["status"], json!("attending"));
        assert!(value.get("position").is_none());
        assert!(!attendance.was_promoted());
    }

    #[test]
    fn test_rsvp_status_from_attendance() {
        let waitlisted = Attendance::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            AttendanceStatus::Waitlisted { position: 1 },
            None,
        );

        assert_eq!(
            RsvpStatus::from(Some(&waitlisted)),
            RsvpStatus::Waitlisted { position: 1 }
        );
        assert_eq!(RsvpStatus::from(None), RsvpStatus::NotRegistered);
        assert_eq!(
            serde_json::to_value(RsvpStatus::NotRegistered).unwrap(),
            json!({"status": "not_registered"})
        );
    }
}

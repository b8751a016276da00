//! PostgreSQL implementation of AttendanceLedger
//!
//! Production persistence using PostgreSQL with:
//! - One transaction per event section
//! - Per-event row lock on `attendance_event_locks`, bounded by `lock_timeout`
//! - Unique (user_id, event_id) constraint for the single-RSVP rule

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::model::{Attendance, AttendanceStatus, Role, StatusKind};

/// SQLSTATE raised when `lock_timeout` expires
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// SQLSTATE for unique constraint violations
const UNIQUE_VIOLATION: &str = "23505";

const ATTENDANCE_COLUMNS: &str =
    "id, user_id, event_id, status, waitlist_position, promoted_at, role, created_at";

/// PostgreSQL implementation of AttendanceLedger
///
/// # Example
///
/// ```ignore
/// use rollcall_core::PostgresAttendanceLedger;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/rollcall").await?;
/// let ledger = PostgresAttendanceLedger::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresAttendanceLedger {
    pool: PgPool,
}

impl PostgresAttendanceLedger {
    /// Create a new PostgreSQL ledger with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn open_section(
        &self,
        event_id: Uuid,
        timeout: Duration,
    ) -> Result<PostgresEventSection, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", timeout.as_millis().max(1)))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO attendance_event_locks (event_id)
            VALUES ($1)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| lock_error(e, event_id, timeout))?;

        sqlx::query("SELECT event_id FROM attendance_event_locks WHERE event_id = $1 FOR UPDATE")
            .bind(event_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| lock_error(e, event_id, timeout))?;

        Ok(PostgresEventSection { event_id, tx })
    }
}

/// Row shape shared by every attendance query
#[derive(Debug, sqlx::FromRow)]
struct AttendanceRow {
    id: Uuid,
    user_id: Uuid,
    event_id: Uuid,
    status: String,
    waitlist_position: Option<i32>,
    promoted_at: Option<DateTime<Utc>>,
    role: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AttendanceRow> for Attendance {
    type Error = LedgerError;

    fn try_from(row: AttendanceRow) -> Result<Self, Self::Error> {
        let kind: StatusKind = row
            .status
            .parse()
            .map_err(|e| LedgerError::invariant(format!("attendance {}: {e}", row.id)))?;

        let status = match (kind, row.waitlist_position) {
            (StatusKind::Attending, None) => AttendanceStatus::Attending,
            (StatusKind::Waitlisted, Some(position)) if position > 0 => {
                AttendanceStatus::Waitlisted {
                    position: position as u32,
                }
            }
            (kind, position) => {
                error!(attendance_id = %row.id, %kind, ?position, "status and waitlist position disagree");
                return Err(LedgerError::invariant(format!(
                    "attendance {} is {kind} with waitlist position {position:?}",
                    row.id
                )));
            }
        };

        let role = row
            .role
            .as_deref()
            .map(str::parse::<Role>)
            .transpose()
            .map_err(|e| LedgerError::invariant(format!("attendance {}: {e}", row.id)))?;

        Ok(Attendance {
            id: row.id,
            user_id: row.user_id,
            event_id: row.event_id,
            status,
            promoted_at: row.promoted_at,
            role,
            created_at: row.created_at,
        })
    }
}

fn db_error(e: sqlx::Error) -> LedgerError {
    error!("Ledger database error: {}", e);
    LedgerError::Database(e.to_string())
}

fn sqlstate(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}

fn lock_error(e: sqlx::Error, event_id: Uuid, timeout: Duration) -> LedgerError {
    if sqlstate(&e).as_deref() == Some(LOCK_NOT_AVAILABLE) {
        LedgerError::Contended {
            event_id,
            waited: timeout,
        }
    } else {
        db_error(e)
    }
}

fn into_attendances(rows: Vec<AttendanceRow>) -> Result<Vec<Attendance>, LedgerError> {
    rows.into_iter().map(Attendance::try_from).collect()
}

fn position_param(position: u32) -> Result<i32, LedgerError> {
    i32::try_from(position)
        .map_err(|_| LedgerError::invariant(format!("waitlist position {position} out of range")))
}

#[async_trait]
impl AttendanceLedger for PostgresAttendanceLedger {
    #[instrument(skip(self))]
    async fn lock_event(
        &self,
        event_id: Uuid,
        timeout: Duration,
    ) -> Result<Box<dyn EventSection>, LedgerError> {
        // lock_timeout bounds the row lock; the outer timeout also covers pool checkout
        let section = tokio::time::timeout(timeout, self.open_section(event_id, timeout))
            .await
            .map_err(|_| LedgerError::Contended {
                event_id,
                waited: timeout,
            })??;

        debug!(%event_id, "entered event section");
        Ok(Box::new(section))
    }

    #[instrument(skip(self))]
    async fn find(
        &self,
        user_id: Uuid,
        event_id: Uuid,
    ) -> Result<Option<Attendance>, LedgerError> {
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendances WHERE user_id = $1 AND event_id = $2"
        ))
        .bind(user_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Attendance::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, attendance_id: Uuid) -> Result<Option<Attendance>, LedgerError> {
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendances WHERE id = $1"
        ))
        .bind(attendance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Attendance::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn count_by_status(
        &self,
        event_id: Uuid,
        kind: StatusKind,
    ) -> Result<u32, LedgerError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM attendances WHERE event_id = $1 AND status = $2",
        )
        .bind(event_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.get::<i64, _>("count") as u32)
    }

    #[instrument(skip(self))]
    async fn list_by_status(
        &self,
        event_id: Uuid,
        kind: StatusKind,
    ) -> Result<Vec<Attendance>, LedgerError> {
        let order = match kind {
            StatusKind::Waitlisted => "waitlist_position",
            StatusKind::Attending => "created_at, id",
        };
        let rows = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendances \
             WHERE event_id = $1 AND status = $2 ORDER BY {order}"
        ))
        .bind(event_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        into_attendances(rows)
    }

    #[instrument(skip(self))]
    async fn events_with_waitlist(&self) -> Result<Vec<Uuid>, LedgerError> {
        let rows = sqlx::query(
            "SELECT DISTINCT event_id FROM attendances WHERE status = 'waitlisted'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.iter().map(|row| row.get("event_id")).collect())
    }
}

/// Section backed by an open transaction holding the event's lock row
struct PostgresEventSection {
    event_id: Uuid,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl EventSection for PostgresEventSection {
    fn event_id(&self) -> Uuid {
        self.event_id
    }

    async fn insert(
        &mut self,
        user_id: Uuid,
        status: AttendanceStatus,
        role: Option<Role>,
    ) -> Result<Attendance, LedgerError> {
        let position = status.waitlist_position().map(position_param).transpose()?;

        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            r#"
            INSERT INTO attendances (id, user_id, event_id, status, waitlist_position, role)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ATTENDANCE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(self.event_id)
        .bind(status.kind().as_str())
        .bind(position)
        .bind(role.map(|r| r.as_str()))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if sqlstate(&e).as_deref() == Some(UNIQUE_VIOLATION) {
                LedgerError::Duplicate {
                    user_id,
                    event_id: self.event_id,
                }
            } else {
                db_error(e)
            }
        })?;

        Attendance::try_from(row)
    }

    async fn remove(&mut self, user_id: Uuid) -> Result<Attendance, LedgerError> {
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            r#"
            DELETE FROM attendances
            WHERE event_id = $1 AND user_id = $2
            RETURNING {ATTENDANCE_COLUMNS}
            "#
        ))
        .bind(self.event_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?
        .ok_or(LedgerError::NotFound {
            user_id,
            event_id: self.event_id,
        })?;

        Attendance::try_from(row)
    }

    async fn count_by_status(&mut self, kind: StatusKind) -> Result<u32, LedgerError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM attendances WHERE event_id = $1 AND status = $2",
        )
        .bind(self.event_id)
        .bind(kind.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(row.get::<i64, _>("count") as u32)
    }

    async fn list_waitlisted(&mut self) -> Result<Vec<Attendance>, LedgerError> {
        let rows = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendances \
             WHERE event_id = $1 AND status = 'waitlisted' ORDER BY waitlist_position"
        ))
        .bind(self.event_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;

        into_attendances(rows)
    }

    async fn max_waitlist_position(&mut self) -> Result<Option<u32>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT MAX(waitlist_position) AS max_position
            FROM attendances
            WHERE event_id = $1 AND status = 'waitlisted'
            "#,
        )
        .bind(self.event_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;

        let max: Option<i32> = row.get("max_position");
        Ok(max.map(|p| p as u32))
    }

    async fn waitlist_head(&mut self) -> Result<Option<Attendance>, LedgerError> {
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendances \
             WHERE event_id = $1 AND status = 'waitlisted' \
             ORDER BY waitlist_position LIMIT 1 FOR UPDATE"
        ))
        .bind(self.event_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        row.map(Attendance::try_from).transpose()
    }

    async fn mark_promoted(
        &mut self,
        attendance_id: Uuid,
        promoted_at: DateTime<Utc>,
    ) -> Result<Attendance, LedgerError> {
        let row = sqlx::query_as::<_, AttendanceRow>(&format!(
            r#"
            UPDATE attendances
            SET status = 'attending', waitlist_position = NULL, promoted_at = $3
            WHERE id = $1 AND event_id = $2 AND status = 'waitlisted' AND promoted_at IS NULL
            RETURNING {ATTENDANCE_COLUMNS}
            "#
        ))
        .bind(attendance_id)
        .bind(self.event_id)
        .bind(promoted_at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| {
            LedgerError::invariant(format!(
                "attendance {attendance_id} is not a waitlisted record of event {}",
                self.event_id
            ))
        })?;

        Attendance::try_from(row)
    }

    async fn shift_waitlist_after(&mut self, position: u32) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE attendances
            SET waitlist_position = waitlist_position - 1
            WHERE event_id = $1 AND status = 'waitlisted' AND waitlist_position > $2
            "#,
        )
        .bind(self.event_id)
        .bind(position_param(position)?)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let event_id = self.event_id;
        self.tx.commit().await.map_err(db_error)?;

        debug!(%event_id, "committed event section");
        Ok(())
    }
}

//! In-memory implementation of AttendanceLedger

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::store::*;
use crate::model::{Attendance, AttendanceStatus, Role, StatusKind};

/// One event's records, keyed by user id
type EventTable = HashMap<Uuid, Attendance>;

/// Committed records of every event
type Tables = Arc<RwLock<HashMap<Uuid, EventTable>>>;

/// Per-event locks; an entry lives only while a section holds or awaits it
type EventLocks = Arc<DashMap<Uuid, Arc<Mutex<()>>>>;

/// In-memory implementation of AttendanceLedger
///
/// Each event gets its own async mutex, so sections for different events
/// never wait on each other. A section works on a private copy of its
/// event's table and swaps it in on commit, which keeps readers on the last
/// committed state.
///
/// # Example
///
/// ```
/// use rollcall_core::InMemoryAttendanceLedger;
///
/// let ledger = InMemoryAttendanceLedger::new();
/// assert_eq!(ledger.record_count(), 0);
/// ```
pub struct InMemoryAttendanceLedger {
    tables: Tables,
    locks: EventLocks,
}

impl InMemoryAttendanceLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Total number of committed records
    pub fn record_count(&self) -> usize {
        self.tables.read().values().map(HashMap::len).sum()
    }

    fn event_lock(&self, event_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(event_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn snapshot<T>(&self, event_id: Uuid, f: impl FnOnce(&EventTable) -> T) -> T {
        let tables = self.tables.read();
        match tables.get(&event_id) {
            Some(table) => f(table),
            None => f(&EventTable::new()),
        }
    }
}

impl Default for InMemoryAttendanceLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_status(table: &EventTable, kind: StatusKind) -> Vec<Attendance> {
    let mut records: Vec<Attendance> = table
        .values()
        .filter(|a| a.status.kind() == kind)
        .cloned()
        .collect();

    match kind {
        StatusKind::Waitlisted => records.sort_by_key(|a| a.status.waitlist_position()),
        StatusKind::Attending => records.sort_by_key(|a| (a.created_at, a.id)),
    }
    records
}

fn count_status(table: &EventTable, kind: StatusKind) -> u32 {
    table.values().filter(|a| a.status.kind() == kind).count() as u32
}

#[async_trait]
impl AttendanceLedger for InMemoryAttendanceLedger {
    async fn lock_event(
        &self,
        event_id: Uuid,
        timeout: Duration,
    ) -> Result<Box<dyn EventSection>, LedgerError> {
        let lock = self.event_lock(event_id);
        let guard = tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| LedgerError::Contended {
                event_id,
                waited: timeout,
            })?;

        let staged = self
            .tables
            .read()
            .get(&event_id)
            .cloned()
            .unwrap_or_default();

        debug!(%event_id, "entered event section");
        Ok(Box::new(InMemoryEventSection {
            event_id,
            staged,
            tables: Arc::clone(&self.tables),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }))
    }

    async fn find(
        &self,
        user_id: Uuid,
        event_id: Uuid,
    ) -> Result<Option<Attendance>, LedgerError> {
        Ok(self.snapshot(event_id, |table| table.get(&user_id).cloned()))
    }

    async fn find_by_id(&self, attendance_id: Uuid) -> Result<Option<Attendance>, LedgerError> {
        let tables = self.tables.read();
        Ok(tables
            .values()
            .flat_map(HashMap::values)
            .find(|a| a.id == attendance_id)
            .cloned())
    }

    async fn count_by_status(
        &self,
        event_id: Uuid,
        kind: StatusKind,
    ) -> Result<u32, LedgerError> {
        Ok(self.snapshot(event_id, |table| count_status(table, kind)))
    }

    async fn list_by_status(
        &self,
        event_id: Uuid,
        kind: StatusKind,
    ) -> Result<Vec<Attendance>, LedgerError> {
        Ok(self.snapshot(event_id, |table| sorted_by_status(table, kind)))
    }

    async fn events_with_waitlist(&self) -> Result<Vec<Uuid>, LedgerError> {
        let tables = self.tables.read();
        Ok(tables
            .iter()
            .filter(|(_, table)| table.values().any(|a| a.status.is_waitlisted()))
            .map(|(event_id, _)| *event_id)
            .collect())
    }
}

/// Section over a staged copy of one event's table
struct InMemoryEventSection {
    event_id: Uuid,
    staged: EventTable,
    tables: Tables,
    locks: EventLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InMemoryEventSection {
    fn drop(&mut self) {
        // Only the map and this guard still reference the mutex: nobody is waiting
        self.locks
            .remove_if(&self.event_id, |_, lock| Arc::strong_count(lock) == 2);
        self.guard.take();
    }
}

#[async_trait]
impl EventSection for InMemoryEventSection {
    fn event_id(&self) -> Uuid {
        self.event_id
    }

    async fn insert(
        &mut self,
        user_id: Uuid,
        status: AttendanceStatus,
        role: Option<Role>,
    ) -> Result<Attendance, LedgerError> {
        if self.staged.contains_key(&user_id) {
            return Err(LedgerError::Duplicate {
                user_id,
                event_id: self.event_id,
            });
        }

        let attendance = Attendance::new(user_id, self.event_id, status, role);
        self.staged.insert(user_id, attendance.clone());
        Ok(attendance)
    }

    async fn remove(&mut self, user_id: Uuid) -> Result<Attendance, LedgerError> {
        self.staged.remove(&user_id).ok_or(LedgerError::NotFound {
            user_id,
            event_id: self.event_id,
        })
    }

    async fn count_by_status(&mut self, kind: StatusKind) -> Result<u32, LedgerError> {
        Ok(count_status(&self.staged, kind))
    }

    async fn list_waitlisted(&mut self) -> Result<Vec<Attendance>, LedgerError> {
        Ok(sorted_by_status(&self.staged, StatusKind::Waitlisted))
    }

    async fn max_waitlist_position(&mut self) -> Result<Option<u32>, LedgerError> {
        Ok(self
            .staged
            .values()
            .filter_map(|a| a.status.waitlist_position())
            .max())
    }

    async fn waitlist_head(&mut self) -> Result<Option<Attendance>, LedgerError> {
        Ok(self
            .staged
            .values()
            .filter(|a| a.status.is_waitlisted())
            .min_by_key(|a| a.status.waitlist_position())
            .cloned())
    }

    async fn mark_promoted(
        &mut self,
        attendance_id: Uuid,
        promoted_at: DateTime<Utc>,
    ) -> Result<Attendance, LedgerError> {
        let attendance = self
            .staged
            .values_mut()
            .find(|a| a.id == attendance_id)
            .ok_or(LedgerError::AttendanceNotFound(attendance_id))?;

        if !attendance.status.is_waitlisted() || attendance.promoted_at.is_some() {
            return Err(LedgerError::invariant(format!(
                "attendance {attendance_id} cannot be promoted from {:?}",
                attendance.status
            )));
        }

        attendance.status = AttendanceStatus::Attending;
        attendance.promoted_at = Some(promoted_at);
        Ok(attendance.clone())
    }

    async fn shift_waitlist_after(&mut self, position: u32) -> Result<u64, LedgerError> {
        let mut moved = 0;
        for attendance in self.staged.values_mut() {
            if let AttendanceStatus::Waitlisted { position: current } = attendance.status {
                if current > position {
                    attendance.status = AttendanceStatus::Waitlisted {
                        position: current - 1,
                    };
                    moved += 1;
                }
            }
        }
        Ok(moved)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let mut section = self;
        let event_id = section.event_id;
        let staged = std::mem::take(&mut section.staged);

        let mut tables = section.tables.write();
        if staged.is_empty() {
            tables.remove(&event_id);
        } else {
            tables.insert(event_id, staged);
        }
        drop(tables);

        debug!(%event_id, "committed event section");
        Ok(())
    }
}

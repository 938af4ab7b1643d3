//! Ledger of in-flight mutations, at most one per work item.
//!
//! Each entry remembers where the item came from (for rollback), where it was
//! optimistically placed, when the remote call must have answered by, and the
//! newest remote record that arrived for the item while the call was in
//! flight. Remote state never overwrites an entry's optimistic placement; it
//! waits here until the mutation resolves.

#[cfg(test)]
#[path = "pending_test.rs"]
mod pending_test;

use std::collections::HashMap;
use std::time::Instant;

use uuid::Uuid;

use crate::error::SyncError;
use crate::item::{Slot, Status, WorkItem, WorkItemId};

/// Handle for one issued remote mutation. Replies carrying a superseded
/// ticket are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub seq: u64,
    /// Sent to the Mutation API as an idempotency key.
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Committed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub id: WorkItemId,
    pub ticket: Ticket,
    /// Optimistic placement.
    pub target: Slot,
    /// Placement before the move.
    pub rollback: Slot,
    pub issued_at: Instant,
    pub deadline: Instant,
    pub outcome: Outcome,
    /// Newest remote record received while in flight.
    pub queued_remote: Option<WorkItem>,
    /// Another client deleted the item while in flight.
    pub removed_remotely: bool,
}

impl PendingMutation {
    #[must_use]
    pub fn target_status(&self) -> Status {
        self.target.status
    }
}

#[derive(Debug, Default)]
pub struct PendingLedger {
    entries: HashMap<WorkItemId, PendingMutation>,
    next_seq: u64,
}

impl PendingLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight mutation.
    ///
    /// # Errors
    ///
    /// [`SyncError::DuplicateMutation`] if the same target status is already
    /// in flight, [`SyncError::Busy`] if a different one is.
    pub fn insert(
        &mut self,
        id: &WorkItemId,
        target: Slot,
        rollback: Slot,
        issued_at: Instant,
        deadline: Instant,
    ) -> Result<Ticket, SyncError> {
        self.check_free(id, target.status)?;
        self.next_seq += 1;
        let ticket = Ticket { seq: self.next_seq, request_id: Uuid::new_v4() };
        self.entries.insert(
            id.clone(),
            PendingMutation {
                id: id.clone(),
                ticket,
                target,
                rollback,
                issued_at,
                deadline,
                outcome: Outcome::Pending,
                queued_remote: None,
                removed_remotely: false,
            },
        );
        Ok(ticket)
    }

    /// Whether a new mutation toward `status` may be registered for `id`.
    ///
    /// # Errors
    ///
    /// Same as [`PendingLedger::insert`].
    pub fn check_free(&self, id: &WorkItemId, status: Status) -> Result<(), SyncError> {
        match self.entries.get(id) {
            Some(entry) if entry.target_status() == status => {
                Err(SyncError::DuplicateMutation { id: id.clone(), status })
            }
            Some(_) => Err(SyncError::Busy(id.clone())),
            None => Ok(()),
        }
    }

    /// Remove and return the entry if `ticket` is still the current one.
    pub fn resolve(&mut self, id: &WorkItemId, ticket: Ticket, outcome: Outcome) -> Option<PendingMutation> {
        if self.entries.get(id).is_none_or(|entry| entry.ticket != ticket) {
            return None;
        }
        let mut entry = self.entries.remove(id)?;
        entry.outcome = outcome;
        Some(entry)
    }

    /// Park a remote record behind the in-flight mutation. Newest by server
    /// timestamp wins. Returns `false` if nothing is in flight for the id.
    pub fn queue_remote(&mut self, item: WorkItem) -> bool {
        let Some(entry) = self.entries.get_mut(&item.id) else {
            return false;
        };
        let replace = entry
            .queued_remote
            .as_ref()
            .is_none_or(|queued| item.supersedes(queued));
        if replace {
            entry.queued_remote = Some(item);
        }
        true
    }

    /// Record a remote deletion behind the in-flight mutation.
    pub fn queue_removal(&mut self, id: &WorkItemId) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.removed_remotely = true;
        entry.queued_remote = None;
        true
    }

    /// Ids whose deadline has passed, oldest issue first.
    #[must_use]
    pub fn expired(&self, now: Instant) -> Vec<(WorkItemId, Ticket)> {
        let mut expired: Vec<&PendingMutation> = self.entries.values().filter(|e| now >= e.deadline).collect();
        expired.sort_by_key(|e| e.issued_at);
        expired.into_iter().map(|e| (e.id.clone(), e.ticket)).collect()
    }

    /// Earliest deadline among in-flight mutations.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.deadline).min()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: &WorkItemId) -> Option<&PendingMutation> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &WorkItemId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingMutation> {
        self.entries.values_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Mutation coordinator: optimistic moves and their remote confirmation.
//!
//! DESIGN
//! ======
//! A `MoveRequested` is applied to the store immediately, the item is held
//! against remote merges, and a [`MutationRequest`] is handed back for the
//! caller to send. The reply (or the timeout) resolves the entry:
//!
//! - success: release the hold, merge the canonical record, then any remote
//!   record that queued up behind the mutation (newest wins);
//! - failure: move the item back to its pre-move slot, release, merge queued
//!   remote state, and queue a user-facing [`Notice`].
//!
//! ERROR HANDLING
//! ==============
//! Duplicate requests are suppressed with `DuplicateMutation` and never
//! surfaced. Replies for superseded tickets are ignored, so a reply that
//! lands after its timeout cannot undo the rollback.

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod coordinator_test;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{ErrorCode, SyncError};
use crate::item::{Status, WorkItem, WorkItemId};
use crate::pending::{Outcome, PendingLedger, PendingMutation, Ticket};
use crate::session::MoveRequested;
use crate::store::BoardStore;

/// A remote status change the caller must send to the Mutation API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub ticket: Ticket,
    pub id: WorkItemId,
    pub status: Status,
}

/// A user-facing message about a failed move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: WorkItemId,
    pub code: &'static str,
    pub message: String,
}

/// How a mutation reply was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Confirmed and merged.
    Committed,
    /// Rejected or timed out; the item is back in its original slot.
    RolledBack(SyncError),
    /// The item was deleted remotely while in flight and is now gone.
    Removed,
    /// The ticket was superseded; nothing changed.
    Ignored,
}

pub struct MutationCoordinator {
    ledger: PendingLedger,
    recent: HashMap<WorkItemId, (Status, Instant)>,
    notices: VecDeque<Notice>,
    debounce: Duration,
    timeout: Duration,
}

impl MutationCoordinator {
    #[must_use]
    pub fn new(debounce: Duration, timeout: Duration) -> Self {
        Self { ledger: PendingLedger::new(), recent: HashMap::new(), notices: VecDeque::new(), debounce, timeout }
    }

    // --- Requests ---

    /// Apply a move optimistically and register it as pending.
    ///
    /// # Errors
    ///
    /// - [`SyncError::DuplicateMutation`] for a repeat of an in-flight or
    ///   just-issued move (silently suppressed by callers);
    /// - [`SyncError::Busy`] when a different move is in flight;
    /// - [`SyncError::StaleData`] when the item is no longer on the board.
    pub fn request_move(
        &mut self,
        request: &MoveRequested,
        store: &mut BoardStore,
        now: Instant,
    ) -> Result<MutationRequest, SyncError> {
        let id = &request.id;
        let status = request.dest.status;
        self.ledger.check_free(id, status)?;
        self.prune_recent(now);
        if self.recent.get(id).is_some_and(|(recent_status, _)| *recent_status == status) {
            info!(%id, %status, dropped_index = request.dest.index, "repeat move inside debounce window suppressed");
            return Err(SyncError::DuplicateMutation { id: id.clone(), status });
        }

        let rollback = match store.move_item(id, status, request.dest.index) {
            Ok(slot) => slot,
            Err(SyncError::UnknownItem(_)) => return Err(SyncError::StaleData(id.clone())),
            Err(err) => return Err(err),
        };
        let target = store.slot_of(id).unwrap_or(request.dest);
        let ticket = self.ledger.insert(id, target, rollback, now, now + self.timeout)?;
        store.hold(id);
        self.recent.insert(id.clone(), (status, now));
        info!(%id, from = %rollback, to = %target, seq = ticket.seq, "optimistic move");
        Ok(MutationRequest { ticket, id: id.clone(), status })
    }

    // --- Replies ---

    /// The Mutation API confirmed the move with the canonical record.
    pub fn resolve_success(&mut self, ticket: Ticket, canonical: WorkItem, store: &mut BoardStore) -> Resolution {
        let id = canonical.id.clone();
        let Some(entry) = self.ledger.resolve(&id, ticket, Outcome::Committed) else {
            debug!(%id, seq = ticket.seq, "ignoring superseded mutation reply");
            return Resolution::Ignored;
        };
        store.release(&id);
        if entry.removed_remotely {
            store.remove_item(&id);
            self.recent.remove(&id);
            info!(%id, "move committed but item was deleted remotely");
            return Resolution::Removed;
        }
        let merge = store.apply_remote_change(canonical);
        debug!(%id, ?merge, "canonical record merged");
        Self::apply_queued(entry, store);
        info!(%id, "move committed");
        Resolution::Committed
    }

    /// The Mutation API rejected the move, or the call failed.
    pub fn resolve_failure(
        &mut self,
        id: &WorkItemId,
        ticket: Ticket,
        error: SyncError,
        store: &mut BoardStore,
    ) -> Resolution {
        let Some(entry) = self.ledger.resolve(id, ticket, Outcome::Failed) else {
            debug!(%id, seq = ticket.seq, "ignoring superseded mutation failure");
            return Resolution::Ignored;
        };
        store.release(id);
        // Let an identical retry through right away.
        self.recent.remove(id);
        if entry.removed_remotely {
            store.remove_item(id);
            warn!(%id, %error, "move failed; item was deleted remotely");
            return Resolution::Removed;
        }
        if let Err(err) = store.move_item(id, entry.rollback.status, entry.rollback.index) {
            warn!(%id, %err, "rollback target vanished");
        }
        warn!(%id, %error, back_to = %entry.rollback, "move rolled back");
        if error.user_visible() {
            self.notices.push_back(Notice {
                id: id.clone(),
                code: error.error_code(),
                message: format!("Could not move {id}: {error}"),
            });
        }
        Self::apply_queued(entry, store);
        Resolution::RolledBack(error)
    }

    /// Fail every mutation whose deadline has passed.
    pub fn expire(&mut self, now: Instant, store: &mut BoardStore) -> Vec<(WorkItemId, Resolution)> {
        self.prune_recent(now);
        self.ledger
            .expired(now)
            .into_iter()
            .map(|(id, ticket)| {
                let resolution = self.resolve_failure(&id, ticket, SyncError::Timeout(id.clone()), store);
                (id, resolution)
            })
            .collect()
    }

    /// Forget issue times whose debounce window has closed.
    fn prune_recent(&mut self, now: Instant) {
        let debounce = self.debounce;
        self.recent.retain(|_, (_, at)| now.saturating_duration_since(*at) < debounce);
    }

    fn apply_queued(entry: PendingMutation, store: &mut BoardStore) {
        if let Some(queued) = entry.queued_remote {
            let merge = store.apply_remote_change(queued);
            debug!(id = %entry.id, ?merge, "queued remote record merged");
        }
    }

    // --- Remote interplay ---

    /// Park a remote record behind an in-flight mutation. Returns `false` if
    /// the item has nothing in flight.
    pub fn defer_remote(&mut self, item: WorkItem) -> bool {
        self.ledger.queue_remote(item)
    }

    /// Park a remote deletion behind an in-flight mutation.
    pub fn defer_removal(&mut self, id: &WorkItemId) -> bool {
        self.ledger.queue_removal(id)
    }

    /// Put every in-flight item back at its optimistic slot after a full
    /// reload, so local intent still wins until the mutation resolves.
    pub fn reapply_optimistic(&mut self, store: &mut BoardStore) {
        for entry in self.ledger.iter_mut() {
            store.hold(&entry.id);
            if store.get(&entry.id).is_none() {
                entry.removed_remotely = true;
                continue;
            }
            if store.slot_of(&entry.id) == Some(entry.target) {
                continue;
            }
            match store.move_item(&entry.id, entry.target.status, entry.target.index) {
                Ok(_) => debug!(id = %entry.id, to = %entry.target, "optimistic move reapplied"),
                Err(err) => warn!(id = %entry.id, %err, "could not reapply optimistic move"),
            }
        }
    }

    // --- Queries ---

    /// Items with a mutation in flight must not start a new gesture.
    #[must_use]
    pub fn is_busy(&self, id: &WorkItemId) -> bool {
        self.ledger.contains(id)
    }

    #[cfg(test)]
    pub(crate) fn pending(&self, id: &WorkItemId) -> Option<&PendingMutation> {
        self.ledger.get(id)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.ledger.len()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.ledger.next_deadline()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }
}

//! Remote update listener: merges push events from other clients.
//!
//! SYSTEM CONTEXT
//! ==============
//! Events for an item go straight into the store only when no gesture is in
//! progress. While a gesture is Dragging or Settling they are buffered in
//! arrival order and replayed once the session is Idle again.
//!
//! Conflict rule: when an item has a mutation in flight, its remote events
//! queue behind that mutation instead of overwriting the optimistic state.
//!
//! Flush coalescing: events for the same id collapse to the newest by server
//! timestamp (later arrival breaks ties). A deletion beats any update that is
//! not strictly newer.

#[cfg(test)]
#[path = "listener_test.rs"]
mod listener_test;

use std::collections::HashMap;

use tracing::debug;

use crate::coordinator::MutationCoordinator;
use crate::item::{WorkItem, WorkItemId};
use crate::store::{BoardStore, Merge};

/// What happened remotely, as named by the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEventKind {
    Updated,
    Assigned,
    StatusChanged,
    CommentAdded,
    CommentUpdated,
    CommentDeleted,
    Deleted,
}

/// The state change an event carries.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    /// Full authoritative record.
    Upsert(WorkItem),
    /// The item no longer exists.
    Delete { id: WorkItemId, ts: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub kind: RemoteEventKind,
    pub change: RemoteChange,
}

impl RemoteEvent {
    #[must_use]
    pub fn id(&self) -> &WorkItemId {
        match &self.change {
            RemoteChange::Upsert(item) => &item.id,
            RemoteChange::Delete { id, .. } => id,
        }
    }

    /// Server timestamp of the change.
    #[must_use]
    pub fn ts(&self) -> i64 {
        match &self.change {
            RemoteChange::Upsert(item) => item.updated_at,
            RemoteChange::Delete { ts, .. } => *ts,
        }
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self.change, RemoteChange::Delete { .. })
    }

    /// Whether `self` should replace `earlier` (which arrived first) during
    /// coalescing.
    fn wins_over(&self, earlier: &RemoteEvent) -> bool {
        if earlier.is_delete() && !self.is_delete() {
            self.ts() > earlier.ts()
        } else {
            self.ts() >= earlier.ts()
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Merged(Merge),
    /// Queued behind an in-flight mutation.
    Deferred,
    Removed,
    /// Deletion of an item the store does not have.
    Missing,
}

/// Counts from one buffer flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub received: usize,
    pub applied: usize,
    pub deferred: usize,
    pub removed: usize,
    pub ignored: usize,
}

impl FlushReport {
    fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Merged(Merge::Inserted | Merge::Updated) => self.applied += 1,
            Applied::Merged(Merge::Stale | Merge::Held) | Applied::Missing => self.ignored += 1,
            Applied::Deferred => self.deferred += 1,
            Applied::Removed => self.removed += 1,
        }
    }

    /// Whether the flush changed the board.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.applied > 0 || self.removed > 0
    }
}

#[derive(Debug, Default)]
pub struct RemoteUpdateListener {
    buffer: Vec<RemoteEvent>,
}

impl RemoteUpdateListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold an event until the next flush.
    pub fn buffer(&mut self, event: RemoteEvent) {
        debug!(id = %event.id(), kind = ?event.kind, buffered = self.buffer.len() + 1, "remote event buffered");
        self.buffer.push(event);
    }

    /// Whether a buffered event deletes `id`.
    #[must_use]
    pub fn deletes(&self, id: &WorkItemId) -> bool {
        self.buffer.iter().any(|e| e.is_delete() && e.id() == id)
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Apply one event now.
    pub fn apply(event: RemoteEvent, store: &mut BoardStore, coordinator: &mut MutationCoordinator) -> Applied {
        match event.change {
            RemoteChange::Upsert(item) => {
                if coordinator.is_busy(&item.id) {
                    coordinator.defer_remote(item);
                    return Applied::Deferred;
                }
                Applied::Merged(store.apply_remote_change(item))
            }
            RemoteChange::Delete { id, .. } => {
                if coordinator.defer_removal(&id) {
                    return Applied::Deferred;
                }
                if store.remove_item(&id).is_some() { Applied::Removed } else { Applied::Missing }
            }
        }
    }

    /// Replay the buffer into the store, coalesced per id.
    pub fn flush(&mut self, store: &mut BoardStore, coordinator: &mut MutationCoordinator) -> FlushReport {
        let mut report = FlushReport { received: self.buffer.len(), ..FlushReport::default() };
        for event in coalesce(std::mem::take(&mut self.buffer)) {
            report.record(Self::apply(event, store, coordinator));
        }
        if report.received > 0 {
            debug!(?report, "remote buffer flushed");
        }
        report
    }
}

/// Keep one event per id, ordered by each id's first arrival.
fn coalesce(events: Vec<RemoteEvent>) -> Vec<RemoteEvent> {
    let mut order: Vec<WorkItemId> = Vec::new();
    let mut latest: HashMap<WorkItemId, RemoteEvent> = HashMap::new();
    for event in events {
        match latest.get(event.id()) {
            Some(kept) if !event.wins_over(kept) => {}
            Some(_) => {
                latest.insert(event.id().clone(), event);
            }
            None => {
                order.push(event.id().clone());
                latest.insert(event.id().clone(), event);
            }
        }
    }
    order.into_iter().filter_map(|id| latest.remove(&id)).collect()
}

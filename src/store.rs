//! Board state store: items by id and ordered membership per status column.
//!
//! This is the single source of truth for the board. `BoardSnapshot` holds
//! the structural data and is also the immutable view handed to the rendering
//! layer; `BoardStore` wraps it with the small write surface, the set of ids
//! held by in-flight mutations, and the published `Arc` view.
//!
//! Every write leaves the snapshot consistent before returning: an id appears
//! in exactly one column, and each item's `status`/`position` matches its slot.
//! The store is not lock-protected; callers keep single-writer discipline.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::SyncError;
use crate::item::{Slot, Status, WorkItem, WorkItemId};

/// Outcome of merging a remote item into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// The item was not present and has been added.
    Inserted,
    /// The existing record was replaced.
    Updated,
    /// The incoming record is older than what the store holds; ignored.
    Stale,
    /// A pending mutation holds the id; ignored.
    Held,
}

/// A structural inconsistency found by [`BoardSnapshot::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("item {0} appears in {1} columns")]
    Membership(WorkItemId, usize),
    #[error("column member {0} has no item record")]
    Orphan(WorkItemId),
    #[error("item {id} records {recorded} but sits at {actual}")]
    Misplaced { id: WorkItemId, recorded: Slot, actual: Slot },
}

/// Immutable structural copy of the board.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardSnapshot {
    items: HashMap<WorkItemId, WorkItem>,
    columns: [Vec<WorkItemId>; 4],
}

impl BoardSnapshot {
    #[must_use]
    pub fn get(&self, id: &WorkItemId) -> Option<&WorkItem> {
        self.items.get(id)
    }

    /// Ordered member ids of one column.
    #[must_use]
    pub fn column(&self, status: Status) -> &[WorkItemId] {
        &self.columns[status.ordinal()]
    }

    /// Where an item currently sits.
    #[must_use]
    pub fn slot_of(&self, id: &WorkItemId) -> Option<Slot> {
        let item = self.items.get(id)?;
        Some(Slot::new(item.status, item.position))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Verify exactly-one-column membership and slot bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut seen: HashMap<&WorkItemId, usize> = HashMap::new();
        for status in Status::ALL {
            for (index, id) in self.column(status).iter().enumerate() {
                *seen.entry(id).or_default() += 1;
                let Some(item) = self.items.get(id) else {
                    return Err(InvariantViolation::Orphan(id.clone()));
                };
                let actual = Slot::new(status, index);
                let recorded = Slot::new(item.status, item.position);
                if recorded != actual {
                    return Err(InvariantViolation::Misplaced { id: id.clone(), recorded, actual });
                }
            }
        }
        for id in self.items.keys() {
            let count = seen.get(id).copied().unwrap_or(0);
            if count != 1 {
                return Err(InvariantViolation::Membership(id.clone(), count));
            }
        }
        Ok(())
    }

    fn take_out(&mut self, id: &WorkItemId) -> Option<Slot> {
        let slot = self.slot_of(id)?;
        let column = &mut self.columns[slot.status.ordinal()];
        let index = column.iter().position(|member| member == id)?;
        column.remove(index);
        self.renumber(slot.status);
        Some(slot)
    }

    fn put_in(&mut self, id: WorkItemId, status: Status, index: usize) {
        let column = &mut self.columns[status.ordinal()];
        let index = index.min(column.len());
        column.insert(index, id);
        self.renumber(status);
    }

    fn renumber(&mut self, status: Status) {
        for (index, id) in self.columns[status.ordinal()].iter().enumerate() {
            if let Some(item) = self.items.get_mut(id) {
                item.status = status;
                item.position = index;
            }
        }
    }
}

/// The live store with its write surface and published view.
pub struct BoardStore {
    board: BoardSnapshot,
    held: HashSet<WorkItemId>,
    /// Ids written by remote merges or deletions while a fetch is out.
    fetch_window: Option<HashSet<WorkItemId>>,
    published: Arc<BoardSnapshot>,
    revision: u64,
    dirty: bool,
}

impl BoardStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            board: BoardSnapshot::default(),
            held: HashSet::new(),
            fetch_window: None,
            published: Arc::new(BoardSnapshot::default()),
            revision: 0,
            dirty: false,
        }
    }

    // --- Writes ---

    /// Replace the whole board. Columns are ordered by incoming `position`,
    /// then id; a repeated id keeps its last occurrence.
    pub fn load(&mut self, items: Vec<WorkItem>) {
        let mut board = BoardSnapshot::default();
        for item in items {
            board.items.insert(item.id.clone(), item);
        }
        let mut placed: Vec<&WorkItem> = board.items.values().collect();
        placed.sort_by(|a, b| {
            a.status
                .cmp(&b.status)
                .then(a.position.cmp(&b.position))
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut columns: [Vec<WorkItemId>; 4] = Default::default();
        for item in placed {
            columns[item.status.ordinal()].push(item.id.clone());
        }
        board.columns = columns;
        for status in Status::ALL {
            board.renumber(status);
        }
        debug!(count = board.len(), "board loaded");
        self.board = board;
        self.fetch_window = None;
        self.dirty = true;
    }

    /// Start recording remote writes; a full fetch was just sent.
    pub fn begin_fetch(&mut self) {
        self.fetch_window = Some(HashSet::new());
    }

    /// Replace the board with a fetch result without losing remote writes
    /// that landed after the fetch was sent.
    ///
    /// An id written since [`BoardStore::begin_fetch`] keeps its live record
    /// unless the fetched one supersedes it, stays deleted if it was deleted,
    /// and stays on the board if the fetch predates its insertion. Returns
    /// how many live records won over the fetch.
    pub fn merge_fetched(&mut self, items: Vec<WorkItem>) -> usize {
        let touched = self.fetch_window.take().unwrap_or_default();
        let mut merged: HashMap<WorkItemId, WorkItem> = HashMap::with_capacity(items.len());
        for item in items {
            if touched.contains(&item.id) {
                match self.board.items.get(&item.id) {
                    Some(live) if item.supersedes(live) => {}
                    _ => continue,
                }
            }
            merged.insert(item.id.clone(), item);
        }
        let mut kept = 0;
        for id in &touched {
            if let Some(live) = self.board.items.get(id)
                && !merged.contains_key(id)
            {
                merged.insert(id.clone(), live.clone());
                kept += 1;
            }
        }
        self.load(merged.into_values().collect());
        kept
    }

    fn touch(&mut self, id: &WorkItemId) {
        if let Some(touched) = self.fetch_window.as_mut() {
            touched.insert(id.clone());
        }
    }

    /// Merge an authoritative record, last-write-wins by server timestamp.
    ///
    /// A status change lands at the payload's `position` when it fits the
    /// destination column, else at its end. A same-status update keeps the
    /// local position.
    pub fn apply_remote_change(&mut self, item: WorkItem) -> Merge {
        if self.held.contains(&item.id) {
            return Merge::Held;
        }
        let id = item.id.clone();
        self.touch(&id);
        let merge = match self.board.items.get(&id) {
            Some(existing) if !item.supersedes(existing) => return Merge::Stale,
            Some(existing) if existing.status == item.status => {
                let position = existing.position;
                self.board.items.insert(id, WorkItem { position, ..item });
                Merge::Updated
            }
            Some(_) => {
                self.board.take_out(&id);
                let (status, position) = (item.status, item.position);
                self.board.items.insert(id.clone(), item);
                self.board.put_in(id, status, position);
                Merge::Updated
            }
            None => {
                let (status, position) = (item.status, item.position);
                self.board.items.insert(id.clone(), item);
                self.board.put_in(id, status, position);
                Merge::Inserted
            }
        };
        self.dirty = true;
        merge
    }

    /// Reposition an item locally. Returns the slot it left.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownItem`] if the id is not on the board.
    pub fn move_item(&mut self, id: &WorkItemId, dest: Status, dest_index: usize) -> Result<Slot, SyncError> {
        let Some(from) = self.board.take_out(id) else {
            return Err(SyncError::UnknownItem(id.clone()));
        };
        self.board.put_in(id.clone(), dest, dest_index);
        self.dirty = true;
        Ok(from)
    }

    /// Remove an item from the board entirely.
    pub fn remove_item(&mut self, id: &WorkItemId) -> Option<WorkItem> {
        self.touch(id);
        self.board.take_out(id)?;
        self.held.remove(id);
        self.dirty = true;
        self.board.items.remove(id)
    }

    /// Deep copy of the current board.
    #[must_use]
    pub fn snapshot(&self) -> BoardSnapshot {
        self.board.clone()
    }

    /// Replace the board with a previously taken snapshot. Held ids stay held.
    pub fn restore(&mut self, snapshot: &BoardSnapshot) {
        if self.board == *snapshot {
            return;
        }
        self.board = snapshot.clone();
        self.dirty = true;
    }

    /// Refuse remote merges for `id` until released.
    pub fn hold(&mut self, id: &WorkItemId) {
        self.held.insert(id.clone());
    }

    pub fn release(&mut self, id: &WorkItemId) {
        self.held.remove(id);
    }

    // --- Reads ---

    #[cfg(test)]
    pub(crate) fn is_held(&self, id: &WorkItemId) -> bool {
        self.held.contains(id)
    }

    /// The live (possibly unpublished) board.
    #[must_use]
    pub fn board(&self) -> &BoardSnapshot {
        &self.board
    }

    #[must_use]
    pub fn get(&self, id: &WorkItemId) -> Option<&WorkItem> {
        self.board.get(id)
    }

    #[must_use]
    pub fn column(&self, status: Status) -> &[WorkItemId] {
        self.board.column(status)
    }

    #[must_use]
    pub fn slot_of(&self, id: &WorkItemId) -> Option<Slot> {
        self.board.slot_of(id)
    }

    #[must_use]
    pub fn diverged_from(&self, snapshot: &BoardSnapshot) -> bool {
        self.board != *snapshot
    }

    // --- Publication ---

    /// Swap the rendering view to the current board if anything changed.
    /// Returns `true` when a new view was published.
    pub fn publish(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.published = Arc::new(self.board.clone());
        self.revision += 1;
        self.dirty = false;
        true
    }

    /// The last published view. Cheap to clone and never partially updated.
    #[must_use]
    pub fn view(&self) -> Arc<BoardSnapshot> {
        Arc::clone(&self.published)
    }

    /// Number of views published so far.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the live board has writes not yet published.
    #[cfg(test)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Default for BoardStore {
    fn default() -> Self {
        Self::new()
    }
}

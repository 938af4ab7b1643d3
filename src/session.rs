//! Drag session controller: the lifecycle of one interactive reorder gesture.
//!
//! SYSTEM CONTEXT
//! ==============
//! The controller is the single synchronous source of truth for "is a gesture
//! live". It owns an explicit state machine:
//!
//! ```text
//! Idle -> Dragging -> Dropped   -> Settling -> Idle
//!                  \-> Cancelled -> Idle
//! ```
//!
//! Entering Dragging captures an immutable snapshot of the store. While
//! Dragging the controller never writes the live store; pointer updates are
//! published for rendering only. A cancel restores the snapshot. Settling is
//! a timed grace window that keeps deferred effects away from render targets
//! the UI layer may still be tearing down.
//!
//! Transitions are announced on a `watch` channel so subscribers observe the
//! same state the controller reports synchronously through [`DragController::phase`].

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::debug;

use crate::error::SyncError;
use crate::item::{Slot, Status, WorkItemId};
use crate::store::{BoardSnapshot, BoardStore};

/// Gesture lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragPhase {
    /// No gesture in progress.
    #[default]
    Idle,
    /// Pointer is down and moving an item.
    Dragging,
    /// Released over a valid target; transient, immediately followed by Settling.
    Dropped,
    /// Released outside any valid target or aborted; transient, followed by Idle.
    Cancelled,
    /// Gesture ended visually; deferred effects are still held back.
    Settling,
}

/// Why a gesture ended without a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Released outside every column.
    Outside,
    /// The destination column is no longer mounted in the render surface.
    Unmounted(Status),
    /// The host aborted the gesture (pointer lost, escape key, unmount).
    Aborted,
    /// No pointer update arrived within the stale window.
    Stale,
    /// The dragged item was deleted by another client mid-gesture.
    RemovedRemotely,
}

/// A completed gesture that changed the item's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequested {
    pub id: WorkItemId,
    pub source: Slot,
    pub dest: Slot,
}

/// Result of releasing the pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    /// Valid drop that changed position; the caller issues the mutation.
    Moved(MoveRequested),
    /// Valid drop back onto the origin slot.
    Unchanged,
    /// No move; the store has been restored from the session snapshot.
    Cancelled(CancelReason),
}

/// Live rendering hint while a gesture is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragPreview {
    pub id: WorkItemId,
    pub origin: Slot,
    pub destination: Option<Slot>,
}

/// Answers whether a column container is still present in the UI.
pub trait RenderSurface {
    fn has_column(&self, status: Status) -> bool;
}

/// A surface where every column is always mounted.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllColumns;

impl RenderSurface for AllColumns {
    fn has_column(&self, _status: Status) -> bool {
        true
    }
}

impl RenderSurface for HashSet<Status> {
    fn has_column(&self, status: Status) -> bool {
        self.contains(&status)
    }
}

/// State carried between pointer-down and settle.
#[derive(Debug, Clone)]
pub struct DragSession {
    pub id: WorkItemId,
    pub origin: Slot,
    pub destination: Option<Slot>,
    snapshot: Arc<BoardSnapshot>,
    last_update: Instant,
}

impl DragSession {
    /// The board as it was when the gesture began.
    #[must_use]
    pub fn snapshot(&self) -> &BoardSnapshot {
        &self.snapshot
    }
}

/// Something the controller did on its own during [`DragController::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The settle window elapsed; the controller is Idle again.
    Settled,
    /// A stale gesture was force-cancelled.
    Cancelled(CancelReason),
}

pub struct DragController {
    phase: DragPhase,
    session: Option<DragSession>,
    settle_until: Option<Instant>,
    settle_window: Duration,
    stale_after: Duration,
    phase_tx: watch::Sender<DragPhase>,
    preview_tx: watch::Sender<Option<DragPreview>>,
}

impl DragController {
    #[must_use]
    pub fn new(settle_window: Duration, stale_after: Duration) -> Self {
        let (phase_tx, _) = watch::channel(DragPhase::Idle);
        let (preview_tx, _) = watch::channel(None);
        Self { phase: DragPhase::Idle, session: None, settle_until: None, settle_window, stale_after, phase_tx, preview_tx }
    }

    // --- Queries ---

    /// Current phase. Always in sync with what subscribers last received.
    #[must_use]
    pub fn phase(&self) -> DragPhase {
        self.phase
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.phase == DragPhase::Idle
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.phase == DragPhase::Dragging
    }

    #[must_use]
    pub fn session(&self) -> Option<&DragSession> {
        self.session.as_ref()
    }

    /// Id of the item under the pointer, if Dragging.
    #[must_use]
    pub fn dragged(&self) -> Option<&WorkItemId> {
        if self.is_dragging() { self.session.as_ref().map(|s| &s.id) } else { None }
    }

    /// When [`DragController::tick`] next has work: the end of the settle
    /// window, or the point at which a live gesture goes stale.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            DragPhase::Settling => self.settle_until,
            DragPhase::Dragging => self.session.as_ref().map(|s| s.last_update + self.stale_after),
            _ => None,
        }
    }

    /// Subscribe to phase transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DragPhase> {
        self.phase_tx.subscribe()
    }

    /// Subscribe to live destination updates.
    #[must_use]
    pub fn preview(&self) -> watch::Receiver<Option<DragPreview>> {
        self.preview_tx.subscribe()
    }

    // --- Transitions ---

    /// Idle -> Dragging. Captures the store snapshot.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidSession`] if a gesture is already live or settling,
    /// [`SyncError::UnknownItem`] if the item is not on the board.
    pub fn begin(&mut self, id: &WorkItemId, store: &BoardStore, now: Instant) -> Result<(), SyncError> {
        if !self.is_idle() {
            return Err(SyncError::InvalidSession("a gesture is already active"));
        }
        let Some(origin) = store.slot_of(id) else {
            return Err(SyncError::UnknownItem(id.clone()));
        };
        self.session = Some(DragSession {
            id: id.clone(),
            origin,
            destination: Some(origin),
            snapshot: Arc::new(store.snapshot()),
            last_update: now,
        });
        self.transition(DragPhase::Dragging);
        self.publish_preview();
        Ok(())
    }

    /// Record the live destination under the pointer. Rendering only.
    /// Returns `false` when no gesture is live.
    pub fn hover(&mut self, destination: Option<Slot>, now: Instant) -> bool {
        if !self.is_dragging() {
            return false;
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        session.last_update = now;
        if session.destination == destination {
            return true;
        }
        session.destination = destination;
        self.publish_preview();
        true
    }

    /// Release the pointer over `target` (`None` = outside every column).
    ///
    /// The target column must still be mounted in `surface`; otherwise the
    /// drop is routed to Cancelled.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidSession`] if no gesture is live.
    pub fn drop_on(
        &mut self,
        target: Option<Slot>,
        surface: &dyn RenderSurface,
        store: &mut BoardStore,
        now: Instant,
    ) -> Result<DropOutcome, SyncError> {
        if !self.is_dragging() {
            return Err(SyncError::InvalidSession("drop without an active gesture"));
        }
        let Some(dest) = target else {
            return self.cancel(CancelReason::Outside, store);
        };
        if !surface.has_column(dest.status) {
            debug!(status = %dest.status, "drop target unmounted");
            return self.cancel(CancelReason::Unmounted(dest.status), store);
        }
        let Some(session) = self.session.as_ref() else {
            return Err(SyncError::InvalidSession("drop without an active gesture"));
        };
        let outcome = if dest == session.origin {
            DropOutcome::Unchanged
        } else {
            DropOutcome::Moved(MoveRequested { id: session.id.clone(), source: session.origin, dest })
        };
        self.transition(DragPhase::Dropped);
        self.settle_until = Some(now + self.settle_window);
        self.transition(DragPhase::Settling);
        self.preview_tx.send_replace(None);
        Ok(outcome)
    }

    /// Dragging -> Cancelled -> Idle, restoring the snapshot if the store diverged.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidSession`] if no gesture is live.
    pub fn cancel(&mut self, reason: CancelReason, store: &mut BoardStore) -> Result<DropOutcome, SyncError> {
        if !self.is_dragging() {
            return Err(SyncError::InvalidSession("cancel without an active gesture"));
        }
        if let Some(session) = self.session.take() {
            if store.diverged_from(&session.snapshot) {
                debug!(id = %session.id, "restoring board from drag snapshot");
                store.restore(&session.snapshot);
            }
        }
        debug!(?reason, "drag cancelled");
        self.transition(DragPhase::Cancelled);
        self.settle_until = None;
        self.transition(DragPhase::Idle);
        self.preview_tx.send_replace(None);
        Ok(DropOutcome::Cancelled(reason))
    }

    /// Advance timers: finish Settling, or cancel a stale gesture.
    pub fn tick(&mut self, now: Instant, store: &mut BoardStore) -> Option<SessionEvent> {
        match self.phase {
            DragPhase::Settling if self.settle_until.is_some_and(|until| now >= until) => {
                self.settle_until = None;
                self.session = None;
                self.transition(DragPhase::Idle);
                Some(SessionEvent::Settled)
            }
            DragPhase::Dragging => {
                let stale = self
                    .session
                    .as_ref()
                    .is_some_and(|s| now.saturating_duration_since(s.last_update) >= self.stale_after);
                if !stale {
                    return None;
                }
                match self.cancel(CancelReason::Stale, store) {
                    Ok(DropOutcome::Cancelled(reason)) => Some(SessionEvent::Cancelled(reason)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn transition(&mut self, next: DragPhase) {
        debug!(from = ?self.phase, to = ?next, "drag phase");
        self.phase = next;
        self.phase_tx.send_replace(next);
    }

    fn publish_preview(&self) {
        let preview = self.session.as_ref().map(|s| DragPreview {
            id: s.id.clone(),
            origin: s.origin,
            destination: s.destination,
        });
        self.preview_tx.send_replace(preview);
    }
}

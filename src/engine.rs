//! Synchronization core: the five components composed behind one owner.
//!
//! SYSTEM CONTEXT
//! ==============
//! `SyncCore` is the deterministic half of the client. It performs no I/O
//! and reads no clock: every entry point takes `now`, and anything that must
//! happen outside (a network call, a user notice, a redraw) comes back as an
//! [`Effect`]. The async driver executes effects and feeds results back in.
//!
//! The live store is frozen while a gesture is Dragging. Remote events are
//! buffered, and mutation replies and timeouts for other items are deferred
//! until the gesture ends, so a cancel can always restore the snapshot taken
//! at pointer-down without discarding anyone else's work.

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::coordinator::{MutationCoordinator, MutationRequest, Notice, Resolution};
use crate::error::SyncError;
use crate::item::{Slot, WorkItem, WorkItemId};
use crate::listener::{Applied, RemoteEvent, RemoteUpdateListener};
use crate::pending::Ticket;
use crate::scheduler::{ReconcileReason, ReconcileScheduler, RefetchRequest};
use crate::session::{CancelReason, DragController, DragPhase, DragPreview, DropOutcome, RenderSurface, SessionEvent};
use crate::store::{BoardSnapshot, BoardStore};

/// Work the core hands back to its driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a status change to the Mutation API.
    IssueMutation(MutationRequest),
    /// Fetch the full board from the Fetch API.
    Refetch(RefetchRequest),
    /// Show a message to the user.
    Notify(Notice),
    /// The per-item busy flag changed.
    BusyChanged { id: WorkItemId, busy: bool },
    /// A new view was published at this revision.
    RenderNeeded(u64),
}

struct DeferredReply {
    ticket: Ticket,
    id: WorkItemId,
    result: Result<WorkItem, SyncError>,
}

pub struct SyncCore {
    store: BoardStore,
    session: DragController,
    coordinator: MutationCoordinator,
    listener: RemoteUpdateListener,
    scheduler: ReconcileScheduler,
    deferred: VecDeque<DeferredReply>,
}

impl SyncCore {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            store: BoardStore::new(),
            session: DragController::new(config.settle, config.drag_stale),
            coordinator: MutationCoordinator::new(config.mutation_debounce, config.mutation_timeout),
            listener: RemoteUpdateListener::new(),
            scheduler: ReconcileScheduler::new(config.reconcile_quiet),
            deferred: VecDeque::new(),
        }
    }

    // =============================================================
    // Loading
    // =============================================================

    /// Full replace from the Fetch API (initial population).
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidSession`] if a gesture is live or settling.
    pub fn load(&mut self, items: Vec<WorkItem>) -> Result<Vec<Effect>, SyncError> {
        if !self.session.is_idle() {
            return Err(SyncError::InvalidSession("load while a gesture is active"));
        }
        let mut effects = Vec::new();
        self.reload(items);
        self.finish(&mut effects);
        Ok(effects)
    }

    fn reload(&mut self, items: Vec<WorkItem>) {
        let count = items.len();
        self.store.load(items);
        self.coordinator.reapply_optimistic(&mut self.store);
        info!(count, in_flight = self.coordinator.in_flight(), "board reloaded");
    }

    /// Apply a refetch result. Remote writes that landed after the request
    /// went out still win by timestamp.
    fn apply_fetched(&mut self, items: Vec<WorkItem>) {
        let count = items.len();
        let kept = self.store.merge_fetched(items);
        self.coordinator.reapply_optimistic(&mut self.store);
        info!(count, kept, in_flight = self.coordinator.in_flight(), "board refetched");
    }

    // =============================================================
    // Gesture
    // =============================================================

    /// Pointer-down on an item.
    ///
    /// # Errors
    ///
    /// [`SyncError::Busy`] while the item has a mutation in flight, otherwise
    /// whatever [`DragController::begin`] refuses.
    pub fn begin_drag(&mut self, id: &WorkItemId, now: Instant) -> Result<(), SyncError> {
        if self.coordinator.is_busy(id) {
            debug!(%id, "refusing drag on busy item");
            return Err(SyncError::Busy(id.clone()));
        }
        self.session.begin(id, &self.store, now)
    }

    /// Pointer moved; `destination` is the slot under it, if any.
    pub fn hover(&mut self, destination: Option<Slot>, now: Instant) -> bool {
        self.session.hover(destination, now)
    }

    /// Pointer released over `target`.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidSession`] if no gesture is live. Failures of the
    /// resulting move (duplicate, busy, stale) are absorbed and logged.
    pub fn drop_on(
        &mut self,
        target: Option<Slot>,
        surface: &dyn RenderSurface,
        now: Instant,
    ) -> Result<Vec<Effect>, SyncError> {
        let Some(dragged) = self.session.dragged().cloned() else {
            return Err(SyncError::InvalidSession("drop without an active gesture"));
        };
        let mut effects = Vec::new();

        if self.listener.deletes(&dragged) {
            warn!(id = %dragged, error = %SyncError::StaleData(dragged.clone()), "dragged item deleted remotely");
            self.session.cancel(CancelReason::RemovedRemotely, &mut self.store)?;
            self.after_gesture(now, &mut effects);
            self.finish(&mut effects);
            return Ok(effects);
        }

        match self.session.drop_on(target, surface, &mut self.store, now)? {
            DropOutcome::Moved(request) => {
                self.apply_deferred(now, &mut effects);
                match self.coordinator.request_move(&request, &mut self.store, now) {
                    Ok(mutation) => {
                        effects.push(Effect::BusyChanged { id: mutation.id.clone(), busy: true });
                        effects.push(Effect::IssueMutation(mutation));
                    }
                    Err(SyncError::DuplicateMutation { .. }) => {}
                    Err(err) => warn!(id = %request.id, %err, "move discarded"),
                }
            }
            DropOutcome::Unchanged => self.apply_deferred(now, &mut effects),
            DropOutcome::Cancelled(_) => self.after_gesture(now, &mut effects),
        }
        self.finish(&mut effects);
        Ok(effects)
    }

    /// Abort the live gesture (escape key, pointer lost, unmount).
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidSession`] if no gesture is live.
    pub fn cancel_drag(&mut self, reason: CancelReason, now: Instant) -> Result<Vec<Effect>, SyncError> {
        self.session.cancel(reason, &mut self.store)?;
        let mut effects = Vec::new();
        self.after_gesture(now, &mut effects);
        self.finish(&mut effects);
        Ok(effects)
    }

    // =============================================================
    // Inbound
    // =============================================================

    /// A push event from another client.
    pub fn on_remote_event(&mut self, event: RemoteEvent, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.session.is_idle() {
            self.listener.buffer(event);
            return effects;
        }
        let id = event.id().clone();
        let applied = RemoteUpdateListener::apply(event, &mut self.store, &mut self.coordinator);
        debug!(%id, ?applied, "remote event applied");
        if applied == Applied::Deferred {
            // Resolution of the pending move decides; a resync confirms it.
            self.scheduler.trigger(ReconcileReason::RemoteFlush, now);
        }
        self.finish(&mut effects);
        effects
    }

    /// The Mutation API answered (or the call failed).
    pub fn on_mutation_result(
        &mut self,
        ticket: Ticket,
        id: WorkItemId,
        result: Result<WorkItem, SyncError>,
        now: Instant,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.session.is_dragging() {
            debug!(%id, seq = ticket.seq, "mutation reply deferred until gesture ends");
            self.deferred.push_back(DeferredReply { ticket, id, result });
            return effects;
        }
        self.resolve(DeferredReply { ticket, id, result }, now, &mut effects);
        self.finish(&mut effects);
        effects
    }

    /// A refetch issued through [`Effect::Refetch`] completed.
    pub fn on_refetch_result(&mut self, seq: u64, result: Result<Vec<WorkItem>, SyncError>, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        match result {
            Ok(items) => {
                if let Some(items) = self.scheduler.complete(seq, items, self.session.is_idle()) {
                    self.apply_fetched(items);
                }
            }
            Err(err) => {
                warn!(seq, %err, "refetch failed");
                self.scheduler.fail(seq, now);
            }
        }
        self.finish(&mut effects);
        effects
    }

    /// User asked for a refresh.
    pub fn request_refresh(&mut self, now: Instant) {
        self.scheduler.trigger(ReconcileReason::Manual, now);
    }

    /// The push channel reconnected; events may have been missed.
    pub fn on_reconnected(&mut self, now: Instant) {
        self.scheduler.trigger(ReconcileReason::Reconnected, now);
    }

    // =============================================================
    // Timers
    // =============================================================

    /// Advance every timer: settle window, stale gesture, mutation deadlines,
    /// parked and due refetches.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.session.tick(now, &mut self.store) {
            Some(SessionEvent::Settled) => {
                debug!("gesture settled");
                self.after_gesture(now, &mut effects);
            }
            Some(SessionEvent::Cancelled(reason)) => {
                warn!(?reason, "stale gesture cancelled");
                self.after_gesture(now, &mut effects);
            }
            None => {}
        }

        if !self.session.is_dragging() {
            for (id, resolution) in self.coordinator.expire(now, &mut self.store) {
                if resolution != Resolution::Ignored {
                    warn!(%id, "mutation timed out");
                    effects.push(Effect::BusyChanged { id, busy: false });
                    self.scheduler.trigger(ReconcileReason::MutationFailed, now);
                }
            }
        }

        let idle = self.session.is_idle();
        if let Some(items) = self.scheduler.take_parked(idle) {
            self.apply_fetched(items);
        }
        if let Some(request) = self.scheduler.poll(now, idle) {
            self.store.begin_fetch();
            effects.push(Effect::Refetch(request));
        }
        self.finish(&mut effects);
        effects
    }

    /// Earliest instant at which [`Self::tick`] has work to do. A deadline
    /// in the past stays reported until the work can run.
    #[must_use]
    pub fn next_wakeup(&self) -> Option<Instant> {
        [self.session.next_deadline(), self.coordinator.next_deadline(), self.scheduler.next_due()]
            .into_iter()
            .flatten()
            .min()
    }

    // =============================================================
    // Internals
    // =============================================================

    /// The gesture left Dragging: replay deferred replies, and once Idle
    /// apply any parked refetch, then flush buffered remote events on top.
    fn after_gesture(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        self.apply_deferred(now, effects);
        if !self.session.is_idle() {
            return;
        }
        if let Some(items) = self.scheduler.take_parked(true) {
            self.apply_fetched(items);
        }
        let report = self.listener.flush(&mut self.store, &mut self.coordinator);
        if report.received > 0 {
            info!(applied = report.applied, removed = report.removed, deferred = report.deferred, "remote buffer flushed");
            self.scheduler.trigger(ReconcileReason::RemoteFlush, now);
        }
    }

    fn apply_deferred(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        while let Some(reply) = self.deferred.pop_front() {
            self.resolve(reply, now, effects);
        }
    }

    fn resolve(&mut self, reply: DeferredReply, now: Instant, effects: &mut Vec<Effect>) {
        let DeferredReply { ticket, id, result } = reply;
        let resolution = match result {
            Ok(mut canonical) => {
                if canonical.id != id {
                    warn!(%id, returned = %canonical.id, "mutation reply names a different item");
                    canonical.id = id.clone();
                }
                self.coordinator.resolve_success(ticket, canonical, &mut self.store)
            }
            Err(err) => self.coordinator.resolve_failure(&id, ticket, err, &mut self.store),
        };
        match resolution {
            Resolution::Ignored => return,
            Resolution::Committed | Resolution::Removed => {
                self.scheduler.trigger(ReconcileReason::MutationCommitted, now);
            }
            Resolution::RolledBack(_) => self.scheduler.trigger(ReconcileReason::MutationFailed, now),
        }
        effects.push(Effect::BusyChanged { id, busy: false });
    }

    /// Surface queued notices and publish the view unless a gesture is live.
    fn finish(&mut self, effects: &mut Vec<Effect>) {
        effects.extend(self.coordinator.drain_notices().into_iter().map(Effect::Notify));
        if !self.session.is_dragging() && self.store.publish() {
            effects.push(Effect::RenderNeeded(self.store.revision()));
        }
    }

    // =============================================================
    // Queries
    // =============================================================

    /// The rendering view: swapped only on publication.
    #[must_use]
    pub fn view(&self) -> Arc<BoardSnapshot> {
        self.store.view()
    }

    #[must_use]
    pub fn store(&self) -> &BoardStore {
        &self.store
    }

    /// Whether the rendering layer must block gestures on `id`.
    #[must_use]
    pub fn is_busy(&self, id: &WorkItemId) -> bool {
        self.coordinator.is_busy(id)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.coordinator.in_flight()
    }

    #[must_use]
    pub fn phase(&self) -> DragPhase {
        self.session.phase()
    }

    #[must_use]
    pub fn buffered_events(&self) -> usize {
        self.listener.buffered()
    }

    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<DragPhase> {
        self.session.subscribe()
    }

    #[must_use]
    pub fn subscribe_preview(&self) -> watch::Receiver<Option<DragPreview>> {
        self.session.preview()
    }
}

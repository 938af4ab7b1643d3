//! Reconciliation scheduler: coalesces resync triggers into one refetch.
//!
//! DESIGN
//! ======
//! Triggers are trailing-debounced: each one pushes the due time out to
//! `now + quiet`. A refetch is only issued, and its result only applied,
//! while the drag session is Idle; anything that comes due mid-gesture waits.
//! At most one refetch is in flight; a trigger that lands during it schedules
//! exactly one follow-up.
//!
//! ERROR HANDLING
//! ==============
//! A failed refetch is retried with exponential back-off (1s doubling to
//! 10s). Success resets the back-off.

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod scheduler_test;

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::item::WorkItem;

const INITIAL_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Why a resync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReason {
    MutationCommitted,
    MutationFailed,
    RemoteFlush,
    Manual,
    Reconnected,
    RetryAfterError,
}

/// A refetch the caller must perform against the Fetch API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefetchRequest {
    pub seq: u64,
    pub reasons: Vec<ReconcileReason>,
}

pub struct ReconcileScheduler {
    quiet: Duration,
    due_at: Option<Instant>,
    reasons: Vec<ReconcileReason>,
    in_flight: Option<u64>,
    parked: Option<Vec<WorkItem>>,
    next_seq: u64,
    retry_backoff: Duration,
}

impl ReconcileScheduler {
    #[must_use]
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            due_at: None,
            reasons: Vec::new(),
            in_flight: None,
            parked: None,
            next_seq: 0,
            retry_backoff: INITIAL_RETRY_BACKOFF,
        }
    }

    /// Request a resync. Pushes the due time to `now + quiet`.
    pub fn trigger(&mut self, reason: ReconcileReason, now: Instant) {
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
        self.due_at = Some(now + self.quiet);
        debug!(?reason, due_in_ms = self.quiet.as_millis(), "reconcile triggered");
    }

    /// Issue the coalesced refetch if it is due and the session is idle.
    pub fn poll(&mut self, now: Instant, idle: bool) -> Option<RefetchRequest> {
        if !idle || self.in_flight.is_some() {
            return None;
        }
        let due = self.due_at?;
        if now < due {
            return None;
        }
        self.next_seq += 1;
        self.in_flight = Some(self.next_seq);
        self.due_at = None;
        let reasons = std::mem::take(&mut self.reasons);
        debug!(seq = self.next_seq, ?reasons, "refetch issued");
        Some(RefetchRequest { seq: self.next_seq, reasons })
    }

    /// Accept a refetch result. Returns the items to load now, or parks them
    /// until the session is idle. Results for an unknown `seq` are dropped.
    pub fn complete(&mut self, seq: u64, items: Vec<WorkItem>, idle: bool) -> Option<Vec<WorkItem>> {
        if self.in_flight != Some(seq) {
            debug!(seq, "dropping superseded refetch result");
            return None;
        }
        self.in_flight = None;
        self.retry_backoff = INITIAL_RETRY_BACKOFF;
        if idle {
            return Some(items);
        }
        debug!(seq, count = items.len(), "refetch result parked until idle");
        self.parked = Some(items);
        None
    }

    /// Record a failed refetch and schedule a retry.
    pub fn fail(&mut self, seq: u64, now: Instant) {
        if self.in_flight != Some(seq) {
            return;
        }
        self.in_flight = None;
        let backoff = self.retry_backoff;
        self.retry_backoff = (backoff * 2).min(MAX_RETRY_BACKOFF);
        if !self.reasons.contains(&ReconcileReason::RetryAfterError) {
            self.reasons.push(ReconcileReason::RetryAfterError);
        }
        let retry_at = now + backoff;
        self.due_at = Some(self.due_at.map_or(retry_at, |due| due.max(retry_at)));
        warn!(seq, retry_in_ms = backoff.as_millis(), "refetch failed; retrying");
    }

    /// Release a parked result once the session is idle.
    pub fn take_parked(&mut self, idle: bool) -> Option<Vec<WorkItem>> {
        if idle { self.parked.take() } else { None }
    }

    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.due_at
    }
}

//! Shared timing constants for the synchronization core.

// ── Drag session ────────────────────────────────────────────────

/// Grace window after a drop before deferred effects are released.
pub const DEFAULT_SETTLE_MS: u64 = 150;

/// A Dragging session with no pointer update for this long is force-cancelled.
pub const DEFAULT_DRAG_STALE_MS: u64 = 10_000;

// ── Mutations ───────────────────────────────────────────────────

/// Identical move requests inside this window collapse into one remote call.
pub const DEFAULT_MUTATION_DEBOUNCE_MS: u64 = 300;

/// A remote mutation not acknowledged within this window is treated as failed.
pub const DEFAULT_MUTATION_TIMEOUT_MS: u64 = 10_000;

// ── Reconciliation ──────────────────────────────────────────────

/// Trailing quiet period before a coalesced refetch is issued.
pub const DEFAULT_RECONCILE_QUIET_MS: u64 = 200;

// ── Driver ──────────────────────────────────────────────────────

/// Run-loop tick interval (one display frame).
pub const DEFAULT_TICK_MS: u64 = 16;

/// Capacity of the command and push-event channels feeding the driver.
pub const CHANNEL_CAPACITY: usize = 1024;

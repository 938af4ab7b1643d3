use std::time::{Duration, Instant};

use serde_json::json;

use super::*;
use crate::item::Slot;

// =============================================================
// Helpers
// =============================================================

const DEBOUNCE: Duration = Duration::from_millis(300);
const TIMEOUT: Duration = Duration::from_secs(10);

fn item(id: &str, status: Status, position: usize) -> WorkItem {
    WorkItem {
        id: WorkItemId::new(id),
        status,
        position,
        assignee: None,
        version: 1,
        updated_at: 1_000,
        metadata: json!({}),
    }
}

fn store() -> BoardStore {
    let mut store = BoardStore::new();
    store.load(vec![
        item("T-101", Status::Todo, 0),
        item("T-102", Status::Todo, 1),
        item("T-103", Status::InProgress, 0),
        item("T-104", Status::InProgress, 1),
    ]);
    store
}

fn coordinator() -> MutationCoordinator {
    MutationCoordinator::new(DEBOUNCE, TIMEOUT)
}

fn move_t101() -> MoveRequested {
    MoveRequested {
        id: WorkItemId::new("T-101"),
        source: Slot::new(Status::Todo, 0),
        dest: Slot::new(Status::InProgress, 2),
    }
}

fn canonical(status: Status, updated_at: i64) -> WorkItem {
    WorkItem { updated_at, version: 2, ..item("T-101", status, 2) }
}

// =============================================================
// request_move
// =============================================================

#[test]
fn request_applies_optimistic_move_and_holds() {
    let mut store = store();
    let mut coord = coordinator();
    let req = coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap();
    assert_eq!(req.id, WorkItemId::new("T-101"));
    assert_eq!(req.status, Status::InProgress);
    assert_eq!(store.slot_of(&"T-101".into()), Some(Slot::new(Status::InProgress, 2)));
    assert!(store.is_held(&"T-101".into()));
    assert!(coord.is_busy(&"T-101".into()));
    assert_eq!(coord.ledger.get(&"T-101".into()).map(|e| e.rollback), Some(Slot::new(Status::Todo, 0)));
}

#[test]
fn duplicate_request_while_pending_is_suppressed() {
    let mut store = store();
    let mut coord = coordinator();
    let now = Instant::now();
    coord.request_move(&move_t101(), &mut store, now).unwrap();
    let err = coord.request_move(&move_t101(), &mut store, now).unwrap_err();
    assert!(matches!(err, SyncError::DuplicateMutation { .. }));
    assert_eq!(coord.in_flight(), 1);
}

#[test]
fn duplicate_within_debounce_after_commit_is_suppressed() {
    let mut store = store();
    let mut coord = coordinator();
    let now = Instant::now();
    let req = coord.request_move(&move_t101(), &mut store, now).unwrap();
    coord.resolve_success(req.ticket, canonical(Status::InProgress, 2_000), &mut store);
    let err = coord
        .request_move(&move_t101(), &mut store, now + Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, SyncError::DuplicateMutation { .. }));
    let later = coord.request_move(&move_t101(), &mut store, now + DEBOUNCE);
    assert!(later.is_ok());
}

#[test]
fn debounce_memory_is_pruned_once_the_window_closes() {
    let mut store = store();
    let mut coord = coordinator();
    let now = Instant::now();
    let first = coord.request_move(&move_t101(), &mut store, now).unwrap();
    coord.resolve_success(first.ticket, canonical(Status::InProgress, 2_000), &mut store);
    let t102 = MoveRequested {
        id: WorkItemId::new("T-102"),
        source: Slot::new(Status::Todo, 0),
        dest: Slot::new(Status::Review, 0),
    };
    let second = coord.request_move(&t102, &mut store, now + Duration::from_millis(200)).unwrap();
    coord.resolve_success(second.ticket, WorkItem { updated_at: 2_000, ..item("T-102", Status::Review, 0) }, &mut store);
    assert_eq!(coord.recent.len(), 2);

    coord.expire(now + DEBOUNCE, &mut store);
    assert_eq!(coord.recent.len(), 1);
    coord.expire(now + Duration::from_millis(200) + DEBOUNCE, &mut store);
    assert!(coord.recent.is_empty());
}

#[test]
fn debounce_memory_is_dropped_for_items_deleted_in_flight() {
    let mut store = store();
    let mut coord = coordinator();
    let req = coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap();
    assert!(coord.defer_removal(&"T-101".into()));
    assert_eq!(coord.resolve_success(req.ticket, canonical(Status::InProgress, 2_000), &mut store), Resolution::Removed);
    assert!(coord.recent.is_empty());
}

#[test]
fn different_target_while_pending_is_busy() {
    let mut store = store();
    let mut coord = coordinator();
    let now = Instant::now();
    coord.request_move(&move_t101(), &mut store, now).unwrap();
    let other = MoveRequested { dest: Slot::new(Status::Done, 0), ..move_t101() };
    let err = coord.request_move(&other, &mut store, now).unwrap_err();
    assert_eq!(err, SyncError::Busy("T-101".into()));
    assert_eq!(store.slot_of(&"T-101".into()), Some(Slot::new(Status::InProgress, 2)));
}

#[test]
fn request_for_vanished_item_is_stale() {
    let mut store = store();
    store.remove_item(&"T-101".into());
    let mut coord = coordinator();
    let err = coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap_err();
    assert_eq!(err, SyncError::StaleData("T-101".into()));
    assert_eq!(coord.in_flight(), 0);
}

// =============================================================
// resolve_success
// =============================================================

#[test]
fn success_with_normalized_status_keeps_board_stable() {
    let mut store = store();
    let mut coord = coordinator();
    let req = coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap();
    let reply: WorkItem = serde_json::from_value(json!({
        "id": "T-101", "status": "IN_PROGRESS", "position": 0, "version": 2, "updated_at": 2_000
    }))
    .unwrap();
    let optimistic = store.snapshot();
    assert_eq!(coord.resolve_success(req.ticket, reply, &mut store), Resolution::Committed);
    assert_eq!(store.column(Status::InProgress), optimistic.column(Status::InProgress));
    assert_eq!(store.get(&"T-101".into()).map(|i| i.version), Some(2));
    assert!(!store.is_held(&"T-101".into()));
    assert!(!coord.is_busy(&"T-101".into()));
    assert!(coord.drain_notices().is_empty());
}

#[test]
fn success_then_queued_remote_applies_newest() {
    let mut store = store();
    let mut coord = coordinator();
    let req = coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap();
    assert!(coord.defer_remote(WorkItem { assignee: Some("bo".into()), ..canonical(Status::Review, 3_000) }));
    coord.resolve_success(req.ticket, canonical(Status::InProgress, 2_000), &mut store);
    let merged = store.get(&"T-101".into()).unwrap();
    assert_eq!(merged.status, Status::Review);
    assert_eq!(merged.assignee.as_deref(), Some("bo"));
}

#[test]
fn superseded_reply_is_ignored() {
    let mut store = store();
    let mut coord = coordinator();
    let req = coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap();
    let stale = Ticket { seq: req.ticket.seq + 1, ..req.ticket };
    assert_eq!(
        coord.resolve_success(stale, canonical(Status::Done, 2_000), &mut store),
        Resolution::Ignored
    );
    assert!(coord.is_busy(&"T-101".into()));
}

#[test]
fn success_after_remote_delete_removes_item() {
    let mut store = store();
    let mut coord = coordinator();
    let req = coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap();
    assert!(coord.defer_removal(&"T-101".into()));
    assert_eq!(
        coord.resolve_success(req.ticket, canonical(Status::InProgress, 2_000), &mut store),
        Resolution::Removed
    );
    assert!(store.get(&"T-101".into()).is_none());
    assert!(store.board().check_invariants().is_ok());
}

// =============================================================
// resolve_failure / expire
// =============================================================

#[test]
fn failure_rolls_back_to_original_slot_with_notice() {
    let mut store = store();
    let before = store.snapshot();
    let mut coord = coordinator();
    let req = coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap();
    let error = SyncError::Remote { status: 409, message: "workflow violation".into() };
    let resolution = coord.resolve_failure(&req.id, req.ticket, error.clone(), &mut store);
    assert_eq!(resolution, Resolution::RolledBack(error));
    assert_eq!(store.slot_of(&"T-101".into()), Some(Slot::new(Status::Todo, 0)));
    assert_eq!(store.board(), &before);
    let notices = coord.drain_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].id, WorkItemId::new("T-101"));
    assert_eq!(notices[0].code, "E_REMOTE");
    assert!(!coord.is_busy(&"T-101".into()));
}

#[test]
fn failure_allows_immediate_retry() {
    let mut store = store();
    let mut coord = coordinator();
    let now = Instant::now();
    let req = coord.request_move(&move_t101(), &mut store, now).unwrap();
    coord.resolve_failure(&req.id, req.ticket, SyncError::Network("reset".into()), &mut store);
    assert!(coord.request_move(&move_t101(), &mut store, now).is_ok());
}

#[test]
fn failure_applies_queued_remote_after_rollback() {
    let mut store = store();
    let mut coord = coordinator();
    let req = coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap();
    coord.defer_remote(WorkItem { assignee: Some("cy".into()), ..canonical(Status::Todo, 3_000) });
    coord.resolve_failure(&req.id, req.ticket, SyncError::Network("reset".into()), &mut store);
    let merged = store.get(&"T-101".into()).unwrap();
    assert_eq!(merged.status, Status::Todo);
    assert_eq!(merged.assignee.as_deref(), Some("cy"));
}

#[test]
fn timeout_takes_failure_path_and_ignores_late_reply() {
    let mut store = store();
    let mut coord = coordinator();
    let now = Instant::now();
    let req = coord.request_move(&move_t101(), &mut store, now).unwrap();
    assert!(coord.expire(now + Duration::from_secs(9), &mut store).is_empty());
    let expired = coord.expire(now + TIMEOUT, &mut store);
    assert_eq!(expired.len(), 1);
    assert!(matches!(expired[0].1, Resolution::RolledBack(SyncError::Timeout(_))));
    assert_eq!(store.slot_of(&"T-101".into()), Some(Slot::new(Status::Todo, 0)));
    assert_eq!(
        coord.resolve_success(req.ticket, canonical(Status::InProgress, 2_000), &mut store),
        Resolution::Ignored
    );
    assert_eq!(store.slot_of(&"T-101".into()), Some(Slot::new(Status::Todo, 0)));
}

// =============================================================
// reapply_optimistic
// =============================================================

#[test]
fn reload_keeps_optimistic_placement() {
    let mut store = store();
    let mut coord = coordinator();
    coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap();
    store.load(vec![
        item("T-101", Status::Todo, 0),
        item("T-102", Status::Todo, 1),
        item("T-103", Status::InProgress, 0),
        item("T-104", Status::InProgress, 1),
    ]);
    coord.reapply_optimistic(&mut store);
    assert_eq!(store.slot_of(&"T-101".into()), Some(Slot::new(Status::InProgress, 2)));
    assert!(store.is_held(&"T-101".into()));
}

#[test]
fn reload_without_item_marks_removed() {
    let mut store = store();
    let mut coord = coordinator();
    coord.request_move(&move_t101(), &mut store, Instant::now()).unwrap();
    store.load(vec![item("T-102", Status::Todo, 0)]);
    coord.reapply_optimistic(&mut store);
    assert!(coord.ledger.get(&"T-101".into()).unwrap().removed_remotely);
}

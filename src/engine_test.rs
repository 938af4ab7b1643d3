use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde_json::json;

use super::*;
use crate::item::Status;
use crate::listener::{RemoteChange, RemoteEventKind};
use crate::session::AllColumns;

// =============================================================
// Helpers
// =============================================================

const SETTLE: Duration = Duration::from_millis(150);
const QUIET: Duration = Duration::from_millis(200);

fn item(id: &str, status: Status, position: usize) -> WorkItem {
    WorkItem {
        id: WorkItemId::new(id),
        status,
        position,
        assignee: None,
        version: 1,
        updated_at: 1_000,
        metadata: json!({ "title": id }),
    }
}

fn board() -> Vec<WorkItem> {
    vec![
        item("T-101", Status::Todo, 0),
        item("T-102", Status::Todo, 1),
        item("T-103", Status::InProgress, 0),
        item("T-104", Status::InProgress, 1),
        item("T-105", Status::Review, 0),
    ]
}

fn core() -> SyncCore {
    let mut core = SyncCore::new(&SyncConfig::default());
    core.load(board()).unwrap();
    core
}

fn id(s: &str) -> WorkItemId {
    WorkItemId::new(s)
}

fn slot_in_view(core: &SyncCore, s: &str) -> Option<Slot> {
    core.view().slot_of(&id(s))
}

fn status_in_view(core: &SyncCore, s: &str) -> Option<Status> {
    core.view().get(&id(s)).map(|i| i.status)
}

fn mutations(effects: &[Effect]) -> Vec<MutationRequest> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::IssueMutation(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

fn notices(effects: &[Effect]) -> Vec<Notice> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Notify(n) => Some(n.clone()),
            _ => None,
        })
        .collect()
}

fn refetches(effects: &[Effect]) -> Vec<RefetchRequest> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Refetch(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

/// Drag `who` onto `dest` and return the single issued mutation.
fn drag_and_drop(core: &mut SyncCore, who: &str, dest: Slot, now: Instant) -> MutationRequest {
    core.begin_drag(&id(who), now).unwrap();
    core.hover(Some(dest), now + Duration::from_millis(10));
    let effects = core.drop_on(Some(dest), &AllColumns, now + Duration::from_millis(20)).unwrap();
    let issued = mutations(&effects);
    assert_eq!(issued.len(), 1);
    issued[0].clone()
}

fn canonical_from_server(who: &str, status: &str, updated_at: i64) -> WorkItem {
    serde_json::from_value(json!({ "id": who, "status": status, "updated_at": updated_at, "version": 2 })).unwrap()
}

fn remote_status(who: &str, status: Status, updated_at: i64) -> RemoteEvent {
    let mut record = item(who, status, 0);
    record.updated_at = updated_at;
    RemoteEvent { kind: RemoteEventKind::StatusChanged, change: RemoteChange::Upsert(record) }
}

// =============================================================
// Optimistic move lifecycle
// =============================================================

#[test]
fn move_commits_with_normalized_status_and_stays_stable() {
    let mut core = core();
    let t0 = Instant::now();
    let dest = Slot::new(Status::InProgress, 2);
    let request = drag_and_drop(&mut core, "T-101", dest, t0);
    assert_eq!(request.status, Status::InProgress);

    // Optimistic: visible before any confirmation.
    assert_eq!(slot_in_view(&core, "T-101"), Some(dest));
    assert!(core.is_busy(&id("T-101")));

    let effects = core.on_mutation_result(
        request.ticket,
        id("T-101"),
        Ok(canonical_from_server("T-101", "IN_PROGRESS", 2_000)),
        t0 + Duration::from_millis(80),
    );
    assert!(mutations(&effects).is_empty());
    assert!(effects.contains(&Effect::BusyChanged { id: id("T-101"), busy: false }));
    assert!(!core.is_busy(&id("T-101")));
    assert_eq!(core.in_flight(), 0);
    assert_eq!(slot_in_view(&core, "T-101"), Some(dest));
    assert!(core.store().board().check_invariants().is_ok());
}

#[test]
fn failed_move_rolls_back_and_notifies() {
    let mut core = core();
    let t0 = Instant::now();
    let request = drag_and_drop(&mut core, "T-101", Slot::new(Status::InProgress, 0), t0);

    let effects = core.on_mutation_result(
        request.ticket,
        id("T-101"),
        Err(SyncError::Network("connection reset".into())),
        t0 + Duration::from_millis(50),
    );
    assert_eq!(slot_in_view(&core, "T-101"), Some(Slot::new(Status::Todo, 0)));
    let raised = notices(&effects);
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].code, "E_NETWORK");
    assert!(effects.contains(&Effect::BusyChanged { id: id("T-101"), busy: false }));
}

#[test]
fn failure_forces_a_resync() {
    let mut core = core();
    let t0 = Instant::now();
    let request = drag_and_drop(&mut core, "T-101", Slot::new(Status::Done, 0), t0);
    core.on_mutation_result(request.ticket, id("T-101"), Err(SyncError::Network("down".into())), t0);
    let effects = core.tick(t0 + SETTLE + QUIET);
    let issued = refetches(&effects);
    assert_eq!(issued.len(), 1);
    assert!(issued[0].reasons.contains(&ReconcileReason::MutationFailed));
}

#[test]
fn busy_item_cannot_start_a_second_gesture() {
    let mut core = core();
    let t0 = Instant::now();
    drag_and_drop(&mut core, "T-101", Slot::new(Status::InProgress, 0), t0);
    core.tick(t0 + SETTLE + Duration::from_millis(20));
    let err = core.begin_drag(&id("T-101"), t0 + Duration::from_millis(200)).unwrap_err();
    assert_eq!(err, SyncError::Busy(id("T-101")));
}

#[test]
fn repeat_move_inside_debounce_issues_no_second_call() {
    let mut core = core();
    let t0 = Instant::now();
    let request = drag_and_drop(&mut core, "T-101", Slot::new(Status::InProgress, 2), t0);
    core.on_mutation_result(request.ticket, id("T-101"), Ok(canonical_from_server("T-101", "in_progress", 2_000)), t0);
    core.tick(t0 + SETTLE + Duration::from_millis(20));

    let t1 = t0 + Duration::from_millis(200);
    core.begin_drag(&id("T-101"), t1).unwrap();
    let effects = core.drop_on(Some(Slot::new(Status::InProgress, 0)), &AllColumns, t1).unwrap();
    assert!(mutations(&effects).is_empty());
    assert_eq!(core.in_flight(), 0);
    assert_eq!(status_in_view(&core, "T-101"), Some(Status::InProgress));
}

#[test]
fn timeout_rolls_back_and_late_reply_is_ignored() {
    let mut core = core();
    let t0 = Instant::now();
    let request = drag_and_drop(&mut core, "T-101", Slot::new(Status::Review, 0), t0);

    let effects = core.tick(t0 + Duration::from_secs(11));
    assert_eq!(slot_in_view(&core, "T-101"), Some(Slot::new(Status::Todo, 0)));
    assert_eq!(notices(&effects)[0].code, "E_TIMEOUT");
    assert!(!core.is_busy(&id("T-101")));

    let late = core.on_mutation_result(
        request.ticket,
        id("T-101"),
        Ok(canonical_from_server("T-101", "review", 2_000)),
        t0 + Duration::from_secs(12),
    );
    assert!(late.is_empty());
    assert_eq!(status_in_view(&core, "T-101"), Some(Status::Todo));
}

// =============================================================
// Gesture boundaries
// =============================================================

#[test]
fn cancel_restores_identical_board() {
    let mut core = core();
    let before = core.store().snapshot();
    let t0 = Instant::now();
    core.begin_drag(&id("T-103"), t0).unwrap();
    core.hover(Some(Slot::new(Status::Done, 0)), t0 + Duration::from_millis(5));
    core.cancel_drag(CancelReason::Aborted, t0 + Duration::from_millis(10)).unwrap();
    assert_eq!(core.phase(), DragPhase::Idle);
    assert_eq!(core.store().snapshot(), before);
    assert_eq!(*core.view(), before);
}

#[test]
fn drop_outside_cancels_without_network() {
    let mut core = core();
    let t0 = Instant::now();
    core.begin_drag(&id("T-101"), t0).unwrap();
    let effects = core.drop_on(None, &AllColumns, t0).unwrap();
    assert!(mutations(&effects).is_empty());
    assert_eq!(core.phase(), DragPhase::Idle);
}

#[test]
fn drop_on_unmounted_column_cancels_silently() {
    let mut core = core();
    let t0 = Instant::now();
    let mounted: HashSet<Status> = [Status::Todo, Status::InProgress].into_iter().collect();
    core.begin_drag(&id("T-101"), t0).unwrap();
    let effects = core.drop_on(Some(Slot::new(Status::Done, 0)), &mounted, t0).unwrap();
    assert!(mutations(&effects).is_empty());
    assert!(notices(&effects).is_empty());
    assert_eq!(slot_in_view(&core, "T-101"), Some(Slot::new(Status::Todo, 0)));
}

#[test]
fn drop_on_origin_settles_without_mutation() {
    let mut core = core();
    let t0 = Instant::now();
    core.begin_drag(&id("T-102"), t0).unwrap();
    let effects = core.drop_on(Some(Slot::new(Status::Todo, 1)), &AllColumns, t0).unwrap();
    assert!(mutations(&effects).is_empty());
    assert_eq!(core.phase(), DragPhase::Settling);
    core.tick(t0 + SETTLE);
    assert_eq!(core.phase(), DragPhase::Idle);
}

#[test]
fn stale_gesture_is_force_cancelled() {
    let mut core = core();
    let t0 = Instant::now();
    core.begin_drag(&id("T-101"), t0).unwrap();
    core.tick(t0 + Duration::from_secs(10));
    assert_eq!(core.phase(), DragPhase::Idle);
}

#[test]
fn drop_without_gesture_is_invalid() {
    let mut core = core();
    let err = core.drop_on(None, &AllColumns, Instant::now()).unwrap_err();
    assert!(matches!(err, SyncError::InvalidSession(_)));
}

// =============================================================
// Remote events around a gesture
// =============================================================

#[test]
fn remote_change_is_invisible_until_session_settles() {
    let mut core = core();
    let t0 = Instant::now();
    core.begin_drag(&id("T-101"), t0).unwrap();
    core.on_remote_event(remote_status("T-102", Status::Done, 2_000), t0 + Duration::from_millis(5));
    assert_eq!(status_in_view(&core, "T-102"), Some(Status::Todo));
    assert_eq!(core.store().get(&id("T-102")).map(|i| i.status), Some(Status::Todo));

    core.drop_on(Some(Slot::new(Status::InProgress, 0)), &AllColumns, t0 + Duration::from_millis(30)).unwrap();
    assert_eq!(status_in_view(&core, "T-102"), Some(Status::Todo));
    core.tick(t0 + Duration::from_millis(100));
    assert_eq!(status_in_view(&core, "T-102"), Some(Status::Todo));

    let effects = core.tick(t0 + Duration::from_millis(30) + SETTLE);
    assert_eq!(core.phase(), DragPhase::Idle);
    assert_eq!(status_in_view(&core, "T-102"), Some(Status::Done));
    assert!(effects.iter().any(|e| matches!(e, Effect::RenderNeeded(_))));
    assert_eq!(core.buffered_events(), 0);
}

#[test]
fn remote_change_applies_immediately_when_idle() {
    let mut core = core();
    let effects = core.on_remote_event(remote_status("T-105", Status::Done, 2_000), Instant::now());
    assert_eq!(status_in_view(&core, "T-105"), Some(Status::Done));
    assert!(effects.iter().any(|e| matches!(e, Effect::RenderNeeded(_))));
}

#[test]
fn remote_change_for_busy_item_waits_for_resolution() {
    let mut core = core();
    let t0 = Instant::now();
    let request = drag_and_drop(&mut core, "T-101", Slot::new(Status::InProgress, 0), t0);
    core.tick(t0 + SETTLE + Duration::from_millis(20));
    core.on_remote_event(remote_status("T-101", Status::Done, 5_000), t0 + Duration::from_millis(300));
    assert_eq!(status_in_view(&core, "T-101"), Some(Status::InProgress));

    core.on_mutation_result(
        request.ticket,
        id("T-101"),
        Ok(canonical_from_server("T-101", "in_progress", 2_000)),
        t0 + Duration::from_millis(400),
    );
    assert_eq!(status_in_view(&core, "T-101"), Some(Status::Done));
}

#[test]
fn dragged_item_deleted_remotely_discards_the_move() {
    let mut core = core();
    let t0 = Instant::now();
    core.begin_drag(&id("T-101"), t0).unwrap();
    core.on_remote_event(
        RemoteEvent { kind: RemoteEventKind::Deleted, change: RemoteChange::Delete { id: id("T-101"), ts: 2_000 } },
        t0 + Duration::from_millis(5),
    );
    let effects = core.drop_on(Some(Slot::new(Status::Done, 0)), &AllColumns, t0 + Duration::from_millis(10)).unwrap();
    assert!(mutations(&effects).is_empty());
    assert_eq!(core.phase(), DragPhase::Idle);
    assert!(core.view().get(&id("T-101")).is_none());
    assert!(core.store().board().check_invariants().is_ok());
}

#[test]
fn mutation_reply_during_drag_is_deferred() {
    let mut core = core();
    let t0 = Instant::now();
    let request = drag_and_drop(&mut core, "T-101", Slot::new(Status::InProgress, 0), t0);
    core.tick(t0 + SETTLE + Duration::from_millis(20));

    let t1 = t0 + Duration::from_millis(500);
    core.begin_drag(&id("T-105"), t1).unwrap();
    let effects = core.on_mutation_result(request.ticket, id("T-101"), Err(SyncError::Network("reset".into())), t1);
    assert!(effects.is_empty());
    assert_eq!(core.store().get(&id("T-101")).map(|i| i.status), Some(Status::InProgress));

    let effects = core.cancel_drag(CancelReason::Outside, t1 + Duration::from_millis(10)).unwrap();
    assert_eq!(slot_in_view(&core, "T-101"), Some(Slot::new(Status::Todo, 0)));
    assert!(effects.contains(&Effect::BusyChanged { id: id("T-101"), busy: false }));
    assert_eq!(notices(&effects).len(), 1);
}

// =============================================================
// Reconciliation
// =============================================================

#[test]
fn commit_triggers_one_coalesced_refetch() {
    let mut core = core();
    let t0 = Instant::now();
    let request = drag_and_drop(&mut core, "T-101", Slot::new(Status::InProgress, 0), t0);
    core.on_mutation_result(request.ticket, id("T-101"), Ok(canonical_from_server("T-101", "in_progress", 2_000)), t0);
    core.request_refresh(t0 + Duration::from_millis(50));

    assert!(refetches(&core.tick(t0 + Duration::from_millis(100))).is_empty());
    let issued = refetches(&core.tick(t0 + Duration::from_millis(50) + QUIET));
    assert_eq!(issued.len(), 1);
    assert!(refetches(&core.tick(t0 + Duration::from_secs(2))).is_empty());
}

#[test]
fn refetch_is_not_issued_while_dragging() {
    let mut core = core();
    let t0 = Instant::now();
    core.request_refresh(t0);
    core.begin_drag(&id("T-102"), t0).unwrap();
    assert!(refetches(&core.tick(t0 + QUIET * 2)).is_empty());
    core.cancel_drag(CancelReason::Aborted, t0 + QUIET * 2).unwrap();
    assert_eq!(refetches(&core.tick(t0 + QUIET * 3)).len(), 1);
}

#[test]
fn refetch_result_parks_until_idle_and_keeps_optimistic_moves() {
    let mut core = core();
    let t0 = Instant::now();
    core.request_refresh(t0);
    let request = refetches(&core.tick(t0 + QUIET)).remove(0);

    let mutation = drag_and_drop(&mut core, "T-104", Slot::new(Status::Done, 0), t0 + QUIET);
    let mut server = board();
    server.push(item("T-200", Status::Todo, 2));
    core.on_refetch_result(request.seq, Ok(server), t0 + QUIET + Duration::from_millis(40));
    assert!(core.view().get(&id("T-200")).is_none());

    core.tick(t0 + QUIET + Duration::from_millis(20) + SETTLE);
    assert_eq!(core.phase(), DragPhase::Idle);
    assert!(core.view().get(&id("T-200")).is_some());
    // Server still has T-104 in progress; the pending move wins.
    assert_eq!(status_in_view(&core, "T-104"), Some(Status::Done));
    assert!(core.is_busy(&mutation.id));
}

#[test]
fn parked_refetch_does_not_hide_change_buffered_during_drag() {
    let mut core = core();
    let t0 = Instant::now();
    core.request_refresh(t0);
    let request = refetches(&core.tick(t0 + QUIET)).remove(0);

    let t1 = t0 + QUIET + Duration::from_millis(10);
    core.begin_drag(&id("T-101"), t1).unwrap();
    core.on_refetch_result(request.seq, Ok(board()), t1 + Duration::from_millis(5));
    core.on_remote_event(remote_status("T-102", Status::Done, 5_000), t1 + Duration::from_millis(10));
    core.cancel_drag(CancelReason::Outside, t1 + Duration::from_millis(20)).unwrap();

    assert_eq!(core.phase(), DragPhase::Idle);
    assert_eq!(status_in_view(&core, "T-102"), Some(Status::Done));
    assert!(core.view().check_invariants().is_ok());
}

#[test]
fn older_refetch_result_keeps_change_applied_while_in_flight() {
    let mut core = core();
    let t0 = Instant::now();
    core.request_refresh(t0);
    let request = refetches(&core.tick(t0 + QUIET)).remove(0);

    core.on_remote_event(remote_status("T-102", Status::Done, 5_000), t0 + QUIET + Duration::from_millis(10));
    core.on_remote_event(
        RemoteEvent { kind: RemoteEventKind::Deleted, change: RemoteChange::Delete { id: id("T-105"), ts: 5_000 } },
        t0 + QUIET + Duration::from_millis(15),
    );
    let mut server = board();
    server.push(item("T-200", Status::Todo, 2));
    core.on_refetch_result(request.seq, Ok(server), t0 + QUIET + Duration::from_millis(40));

    assert_eq!(status_in_view(&core, "T-102"), Some(Status::Done));
    assert!(core.view().get(&id("T-105")).is_none());
    assert!(core.view().get(&id("T-200")).is_some());
    assert!(core.view().check_invariants().is_ok());
}

#[test]
fn refetch_result_still_replaces_records_not_touched_since_the_request() {
    let mut core = core();
    let t0 = Instant::now();
    core.on_remote_event(remote_status("T-102", Status::Done, 5_000), t0);
    core.request_refresh(t0);
    let request = refetches(&core.tick(t0 + QUIET)).remove(0);

    let mut server = board();
    server[1].updated_at = 6_000;
    core.on_refetch_result(request.seq, Ok(server), t0 + QUIET + Duration::from_millis(40));
    assert_eq!(status_in_view(&core, "T-102"), Some(Status::Todo));
}

#[test]
fn reconnect_schedules_a_resync() {
    let mut core = core();
    let t0 = Instant::now();
    core.on_reconnected(t0);
    let issued = refetches(&core.tick(t0 + QUIET));
    assert_eq!(issued[0].reasons, vec![ReconcileReason::Reconnected]);
    assert_eq!(core.next_wakeup(), None);
}

#[test]
fn load_refused_mid_gesture() {
    let mut core = core();
    core.begin_drag(&id("T-101"), Instant::now()).unwrap();
    assert!(matches!(core.load(board()), Err(SyncError::InvalidSession(_))));
}

use serde_json::json;

use super::*;
use taskboard_sync::item::WorkItem;
use taskboard_sync::store::BoardStore;

#[test]
fn parse_move_with_lenient_status() {
    let input = parse_input("move T-101 IN_PROGRESS 2").unwrap();
    assert_eq!(input, Input::Move { id: WorkItemId::new("T-101"), slot: Slot::new(Status::InProgress, 2) });
}

#[test]
fn parse_move_rejects_missing_or_bad_arguments() {
    assert!(parse_input("move T-101 done").is_err());
    assert!(parse_input("move T-101 archived 0").is_err());
    assert!(parse_input("move T-101 done first").is_err());
}

#[test]
fn parse_simple_commands() {
    assert_eq!(parse_input("refresh").unwrap(), Input::Refresh);
    assert_eq!(parse_input("  show ").unwrap(), Input::Show);
    assert_eq!(parse_input("exit").unwrap(), Input::Quit);
    assert!(parse_input("dance").is_err());
}

#[test]
fn gesture_is_begin_hover_drop() {
    let slot = Slot::new(Status::Done, 0);
    let [begin, hover, drop] = gesture(WorkItemId::new("T-1"), slot);
    assert_eq!(begin, Command::BeginDrag(WorkItemId::new("T-1")));
    assert_eq!(hover, Command::Hover(Some(slot)));
    assert_eq!(drop, Command::Drop { target: Some(slot), mounted: None });
}

#[test]
fn render_board_marks_busy_items() {
    let item = |id: &str, status: Status| WorkItem {
        id: WorkItemId::new(id),
        status,
        position: 0,
        assignee: None,
        version: 1,
        updated_at: 1,
        metadata: json!({}),
    };
    let mut store = BoardStore::new();
    let mut titled = item("T-3", Status::Review);
    titled.metadata = json!({ "title": "Fix login" });
    store.load(vec![item("T-1", Status::Todo), item("T-2", Status::Done), titled]);
    store.publish();
    let busy: BTreeSet<WorkItemId> = [WorkItemId::new("T-2")].into_iter().collect();
    let text = render_board(&store.view(), &busy);
    assert!(text.contains("todo: T-1"));
    assert!(text.contains("done: T-2*"));
    assert!(text.contains("review: T-3 (Fix login)"));
    assert_eq!(text.lines().count(), 4);
}

//! Undo and redo through client sessions sharing a room.

use serde_json::json;
use trellis::crdt::{LiveValue, Mutation};

use crate::helpers::{TestRoom, root_child, set_root, text};

#[test]
fn test_undo_redo_are_inverse() {
    let mut room = TestRoom::new(2);
    room.mutate(0, set_root("title", json!("v1")));
    room.mutate(0, set_root("title", json!("v2")));
    room.sync();
    let after = room.assert_converged();
    assert_eq!(after, json!({"title": "v2"}));

    let now = room.now;
    room.client(0).undo(now).unwrap();
    room.sync();
    assert_eq!(room.assert_converged(), json!({"title": "v1"}));

    room.client(0).redo(now).unwrap();
    room.sync();
    assert_eq!(room.assert_converged(), after);
    assert!(room.client(0).can_undo());
    assert!(!room.client(0).can_redo());
}

#[test]
fn test_undo_of_list_insert_is_shared() {
    let mut room = TestRoom::new(2);
    room.mutate(0, set_root("todos", LiveValue::list([text("write tests")])));
    room.sync();
    let todos = root_child(room.client(1).document().unwrap(), "todos");

    room.mutate(
        1,
        Mutation::ListPush {
            node: todos,
            value: text("ship"),
        },
    );
    room.sync();
    assert_eq!(room.assert_converged(), json!({"todos": ["write tests", "ship"]}));

    let now = room.now;
    room.client(1).undo(now).unwrap();
    room.sync();
    assert_eq!(room.assert_converged(), json!({"todos": ["write tests"]}));
}

#[test]
fn test_new_change_clears_redo() {
    let mut room = TestRoom::new(1);
    room.mutate(0, set_root("a", json!(1)));
    let now = room.now;
    room.client(0).undo(now).unwrap();
    assert!(room.client(0).can_redo());

    room.mutate(0, set_root("b", json!(2)));
    assert!(!room.client(0).can_redo());
    room.sync();
    assert_eq!(room.assert_converged(), json!({"b": 2}));
}

#[test]
fn test_paused_history_records_one_step() {
    let mut room = TestRoom::new(1);
    room.client(0).pause_history();
    for step in 0..5 {
        room.mutate(0, set_root("x", json!(step)));
    }
    room.client(0).resume_history().unwrap();
    assert_eq!(room.client(0).root_json(), Some(json!({"x": 4})));

    let now = room.now;
    room.client(0).undo(now).unwrap();
    assert_eq!(room.client(0).root_json(), Some(json!({})));
    assert!(!room.client(0).can_undo());

    let err = room.client(0).resume_history().unwrap_err();
    assert!(err.is_usage_error());
}

/// Undoes and redoes the last change of client 0 before anything is flushed,
/// so the server echoes the original, the undo and the redo in one batch.
fn undo_redo_before_flush(room: &mut TestRoom) {
    let now = room.now;
    room.client(0).undo(now).unwrap();
    room.client(0).redo(now).unwrap();
    room.sync();
}

#[test]
fn test_map_set_undone_and_redone_before_flush() {
    let mut room = TestRoom::new(2);
    room.mutate(0, set_root("m", LiveValue::map([("a", text("1"))])));
    room.sync();
    let map = root_child(room.client(0).document().unwrap(), "m");

    room.mutate(
        0,
        Mutation::MapSet {
            node: map,
            key: "k".to_string(),
            value: text("v"),
        },
    );
    undo_redo_before_flush(&mut room);
    assert_eq!(room.assert_converged(), json!({"m": {"a": "1", "k": "v"}}));
    assert!(room.client(0).offline_ops().is_empty());
}

#[test]
fn test_list_push_undone_and_redone_before_flush() {
    let mut room = TestRoom::new(2);
    room.mutate(0, set_root("todos", LiveValue::list([text("first")])));
    room.sync();
    let todos = root_child(room.client(0).document().unwrap(), "todos");

    room.mutate(
        0,
        Mutation::ListPush {
            node: todos,
            value: text("second"),
        },
    );
    undo_redo_before_flush(&mut room);
    assert_eq!(room.assert_converged(), json!({"todos": ["first", "second"]}));
}

#[test]
fn test_object_child_undone_and_redone_before_flush() {
    let mut room = TestRoom::new(2);
    room.mutate(
        0,
        set_root("card", LiveValue::object([("title", text("draft"))])),
    );
    undo_redo_before_flush(&mut room);
    assert_eq!(room.assert_converged(), json!({"card": {"title": "draft"}}));
    assert!(room.client(0).can_undo());
}

//! Several clients and one server storage converging in a room.

use std::sync::{Arc, Mutex};

use serde_json::json;
use trellis::crdt::{JsonObject, LiveValue, Mutation};
use trellis::session::{EventKind, SessionEvent};

use crate::helpers::{TestRoom, root_child, set_root, text};

fn presence(value: serde_json::Value) -> JsonObject {
    let serde_json::Value::Object(object) = value else {
        panic!("object expected");
    };
    object
}

#[test]
fn test_clients_converge_on_concurrent_edits() {
    let mut room = TestRoom::new(3);
    room.mutate(0, set_root("items", LiveValue::list([])));
    room.sync();
    let items = root_child(room.client(1).document().unwrap(), "items");

    for (client, value) in [(0, "from 0"), (1, "from 1"), (2, "from 2")] {
        room.mutate(
            client,
            Mutation::ListPush {
                node: items.clone(),
                value: text(value),
            },
        );
        room.mutate(client, set_root("last", json!(value)));
    }
    room.sync();

    let state = room.assert_converged();
    assert_eq!(state["items"].as_array().unwrap().len(), 3);
    // The server applies messages in client order, so client 2 writes last.
    assert_eq!(state["last"], json!("from 2"));
    for index in 0..3 {
        assert!(room.client(index).offline_ops().is_empty());
    }
}

#[test]
fn test_colliding_inserts_are_moved_by_the_server() {
    let mut room = TestRoom::new(2);
    room.mutate(0, set_root("items", LiveValue::list([])));
    room.sync();
    let items = root_child(room.client(0).document().unwrap(), "items");

    // Both clients pick the same position for their first item.
    for (client, value) in [(0, "a"), (1, "b")] {
        room.mutate(
            client,
            Mutation::ListInsert {
                node: items.clone(),
                index: 0,
                value: text(value),
            },
        );
    }
    room.sync();

    let state = room.assert_converged();
    assert_eq!(state["items"], json!(["a", "b"]));
}

#[test]
fn test_concurrent_list_set_converges() {
    let mut room = TestRoom::new(2);
    room.mutate(0, set_root("items", LiveValue::list([text("x"), text("y")])));
    room.sync();
    let items = root_child(room.client(0).document().unwrap(), "items");

    room.mutate(
        0,
        Mutation::ListSet {
            node: items.clone(),
            index: 0,
            value: text("from 0"),
        },
    );
    room.mutate(
        1,
        Mutation::ListSet {
            node: items,
            index: 0,
            value: text("from 1"),
        },
    );
    room.sync();

    let state = room.assert_converged();
    assert_eq!(state["items"].as_array().unwrap().last(), Some(&json!("y")));
}

#[test]
fn test_offline_edits_are_replayed_after_reconnect() {
    let mut room = TestRoom::new(2);
    room.mutate(0, set_root("doc", LiveValue::object([("title", text("untitled"))])));
    room.sync();

    room.disconnect(1);
    room.mutate(1, set_root("offline", json!(true)));
    room.mutate(0, set_root("online", json!(true)));
    room.sync();
    assert_eq!(room.client(1).offline_ops().len(), 1);
    assert!(room.client(1).root_json().unwrap().get("online").is_none());

    room.reconnect(1);
    let state = room.assert_converged();
    assert_eq!(state["offline"], json!(true));
    assert_eq!(state["online"], json!(true));
    assert!(room.client(1).offline_ops().is_empty());
}

#[test]
fn test_reconnect_drops_changes_the_server_never_saw() {
    let mut room = TestRoom::new(2);
    room.mutate(0, set_root("items", LiveValue::list([text("keep")])));
    room.sync();
    let items = root_child(room.client(1).document().unwrap(), "items");

    room.disconnect(1);
    room.mutate(
        0,
        Mutation::ListDelete {
            node: items.clone(),
            index: 0,
        },
    );
    room.sync();
    room.reconnect(1);
    assert_eq!(room.assert_converged(), json!({"items": []}));
}

#[test]
fn test_presence_and_events_reach_the_others() {
    let mut room = TestRoom::new(2);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    room.client(1).subscribe(
        EventKind::Event,
        Box::new(move |event| sink.lock().unwrap().push(event.clone())),
    );

    let now = room.now;
    room.client(0)
        .update_presence(presence(json!({"cursor": {"x": 1, "y": 2}})), false, now);
    room.client(0).broadcast_event(json!({"emoji": "wave"}), now);
    room.sync();

    let others = room.client(1).others();
    assert_eq!(others.len(), 1);
    assert_eq!(others[0].actor, 1);
    assert_eq!(others[0].presence["cursor"], json!({"x": 1, "y": 2}));
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[SessionEvent::Event {
            actor: 1,
            event: json!({"emoji": "wave"}),
        }]
    );
}

#[test]
fn test_storage_events_report_remote_changes() {
    let mut room = TestRoom::new(2);
    let seen = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&seen);
    room.client(1).subscribe(
        EventKind::Storage,
        Box::new(move |_| *counter.lock().unwrap() += 1),
    );

    room.mutate(0, set_root("a", json!(1)));
    room.sync();
    assert_eq!(*seen.lock().unwrap(), 1);
}

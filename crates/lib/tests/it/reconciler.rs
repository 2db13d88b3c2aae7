//! Conflict rules, exercised with hand-built op streams.

use serde_json::json;
use trellis::crdt::{CreateOp, CrdtType, Document, IdGenerator, JsonObject, NodeId, Op, OpId, Pos};
use trellis::reconciler::{Provenance, apply_ops};

use crate::helpers::{doc_with_list, mutate_doc, set_root};

fn update(id: &NodeId, op_id: &str, data: serde_json::Value) -> Op {
    let serde_json::Value::Object(data) = data else {
        panic!("object data expected");
    };
    Op::UpdateObject {
        op_id: Some(OpId::new(op_id)),
        id: id.clone(),
        data: JsonObject::from_iter(data),
    }
}

#[test]
fn test_remote_write_loses_against_pending_local_write() {
    let mut doc = Document::new();
    let root = NodeId::root();
    let local = update(&root, "1:0", json!({"color": "red"}));
    apply_ops(&mut doc, std::slice::from_ref(&local), |_| Provenance::Local).unwrap();

    // Another client's write reaches us before our own echo.
    let remote = update(&root, "2:0", json!({"color": "blue"}));
    let result = apply_ops(&mut doc, &[remote], |_| Provenance::Remote).unwrap();
    assert!(result.updates.is_empty());
    assert_eq!(doc.root_json(), json!({"color": "red"}));

    // Our echo clears the marker without changing anything.
    let result = apply_ops(&mut doc, &[local], |_| Provenance::Ack).unwrap();
    assert!(result.updates.is_empty());

    let later = update(&root, "2:1", json!({"color": "green"}));
    apply_ops(&mut doc, &[later], |_| Provenance::Remote).unwrap();
    assert_eq!(doc.root_json(), json!({"color": "green"}));
}

#[test]
fn test_deleting_deep_subtree() {
    let mut doc = Document::new();
    let mut parent = NodeId::root();
    let mut ops = Vec::new();
    for depth in 0..100 {
        let id = NodeId::new(format!("1:{depth}"));
        ops.push(Op::create(
            CrdtType::Object,
            CreateOp::new(id.clone(), parent.clone(), "child").with_data(json!({"depth": depth})),
        ));
        parent = id;
    }
    apply_ops(&mut doc, &ops, |_| Provenance::Remote).unwrap();
    assert_eq!(doc.len(), 101);

    let delete = Op::DeleteCrdt {
        op_id: None,
        id: NodeId::new("1:0"),
    };
    let result = apply_ops(&mut doc, &[delete], |_| Provenance::Local).unwrap();
    assert_eq!(doc.len(), 1);
    assert_eq!(doc.root_json(), json!({}));

    // The reverse ops rebuild the whole chain.
    apply_ops(&mut doc, &result.reverse, |_| Provenance::Remote).unwrap();
    assert_eq!(doc.len(), 101);
}

#[test]
fn test_reverse_ops_undo_a_batch() {
    let mut ids = IdGenerator::new(1);
    let mut doc = Document::new();
    mutate_doc(&mut doc, &mut ids, set_root("title", json!("draft")));
    let before = doc.root_json();

    let ops = vec![
        update(&NodeId::root(), "1:10", json!({"title": "final", "extra": 1})),
        Op::DeleteObjectKey {
            op_id: Some(OpId::new("1:11")),
            id: NodeId::root(),
            key: "title".to_string(),
        },
    ];
    let result = apply_ops(&mut doc, &ops, |_| Provenance::Local).unwrap();
    assert_eq!(doc.root_json(), json!({"extra": 1}));

    apply_ops(&mut doc, &result.reverse, |_| Provenance::UndoRedo).unwrap();
    assert_eq!(doc.root_json(), before);
}

#[test]
fn test_concurrent_inserts_at_same_position_keep_both() {
    let mut ids = IdGenerator::new(1);
    let (mut doc, list) = doc_with_list(&mut ids);
    let pos = "!".to_string();
    let mine = Op::create(
        CrdtType::Register,
        CreateOp::new(NodeId::new("1:50"), list.clone(), pos.clone()).with_data(json!("mine")),
    )
    .with_op_id(OpId::new("1:51"));
    let theirs = Op::create(
        CrdtType::Register,
        CreateOp::new(NodeId::new("2:0"), list.clone(), pos).with_data(json!("theirs")),
    )
    .with_op_id(OpId::new("2:1"));

    apply_ops(&mut doc, std::slice::from_ref(&mine), |_| Provenance::Local).unwrap();
    let result = apply_ops(&mut doc, &[theirs], |_| Provenance::Remote).unwrap();
    assert_eq!(result.updates.len(), 1);

    let items = doc.list(&list).unwrap();
    assert_eq!(items.len(), 2);
    // The remote item takes the contested slot; ours is shifted aside.
    assert_eq!(items.index_of_id(&NodeId::new("2:0")), items.index_of_pos(&Pos::parse("!").unwrap()));
}

#[test]
fn test_echo_of_replayed_creation_restores_detached_child() {
    for parent_kind in [CrdtType::Object, CrdtType::Map] {
        let mut doc = Document::new();
        let parent = match parent_kind {
            CrdtType::Map => {
                let map = NodeId::new("1:0");
                let create_map =
                    Op::create(CrdtType::Map, CreateOp::new(map.clone(), NodeId::root(), "m"));
                apply_ops(&mut doc, &[create_map], |_| Provenance::Remote).unwrap();
                map
            }
            _ => NodeId::root(),
        };
        let child = NodeId::new("1:5");
        let create = |op_id: &str| {
            Op::create(
                CrdtType::Object,
                CreateOp::new(child.clone(), parent.clone(), "k").with_data(json!({"n": 1})),
            )
            .with_op_id(OpId::new(op_id))
        };
        let delete = Op::DeleteCrdt {
            op_id: Some(OpId::new("1:11")),
            id: child.clone(),
        };

        // Set, delete, then replay the set, all before the server answers.
        apply_ops(&mut doc, &[create("1:10"), delete.clone()], |_| Provenance::Local).unwrap();
        apply_ops(&mut doc, &[create("1:12")], |_| Provenance::UndoRedo).unwrap();
        let expected = doc.root_json();

        // The server applied the same three ops and echoes them in order.
        let echo = [create("1:10"), delete, create("1:12")];
        apply_ops(&mut doc, &echo, |_| Provenance::Ack).unwrap();
        assert_eq!(doc.root_json(), expected, "{parent_kind} parent");
        assert!(doc.contains(&child));
    }
}

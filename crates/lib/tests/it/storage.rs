//! Storage drivers, healing and server-side persistence.

use serde_json::json;
use trellis::crdt::{CreateOp, CrdtType, Document, NodeId, NodeItem, Op, OpId, SerializedNode};
use trellis::storage::{FileDriver, MemoryDriver, RoomStorage, StorageDriver, heal};

fn id(s: &str) -> NodeId {
    NodeId::new(s)
}

/// A tree with one defect of each kind.
fn corrupt_items() -> Vec<NodeItem> {
    vec![
        (
            NodeId::root(),
            SerializedNode {
                data: Some(json!({"title": "static"})),
                ..SerializedNode::root()
            },
        ),
        (id("1:0"), SerializedNode::child(CrdtType::List, NodeId::root(), "list", None)),
        // Same slot: the higher id wins.
        (id("1:1"), SerializedNode::child(CrdtType::Register, id("1:0"), "!", Some(json!("lost")))),
        (id("1:2"), SerializedNode::child(CrdtType::Register, id("1:0"), "!", Some(json!("kept")))),
        // Registers cannot live under objects.
        (id("1:3"), SerializedNode::child(CrdtType::Register, NodeId::root(), "reg", Some(json!(1)))),
        // Parent never stored.
        (id("1:4"), SerializedNode::child(CrdtType::Object, id("9:9"), "orphan", None)),
        // Shadows the static "title" field of the root.
        (id("1:5"), SerializedNode::child(CrdtType::Map, NodeId::root(), "title", None)),
    ]
}

#[test]
fn test_heal_repairs_each_defect_once() {
    let (healed, report) = heal(corrupt_items());
    assert_eq!(report.sibling_collisions, 1);
    assert_eq!(report.illegal_children, 1);
    assert_eq!(report.unreachable, 1);
    assert_eq!(report.static_key_collisions, 1);

    let (again, report) = heal(healed.clone());
    assert!(report.is_clean());
    assert_eq!(again, healed);

    let doc = Document::load(healed);
    assert_eq!(doc.root_json(), json!({"list": ["kept"], "title": {}}));
}

#[test]
fn test_documents_heal_like_drivers() {
    let (doc, doc_report) = Document::load_with_report(corrupt_items());
    let (driver, driver_report) = MemoryDriver::from_items(corrupt_items());
    assert_eq!(doc_report, driver_report);
    assert_eq!(doc.to_items(), driver.iter_nodes());
}

#[tokio::test]
async fn test_room_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rooms").join("board.json");

    let (driver, report) = FileDriver::open(&path).await.unwrap();
    assert!(report.is_clean());
    let mut room = RoomStorage::new(driver);
    let ops = vec![
        Op::create(CrdtType::List, CreateOp::new(id("1:0"), NodeId::root(), "cards"))
            .with_op_id(OpId::new("1:1")),
        Op::create(
            CrdtType::Register,
            CreateOp::new(id("1:2"), id("1:0"), "!").with_data(json!("first")),
        )
        .with_op_id(OpId::new("1:3")),
        Op::UpdateObject {
            op_id: Some(OpId::new("1:4")),
            id: NodeId::root(),
            data: serde_json::Map::from_iter([("name".to_string(), json!("board"))]),
        },
    ];
    let results = room.apply_ops(ops).unwrap();
    assert!(results.iter().all(|result| result.is_accepted()));
    assert!(room.driver().is_dirty());
    room.flush().await.unwrap();
    assert!(!room.driver().is_dirty());
    let before = room.initial_state();
    drop(room);

    let (driver, report) = FileDriver::open(&path).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(driver.iter_nodes(), before);
    assert_eq!(
        Document::load(before).root_json(),
        json!({"name": "board", "cards": ["first"]})
    );
}

#[test]
fn test_invalid_ops_are_ignored_and_acknowledged() {
    let mut room = RoomStorage::new(MemoryDriver::new());
    let under_missing_parent = Op::create(
        CrdtType::Object,
        CreateOp::new(id("2:0"), id("7:7"), "x"),
    )
    .with_op_id(OpId::new("2:1"));
    let delete_root = Op::DeleteCrdt {
        op_id: Some(OpId::new("2:2")),
        id: NodeId::root(),
    };

    for op in [under_missing_parent, delete_root] {
        let result = room.apply_op(op.clone()).unwrap();
        assert!(!result.is_accepted());
        assert_eq!(result.outgoing(&op), vec![Op::ack(op.op_id().cloned().unwrap())]);
    }
    assert_eq!(room.initial_state().len(), 1);
}

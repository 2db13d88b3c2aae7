//! Document-level tests: positions, mutations, loading and diffing.

use serde_json::json;
use trellis::crdt::{
    Document, IdGenerator, LiveValue, Mutation, NodeId, Pos, diff_ops, make_position,
};
use trellis::reconciler::{Provenance, apply_ops};

use crate::helpers::{doc_with_list, mutate_doc, root_child, set_root, text};

#[test]
fn test_positions_stay_ordered_under_repeated_front_inserts() {
    let mut first = make_position(None, None).unwrap();
    let mut all = vec![first.clone()];
    for _ in 0..200 {
        let before = make_position(None, Some(&first)).unwrap();
        assert!(before < first);
        first = before;
        all.push(first.clone());
    }
    for window in all.windows(2) {
        assert!(window[1] < window[0]);
        assert!(Pos::parse(window[1].as_str()).is_ok());
    }
}

#[test]
fn test_positions_between_neighbours() {
    let low = make_position(None, None).unwrap();
    let high = make_position(Some(&low), None).unwrap();
    let mut upper = high.clone();
    for _ in 0..100 {
        let middle = make_position(Some(&low), Some(&upper)).unwrap();
        assert!(low < middle && middle < upper);
        upper = middle;
    }
    assert!(make_position(Some(&high), Some(&low)).is_err());
}

#[test]
fn test_insert_at_front_twice() {
    let mut ids = IdGenerator::new(1);
    let (mut doc, list) = doc_with_list(&mut ids);
    for value in ["A", "B"] {
        mutate_doc(
            &mut doc,
            &mut ids,
            Mutation::ListInsert {
                node: list.clone(),
                index: 0,
                value: text(value),
            },
        );
    }
    assert_eq!(doc.root_json(), json!({"items": ["B", "A"]}));
}

#[test]
fn test_list_move_set_and_delete() {
    let mut ids = IdGenerator::new(1);
    let (mut doc, list) = doc_with_list(&mut ids);
    for value in ["a", "b", "c"] {
        mutate_doc(
            &mut doc,
            &mut ids,
            Mutation::ListPush {
                node: list.clone(),
                value: text(value),
            },
        );
    }
    mutate_doc(
        &mut doc,
        &mut ids,
        Mutation::ListMove {
            node: list.clone(),
            from: 2,
            to: 0,
        },
    );
    assert_eq!(doc.root_json(), json!({"items": ["c", "a", "b"]}));

    mutate_doc(
        &mut doc,
        &mut ids,
        Mutation::ListSet {
            node: list.clone(),
            index: 1,
            value: text("z"),
        },
    );
    mutate_doc(
        &mut doc,
        &mut ids,
        Mutation::ListDelete {
            node: list.clone(),
            index: 0,
        },
    );
    assert_eq!(doc.root_json(), json!({"items": ["z", "b"]}));
}

#[test]
fn test_out_of_range_index_is_usage_error() {
    let mut ids = IdGenerator::new(1);
    let (doc, list) = doc_with_list(&mut ids);
    let err = Mutation::ListDelete {
        node: list,
        index: 3,
    }
    .into_ops(&doc, &mut ids)
    .unwrap_err();
    assert!(err.is_usage_error());
}

#[test]
fn test_nested_values_round_trip_through_items() {
    let mut ids = IdGenerator::new(3);
    let mut doc = Document::new();
    mutate_doc(
        &mut doc,
        &mut ids,
        set_root(
            "board",
            LiveValue::object([
                ("title", text("Sprint")),
                (
                    "columns",
                    LiveValue::list([
                        LiveValue::map([("name", text("todo"))]),
                        LiveValue::map([("name", text("done"))]),
                    ]),
                ),
            ]),
        ),
    );
    let expected = json!({
        "board": {
            "title": "Sprint",
            "columns": [{"name": "todo"}, {"name": "done"}],
        }
    });
    assert_eq!(doc.root_json(), expected);

    let items = doc.to_items();
    assert_eq!(items[0].0, NodeId::root());
    let loaded = Document::load(items.clone());
    assert_eq!(loaded.root_json(), expected);
    assert_eq!(loaded.to_items(), items);
}

#[test]
fn test_diff_turns_one_tree_into_another() {
    let mut ids = IdGenerator::new(1);
    let (mut current, list) = doc_with_list(&mut ids);
    let mut next = Document::load(current.to_items());

    mutate_doc(
        &mut current,
        &mut ids,
        Mutation::ListPush {
            node: list.clone(),
            value: text("stale"),
        },
    );
    mutate_doc(&mut next, &mut ids, set_root("title", json!("fresh")));
    mutate_doc(
        &mut next,
        &mut ids,
        Mutation::ListPush {
            node: list,
            value: LiveValue::object([("done", LiveValue::Json(json!(true)))]),
        },
    );

    let ops = diff_ops(&current.to_items(), &next.to_items());
    apply_ops(&mut current, &ops, |_| Provenance::Remote).unwrap();
    assert_eq!(current.root_json(), next.root_json());
    assert!(diff_ops(&current.to_items(), &next.to_items()).is_empty());
}

#[test]
fn test_map_set_replaces_value() {
    let mut ids = IdGenerator::new(1);
    let mut doc = Document::new();
    mutate_doc(&mut doc, &mut ids, set_root("scores", LiveValue::Map(Default::default())));
    let scores = root_child(&doc, "scores");
    for value in [1, 2] {
        mutate_doc(
            &mut doc,
            &mut ids,
            Mutation::MapSet {
                node: scores.clone(),
                key: "alice".to_string(),
                value: LiveValue::Json(json!(value)),
            },
        );
    }
    assert_eq!(doc.root_json(), json!({"scores": {"alice": 2}}));
    assert_eq!(doc.map(&scores).unwrap().len(), 1);
}

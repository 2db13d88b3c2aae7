//! Operations turning one node list into another.
//!
//! Used when a session reconnects: the local tree is diffed against the fresh
//! authoritative snapshot and the resulting ops are applied like remote ones.

use std::collections::HashMap;

use super::id::NodeId;
use super::op::{CreateOp, CrdtType, Op};
use super::serialized::{NodeItem, SerializedNode};

/// Computes the ops transforming `current` into `next`.
///
/// Vanished nodes are deleted first, then `next` is walked in order, so when
/// `next` lists parents before children (as [`Document::to_items`] does) every
/// creation targets an existing parent. Node ids are never re-parented, so only
/// the key of a surviving node can change.
///
/// [`Document::to_items`]: super::Document::to_items
pub fn diff_ops(current: &[NodeItem], next: &[NodeItem]) -> Vec<Op> {
    let current: HashMap<&NodeId, &SerializedNode> =
        current.iter().map(|(id, node)| (id, node)).collect();
    let next_ids: HashMap<&NodeId, &SerializedNode> =
        next.iter().map(|(id, node)| (id, node)).collect();

    let mut ops: Vec<Op> = Vec::new();
    let mut vanished: Vec<&NodeId> = current
        .keys()
        .filter(|id| !next_ids.contains_key(*id))
        .copied()
        .collect();
    vanished.sort();
    ops.extend(vanished.into_iter().map(|id| Op::DeleteCrdt {
        op_id: None,
        id: id.clone(),
    }));

    for (id, node) in next {
        let Some(existing) = current.get(id) else {
            if let Some((parent, key)) = node.parent() {
                let mut create = CreateOp::new(id.clone(), parent.clone(), key);
                create.data = match node.kind {
                    CrdtType::Object | CrdtType::Register => node.data.clone(),
                    CrdtType::Map | CrdtType::List => None,
                };
                ops.push(Op::create(node.kind, create));
            }
            continue;
        };

        if node.kind == CrdtType::Object {
            let old = existing.object_data();
            let new = node.object_data();
            if old != new {
                let changed: super::op::JsonObject = new
                    .iter()
                    .filter(|(key, value)| old.get(*key) != Some(*value))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                if !changed.is_empty() {
                    ops.push(Op::UpdateObject {
                        op_id: None,
                        id: id.clone(),
                        data: changed,
                    });
                }
                for key in old.keys().filter(|key| !new.contains_key(*key)) {
                    ops.push(Op::DeleteObjectKey {
                        op_id: None,
                        id: id.clone(),
                        key: key.clone(),
                    });
                }
            }
        }

        if let (Some((_, old_key)), Some((_, new_key))) = (existing.parent(), node.parent())
            && old_key != new_key
        {
            ops.push(Op::SetParentKey {
                op_id: None,
                id: id.clone(),
                parent_key: new_key.to_string(),
            });
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn root(data: serde_json::Value) -> NodeItem {
        (
            NodeId::root(),
            SerializedNode {
                data: Some(data),
                ..SerializedNode::root()
            },
        )
    }

    #[test]
    fn test_identical_trees_have_no_diff() {
        let items = vec![root(json!({"a": 1}))];
        assert!(diff_ops(&items, &items).is_empty());
    }

    #[test]
    fn test_changed_and_removed_static_keys() {
        let current = vec![root(json!({"a": 1, "b": 2}))];
        let next = vec![root(json!({"a": 3}))];
        let ops = diff_ops(&current, &next);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], Op::UpdateObject { data, .. } if data["a"] == 3));
        assert!(matches!(&ops[1], Op::DeleteObjectKey { key, .. } if key == "b"));
    }

    #[test]
    fn test_created_deleted_and_moved_nodes() {
        let list = (
            NodeId::from("1:0"),
            SerializedNode::child(CrdtType::List, NodeId::root(), "items", None),
        );
        let item = |id: &str, key: &str| {
            (
                NodeId::from(id),
                SerializedNode::child(CrdtType::Register, NodeId::from("1:0"), key, Some(json!(id))),
            )
        };
        let current = vec![root(json!({})), list.clone(), item("1:1", "!"), item("1:2", "\"")];
        let next = vec![root(json!({})), list, item("1:1", "#"), item("2:0", "!")];

        let ops = diff_ops(&current, &next);
        let kinds: Vec<(&str, &str)> = ops
            .iter()
            .map(|op| (op.kind_name(), op.node_id().as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("DeleteCrdt", "1:2"),
                ("SetParentKey", "1:1"),
                ("CreateRegister", "2:0"),
            ]
        );
    }
}

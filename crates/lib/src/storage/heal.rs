//! Structural repair of persisted node lists.
//!
//! Persisted trees can be corrupted by crashes between dependent writes or by
//! independent writers. [`heal`] turns any item list into a valid tree,
//! deterministically, in a fixed precedence order:
//!
//! 1. **Sibling collisions**: among children sharing `(parentId, parentKey)`
//!    the highest node id wins; the others are dropped.
//! 2. **Illegal parent/child combinations**: registers under objects, anything
//!    under a register, and list children with an invalid position are dropped.
//! 3. **Unreachable nodes**: anything whose parent chain does not end at the
//!    root (orphans, cycles) is dropped.
//! 4. **Static key collisions**: object static fields shadowed by a child
//!    node with the same key are removed; the child wins.
//!
//! Every drop cascades to the whole subtree. Running [`heal`] on its own output
//! changes nothing.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::warn;

use crate::crdt::{CrdtType, Json, JsonObject, NodeId, NodeItem, Pos, SerializedNode};

/// Number of repairs performed per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealReport {
    pub sibling_collisions: usize,
    pub illegal_children: usize,
    pub unreachable: usize,
    pub static_key_collisions: usize,
}

impl HealReport {
    /// Total number of repairs.
    pub fn total(&self) -> usize {
        self.sibling_collisions + self.illegal_children + self.unreachable + self.static_key_collisions
    }

    /// True if the input was already a valid tree.
    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }
}

impl std::fmt::Display for HealReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sibling collisions, {} illegal children, {} unreachable nodes, {} shadowed static keys",
            self.sibling_collisions,
            self.illegal_children,
            self.unreachable,
            self.static_key_collisions
        )
    }
}

/// Repairs a node list into a valid tree.
///
/// The result always contains the root (an empty object if none was stored)
/// and lists nodes parent-first, siblings ordered by key.
pub fn heal(items: impl IntoIterator<Item = NodeItem>) -> (Vec<NodeItem>, HealReport) {
    let mut report = HealReport::default();
    let mut nodes: BTreeMap<NodeId, SerializedNode> = items.into_iter().collect();

    let root = match nodes.remove(&NodeId::root()) {
        Some(node) if node.kind == CrdtType::Object => SerializedNode {
            parent_id: None,
            parent_key: None,
            ..node
        },
        Some(node) => {
            warn!(kind = %node.kind, "Replacing root of wrong kind with an empty object");
            report.illegal_children += 1;
            SerializedNode::root()
        }
        None => SerializedNode::root(),
    };
    nodes.insert(NodeId::root(), root);

    normalise_data(&mut nodes);
    resolve_sibling_collisions(&mut nodes, &mut report);
    drop_illegal_children(&mut nodes, &mut report);
    let ordered = collect_reachable(&mut nodes, &mut report);
    let mut healed: Vec<NodeItem> = ordered
        .into_iter()
        .filter_map(|id| nodes.remove(&id).map(|node| (id, node)))
        .collect();
    remove_shadowed_static_keys(&mut healed, &mut report);

    if !report.is_clean() {
        warn!(%report, "Repaired corrupted storage");
    }
    (healed, report)
}

/// Coerces payloads to the shape their kind requires.
fn normalise_data(nodes: &mut BTreeMap<NodeId, SerializedNode>) {
    for node in nodes.values_mut() {
        match node.kind {
            CrdtType::Object => {
                if !matches!(node.data, Some(Json::Object(_))) {
                    node.data = Some(Json::Object(JsonObject::new()));
                }
            }
            CrdtType::Register => {
                if node.data.is_none() {
                    node.data = Some(Json::Null);
                }
            }
            CrdtType::Map | CrdtType::List => node.data = None,
        }
    }
}

/// Sibling key as compared for collisions; list keys are normalised positions.
fn sibling_key(nodes: &BTreeMap<NodeId, SerializedNode>, parent: &NodeId, key: &str) -> String {
    match nodes.get(parent).map(|p| p.kind) {
        Some(CrdtType::List) => Pos::parse(key)
            .map(String::from)
            .unwrap_or_else(|_| key.to_string()),
        _ => key.to_string(),
    }
}

fn resolve_sibling_collisions(
    nodes: &mut BTreeMap<NodeId, SerializedNode>,
    report: &mut HealReport,
) {
    // Ids iterate in ascending order, so the last claimant of a slot is the winner.
    let mut slots: BTreeMap<(NodeId, String), NodeId> = BTreeMap::new();
    let mut losers = Vec::new();
    for (id, node) in nodes.iter() {
        let Some((parent, key)) = node.parent() else {
            continue;
        };
        let slot = (parent.clone(), sibling_key(nodes, parent, key));
        if let Some(previous) = slots.insert(slot, id.clone()) {
            losers.push(previous);
        }
    }
    for id in losers {
        warn!(%id, "Dropping node colliding with a sibling");
        nodes.remove(&id);
        report.sibling_collisions += 1;
    }
}

fn drop_illegal_children(nodes: &mut BTreeMap<NodeId, SerializedNode>, report: &mut HealReport) {
    let mut illegal = Vec::new();
    let mut repositioned = Vec::new();
    for (id, node) in nodes.iter() {
        let Some((parent_id, key)) = node.parent() else {
            continue;
        };
        let Some(parent) = nodes.get(parent_id) else {
            continue;
        };
        match (parent.kind, node.kind) {
            (CrdtType::Register, _) => illegal.push(id.clone()),
            (CrdtType::Object, CrdtType::Register) => illegal.push(id.clone()),
            (CrdtType::List, _) => match Pos::parse(key) {
                Ok(pos) if pos.as_str() != key => repositioned.push((id.clone(), pos)),
                Ok(_) => {}
                Err(_) => illegal.push(id.clone()),
            },
            _ => {}
        }
    }
    for id in illegal {
        warn!(%id, "Dropping node under an incompatible parent");
        nodes.remove(&id);
        report.illegal_children += 1;
    }
    for (id, pos) in repositioned {
        if let Some(node) = nodes.get_mut(&id) {
            node.parent_key = Some(pos.into());
        }
    }
}

/// Walks the tree from the root and drops everything not reached.
///
/// Returns reachable ids parent-first, siblings ordered by key.
fn collect_reachable(
    nodes: &mut BTreeMap<NodeId, SerializedNode>,
    report: &mut HealReport,
) -> Vec<NodeId> {
    let mut children: BTreeMap<&NodeId, BTreeMap<&str, &NodeId>> = BTreeMap::new();
    for (id, node) in nodes.iter() {
        if let Some((parent, key)) = node.parent() {
            children.entry(parent).or_default().insert(key, id);
        }
    }

    let root = NodeId::root();
    let mut ordered = Vec::with_capacity(nodes.len());
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([&root]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        ordered.push(id.clone());
        if let Some(kids) = children.get(id) {
            queue.extend(kids.values().copied());
        }
    }

    let unreachable: Vec<NodeId> = nodes
        .keys()
        .filter(|id| !seen.contains(*id))
        .cloned()
        .collect();
    for id in unreachable {
        warn!(%id, "Dropping node unreachable from the root");
        nodes.remove(&id);
        report.unreachable += 1;
    }
    ordered
}

fn remove_shadowed_static_keys(items: &mut [NodeItem], report: &mut HealReport) {
    let mut child_keys: BTreeMap<NodeId, HashSet<String>> = BTreeMap::new();
    for (_, node) in items.iter() {
        if let Some((parent, key)) = node.parent() {
            child_keys
                .entry(parent.clone())
                .or_default()
                .insert(key.to_string());
        }
    }
    for (id, node) in items.iter_mut() {
        let (CrdtType::Object, Some(Json::Object(data)), Some(keys)) =
            (node.kind, node.data.as_mut(), child_keys.get(&*id))
        else {
            continue;
        };
        for key in keys {
            if data.remove(key).is_some() {
                warn!(%id, key = %key, "Removing static field shadowed by a child node");
                report.static_key_collisions += 1;
            }
        }
    }
}

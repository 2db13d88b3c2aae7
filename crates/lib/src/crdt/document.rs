//! The client-side document tree.
//!
//! A [`Document`] is an arena of [`Node`]s indexed by [`NodeId`]. Parent and
//! child links are ids, so detaching a subtree is a matter of removing its ids
//! from the index; a dangling id is simply a lookup miss.
//!
//! Only the reconciler mutates a document. Everything here is either a read
//! accessor or a low-level arena primitive (`attach`, `detach`) that the
//! reconciler composes into full operation semantics.

use std::collections::{HashMap, VecDeque};

use super::errors::CRDTError;
use super::id::NodeId;
use super::node::{ListItem, ListNode, MapNode, Node, NodeKind, ObjectNode, ParentLink};
use super::op::{CreateOp, CrdtType, Json, JsonObject, Op};
use super::position::Pos;
use super::serialized::{NodeItem, SerializedNode};
use crate::storage::heal::{HealReport, heal};

/// A tree of CRDT nodes rooted at [`NodeId::root`].
#[derive(Debug, Clone)]
pub struct Document {
    nodes: HashMap<NodeId, Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document holding only the root object.
    pub fn new() -> Self {
        let root = Node::new(
            NodeId::root(),
            ParentLink::Root,
            NodeKind::Object(ObjectNode::default()),
        );
        Self {
            nodes: HashMap::from([(NodeId::root(), root)]),
        }
    }

    /// Builds a document from a flat item list, repairing it first.
    pub fn load(items: impl IntoIterator<Item = NodeItem>) -> Self {
        Self::load_with_report(items).0
    }

    /// Like [`Document::load`], also returning what had to be repaired.
    pub fn load_with_report(items: impl IntoIterator<Item = NodeItem>) -> (Self, HealReport) {
        let (items, report) = heal(items);
        let mut nodes: HashMap<NodeId, Node> = items
            .iter()
            .map(|(id, item)| (id.clone(), Node::from_serialized(id.clone(), item)))
            .collect();

        // Healed items are parent-first with valid positions, so linking cannot fail.
        for (id, item) in &items {
            let Some((parent_id, key)) = item.parent() else {
                continue;
            };
            let Some(parent) = nodes.get_mut(parent_id) else {
                continue;
            };
            match &mut parent.kind {
                NodeKind::Object(object) => {
                    object.children.insert(key.to_string(), id.clone());
                }
                NodeKind::Map(map) => {
                    map.children.insert(key.to_string(), id.clone());
                }
                NodeKind::List(list) => {
                    if let Ok(pos) = Pos::parse(key) {
                        list.insert_sorted(ListItem {
                            pos,
                            id: id.clone(),
                        });
                    }
                }
                NodeKind::Register(_) => {}
            }
        }
        (Self { nodes }, report)
    }

    pub fn root_id(&self) -> NodeId {
        NodeId::root()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of attached nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root is always present.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of all attached nodes, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// The node with the given id, failing if it is not attached.
    pub fn node(&self, id: &NodeId) -> Result<&Node, CRDTError> {
        self.nodes
            .get(id)
            .ok_or_else(|| CRDTError::NotAttached { id: id.clone() })
    }

    pub fn object(&self, id: &NodeId) -> Result<&ObjectNode, CRDTError> {
        let node = self.node(id)?;
        node.as_object()
            .ok_or_else(|| type_mismatch(node, CrdtType::Object))
    }

    pub fn map(&self, id: &NodeId) -> Result<&MapNode, CRDTError> {
        let node = self.node(id)?;
        node.as_map().ok_or_else(|| type_mismatch(node, CrdtType::Map))
    }

    pub fn list(&self, id: &NodeId) -> Result<&ListNode, CRDTError> {
        let node = self.node(id)?;
        node.as_list().ok_or_else(|| type_mismatch(node, CrdtType::List))
    }

    pub(crate) fn object_mut(&mut self, id: &NodeId) -> Option<&mut ObjectNode> {
        match self.nodes.get_mut(id).map(|node| &mut node.kind) {
            Some(NodeKind::Object(object)) => Some(object),
            _ => None,
        }
    }

    pub(crate) fn map_mut(&mut self, id: &NodeId) -> Option<&mut MapNode> {
        match self.nodes.get_mut(id).map(|node| &mut node.kind) {
            Some(NodeKind::Map(map)) => Some(map),
            _ => None,
        }
    }

    pub(crate) fn list_mut(&mut self, id: &NodeId) -> Option<&mut ListNode> {
        match self.nodes.get_mut(id).map(|node| &mut node.kind) {
            Some(NodeKind::List(list)) => Some(list),
            _ => None,
        }
    }

    /// Registers a node in the index. The caller links it into its parent.
    pub(crate) fn attach(&mut self, node: Node) -> Result<(), CRDTError> {
        if self.nodes.contains_key(&node.id) {
            return Err(CRDTError::AlreadyAttached { id: node.id });
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Removes a node and its whole subtree from the index.
    ///
    /// The caller is responsible for unlinking `id` from its parent. Returns
    /// the removed ids, `id` first.
    pub(crate) fn detach(&mut self, id: &NodeId) -> Vec<NodeId> {
        let mut removed = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.owned_child_ids());
                removed.push(current);
            }
        }
        removed
    }

    /// Forgets every pending local write and drops implicitly deleted items.
    ///
    /// Used before resynchronising with a fresh authoritative snapshot: the
    /// snapshot decides, and unacknowledged ops are replayed afterwards.
    pub(crate) fn clear_pending(&mut self) {
        let mut hidden = Vec::new();
        for node in self.nodes.values_mut() {
            match &mut node.kind {
                NodeKind::Object(object) => object.prop_to_last_update.clear(),
                NodeKind::Map(map) => map.unacknowledged_sets.clear(),
                NodeKind::List(list) => {
                    list.unacknowledged_sets.clear();
                    hidden.extend(list.implicitly_deleted.drain());
                }
                NodeKind::Register(_) => {}
            }
        }
        for id in hidden {
            self.detach(&id);
        }
    }

    /// Updates the key a node is stored under in its parent link.
    pub(crate) fn set_parent_key(&mut self, id: &NodeId, key: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(id)
            && let ParentLink::Child { key: current, .. } = &mut node.parent
        {
            *current = key.into();
        }
    }

    /// Creation ops rebuilding the subtree at `id` under `(parent_id, parent_key)`.
    ///
    /// Parents come before their children. The ops carry no op id; callers
    /// assign one when the ops are sent.
    pub fn serialize_to_ops(
        &self,
        id: &NodeId,
        parent_id: &NodeId,
        parent_key: &str,
    ) -> Result<Vec<Op>, CRDTError> {
        if id.is_root() {
            return Err(CRDTError::RootImmutable);
        }
        let mut ops = Vec::new();
        let mut queue = VecDeque::from([(id.clone(), parent_id.clone(), parent_key.to_string())]);
        while let Some((current, parent, key)) = queue.pop_front() {
            let node = self.node(&current)?;
            let mut create = CreateOp::new(current.clone(), parent, key);
            match &node.kind {
                NodeKind::Object(object) => {
                    create.data = Some(Json::Object(object.data.clone()));
                    for (child_key, child) in &object.children {
                        queue.push_back((child.clone(), current.clone(), child_key.clone()));
                    }
                }
                NodeKind::Map(map) => {
                    for (child_key, child) in &map.children {
                        queue.push_back((child.clone(), current.clone(), child_key.clone()));
                    }
                }
                NodeKind::List(list) => {
                    for item in &list.items {
                        queue.push_back((item.id.clone(), current.clone(), item.pos.to_string()));
                    }
                }
                NodeKind::Register(register) => {
                    create.data = Some(register.data.clone());
                }
            }
            ops.push(Op::create(node.crdt_type(), create));
        }
        Ok(ops)
    }

    /// Creation ops rebuilding the subtree at `id` where it currently hangs.
    pub fn serialize_subtree(&self, id: &NodeId) -> Result<Vec<Op>, CRDTError> {
        let node = self.node(id)?;
        match &node.parent {
            ParentLink::Root => Err(CRDTError::RootImmutable),
            ParentLink::Child { parent, key } => self.serialize_to_ops(id, parent, key),
        }
    }

    /// The flat representation of one node.
    pub fn serialize(&self, id: &NodeId) -> Result<SerializedNode, CRDTError> {
        let node = self.node(id)?;
        let data = match &node.kind {
            NodeKind::Object(object) => Some(Json::Object(object.data.clone())),
            NodeKind::Register(register) => Some(register.data.clone()),
            NodeKind::Map(_) | NodeKind::List(_) => None,
        };
        Ok(match &node.parent {
            ParentLink::Root => SerializedNode {
                data,
                ..SerializedNode::root()
            },
            ParentLink::Child { parent, key } => {
                SerializedNode::child(node.crdt_type(), parent.clone(), key.clone(), data)
            }
        })
    }

    /// All visible nodes as `(id, node)` items, parent-first with siblings in
    /// order. Two documents with the same content produce the same list.
    pub fn to_items(&self) -> Vec<NodeItem> {
        let mut items = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([NodeId::root()]);
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            queue.extend(node.child_ids());
            if let Ok(item) = self.serialize(&id) {
                items.push((id, item));
            }
        }
        items
    }

    /// Immutable JSON view of the subtree at `id`.
    pub fn to_json(&self, id: &NodeId) -> Option<Json> {
        let node = self.nodes.get(id)?;
        Some(match &node.kind {
            NodeKind::Object(object) => {
                let mut map = object.data.clone();
                for (key, child) in &object.children {
                    if let Some(value) = self.to_json(child) {
                        map.insert(key.clone(), value);
                    }
                }
                Json::Object(map)
            }
            NodeKind::Map(map) => Json::Object(
                map.children
                    .iter()
                    .filter_map(|(key, child)| Some((key.clone(), self.to_json(child)?)))
                    .collect::<JsonObject>(),
            ),
            NodeKind::List(list) => Json::Array(
                list.items
                    .iter()
                    .filter_map(|item| self.to_json(&item.id))
                    .collect(),
            ),
            NodeKind::Register(register) => register.data.clone(),
        })
    }

    /// JSON view of the whole document.
    pub fn root_json(&self) -> Json {
        self.to_json(&NodeId::root())
            .unwrap_or_else(|| Json::Object(JsonObject::new()))
    }
}

fn type_mismatch(node: &Node, expected: CrdtType) -> CRDTError {
    CRDTError::TypeMismatch {
        id: node.id.clone(),
        expected: expected.to_string(),
        actual: node.crdt_type().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item(id: &str, kind: CrdtType, parent: &str, key: &str, data: Option<Json>) -> NodeItem {
        (
            NodeId::from(id),
            SerializedNode::child(kind, NodeId::from(parent), key, data),
        )
    }

    fn sample() -> Document {
        Document::load(vec![
            (NodeId::root(), SerializedNode {
                data: Some(json!({"title": "todo"})),
                ..SerializedNode::root()
            }),
            item("1:0", CrdtType::List, "root", "items", None),
            item("1:1", CrdtType::Register, "1:0", "#", Some(json!("b"))),
            item("1:2", CrdtType::Register, "1:0", "!", Some(json!("a"))),
            item("1:3", CrdtType::Map, "root", "meta", None),
            item("1:4", CrdtType::Object, "1:3", "owner", Some(json!({"name": "ana"}))),
        ])
    }

    #[test]
    fn test_load_and_to_json() {
        let doc = sample();
        assert_eq!(doc.len(), 6);
        assert_eq!(
            doc.root_json(),
            json!({
                "title": "todo",
                "items": ["a", "b"],
                "meta": {"owner": {"name": "ana"}},
            })
        );
    }

    #[test]
    fn test_to_items_round_trip() {
        let doc = sample();
        let items = doc.to_items();
        assert_eq!(items[0].0, NodeId::root());
        let reloaded = Document::load(items.clone());
        assert_eq!(reloaded.to_items(), items);
    }

    #[test]
    fn test_serialize_to_ops_parent_first() {
        let doc = sample();
        let ops = doc.serialize_subtree(&NodeId::from("1:0")).unwrap();
        let ids: Vec<&str> = ops.iter().map(|op| op.node_id().as_str()).collect();
        assert_eq!(ids, vec!["1:0", "1:2", "1:1"]);
        assert!(matches!(ops[0], Op::CreateList(_)));
    }

    #[test]
    fn test_serialize_root_is_rejected() {
        let doc = sample();
        assert!(matches!(
            doc.serialize_subtree(&NodeId::root()),
            Err(CRDTError::RootImmutable)
        ));
    }

    #[test]
    fn test_detach_removes_subtree() {
        let mut doc = sample();
        let removed = doc.detach(&NodeId::from("1:3"));
        assert_eq!(removed.len(), 2);
        assert!(!doc.contains(&NodeId::from("1:4")));
    }

    #[test]
    fn test_attach_twice_fails() {
        let mut doc = Document::new();
        let node = Node::new(
            NodeId::from("1:0"),
            ParentLink::Child {
                parent: NodeId::root(),
                key: "a".to_string(),
            },
            NodeKind::Map(MapNode::default()),
        );
        doc.attach(node.clone()).unwrap();
        let err = doc.attach(node).unwrap_err();
        assert!(err.is_lifecycle_error());
    }
}

//! Node kinds of the document tree.
//!
//! The tree is a closed sum type: every [`Node`] is an object, a map, a list or
//! a register. Nodes never hold references to each other; parent and child
//! links are stored as [`NodeId`]s and resolved through the owning
//! [`Document`](super::Document) arena.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::id::{NodeId, OpId};
use super::op::{CreateOp, CrdtType, Json, JsonObject};
use super::position::Pos;
use super::serialized::SerializedNode;

/// Where a node hangs in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentLink {
    /// The tree root, which has no parent.
    Root,
    /// A child stored under `key` of `parent`. For list parents the key is the
    /// string form of the child's [`Pos`].
    Child { parent: NodeId, key: String },
}

impl ParentLink {
    pub fn parent_id(&self) -> Option<&NodeId> {
        match self {
            ParentLink::Root => None,
            ParentLink::Child { parent, .. } => Some(parent),
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            ParentLink::Root => None,
            ParentLink::Child { key, .. } => Some(key),
        }
    }
}

/// A node of the document tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) parent: ParentLink,
    pub(crate) kind: NodeKind,
}

/// Per-kind state of a node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Object(ObjectNode),
    Map(MapNode),
    List(ListNode),
    Register(RegisterNode),
}

/// An object: static JSON fields plus child nodes, never both under one key.
#[derive(Debug, Clone, Default)]
pub struct ObjectNode {
    pub(crate) data: JsonObject,
    pub(crate) children: BTreeMap<String, NodeId>,
    /// Last locally issued op id per key, until the server echoes it back.
    pub(crate) prop_to_last_update: HashMap<String, OpId>,
}

/// A map: every value is a child node.
#[derive(Debug, Clone, Default)]
pub struct MapNode {
    pub(crate) children: BTreeMap<String, NodeId>,
    /// Last locally issued creation per key, until the server echoes it back.
    pub(crate) unacknowledged_sets: HashMap<String, OpId>,
}

/// One child of a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub pos: Pos,
    pub id: NodeId,
}

/// A list: children ordered by position.
#[derive(Debug, Clone, Default)]
pub struct ListNode {
    /// Sorted by `pos`, positions unique.
    pub(crate) items: Vec<ListItem>,
    /// Children displaced by a remote `set` that the server may still place
    /// back; they stay in the arena but are not visible.
    pub(crate) implicitly_deleted: HashSet<NodeId>,
    pub(crate) unacknowledged_sets: HashMap<Pos, OpId>,
}

/// A leaf wrapping a JSON value.
#[derive(Debug, Clone)]
pub struct RegisterNode {
    pub(crate) data: Json,
}

impl Node {
    /// A fresh node of the given kind hanging at `parent`.
    pub(crate) fn new(id: NodeId, parent: ParentLink, kind: NodeKind) -> Self {
        Self { id, parent, kind }
    }

    /// The node described by a creation op, linked under the op's parent.
    pub(crate) fn from_create(kind: CrdtType, op: &CreateOp, key: impl Into<String>) -> Self {
        let parent = ParentLink::Child {
            parent: op.parent_id.clone(),
            key: key.into(),
        };
        let kind = match kind {
            CrdtType::Object => NodeKind::Object(ObjectNode {
                data: op.object_data(),
                ..Default::default()
            }),
            CrdtType::Map => NodeKind::Map(MapNode::default()),
            CrdtType::List => NodeKind::List(ListNode::default()),
            CrdtType::Register => NodeKind::Register(RegisterNode {
                data: op.data.clone().unwrap_or(Json::Null),
            }),
        };
        Self::new(op.id.clone(), parent, kind)
    }

    /// The node described by a persisted item, before its children are linked.
    pub(crate) fn from_serialized(id: NodeId, item: &SerializedNode) -> Self {
        let parent = match item.parent() {
            Some((parent, key)) => ParentLink::Child {
                parent: parent.clone(),
                key: key.to_string(),
            },
            None => ParentLink::Root,
        };
        let kind = match item.kind {
            CrdtType::Object => NodeKind::Object(ObjectNode {
                data: item.object_data(),
                ..Default::default()
            }),
            CrdtType::Map => NodeKind::Map(MapNode::default()),
            CrdtType::List => NodeKind::List(ListNode::default()),
            CrdtType::Register => NodeKind::Register(RegisterNode {
                data: item.data.clone().unwrap_or(Json::Null),
            }),
        };
        Self::new(id, parent, kind)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn parent(&self) -> &ParentLink {
        &self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn crdt_type(&self) -> CrdtType {
        self.kind.crdt_type()
    }

    pub fn as_object(&self) -> Option<&ObjectNode> {
        match &self.kind {
            NodeKind::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapNode> {
        match &self.kind {
            NodeKind::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListNode> {
        match &self.kind {
            NodeKind::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_register(&self) -> Option<&RegisterNode> {
        match &self.kind {
            NodeKind::Register(register) => Some(register),
            _ => None,
        }
    }

    /// Ids of the visible children, in serialisation order.
    pub fn child_ids(&self) -> Vec<NodeId> {
        match &self.kind {
            NodeKind::Object(object) => object.children.values().cloned().collect(),
            NodeKind::Map(map) => map.children.values().cloned().collect(),
            NodeKind::List(list) => list.items.iter().map(|item| item.id.clone()).collect(),
            NodeKind::Register(_) => Vec::new(),
        }
    }

    /// Ids of every child still owned by this node, including hidden ones.
    pub(crate) fn owned_child_ids(&self) -> Vec<NodeId> {
        let mut ids = self.child_ids();
        if let NodeKind::List(list) = &self.kind {
            let mut hidden: Vec<NodeId> = list.implicitly_deleted.iter().cloned().collect();
            hidden.sort();
            ids.extend(hidden);
        }
        ids
    }
}

impl NodeKind {
    pub fn crdt_type(&self) -> CrdtType {
        match self {
            NodeKind::Object(_) => CrdtType::Object,
            NodeKind::Map(_) => CrdtType::Map,
            NodeKind::List(_) => CrdtType::List,
            NodeKind::Register(_) => CrdtType::Register,
        }
    }
}

impl ObjectNode {
    /// Static fields.
    pub fn data(&self) -> &JsonObject {
        &self.data
    }

    /// Child nodes by key.
    pub fn children(&self) -> &BTreeMap<String, NodeId> {
        &self.children
    }

    /// True if `key` holds either a static value or a child.
    pub fn has_key(&self, key: &str) -> bool {
        self.data.contains_key(key) || self.children.contains_key(key)
    }

    /// The op id of a pending local write on `key`, if any.
    pub fn pending_update(&self, key: &str) -> Option<&OpId> {
        self.prop_to_last_update.get(key)
    }
}

impl MapNode {
    pub fn children(&self) -> &BTreeMap<String, NodeId> {
        &self.children
    }

    pub fn get(&self, key: &str) -> Option<&NodeId> {
        self.children.get(key)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl ListNode {
    pub fn items(&self) -> &[ListItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ListItem> {
        self.items.get(index)
    }

    pub fn index_of_pos(&self, pos: &Pos) -> Option<usize> {
        self.items.binary_search_by(|item| item.pos.cmp(pos)).ok()
    }

    pub fn index_of_id(&self, id: &NodeId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }

    /// True if the child was displaced by a remote `set` and is currently hidden.
    pub fn is_implicitly_deleted(&self, id: &NodeId) -> bool {
        self.implicitly_deleted.contains(id)
    }

    /// Inserts keeping the items sorted; returns the index of the new item.
    pub(crate) fn insert_sorted(&mut self, item: ListItem) -> usize {
        let index = self.items.partition_point(|existing| existing.pos < item.pos);
        self.items.insert(index, item);
        index
    }

    pub(crate) fn sort(&mut self) {
        self.items.sort_by(|a, b| a.pos.cmp(&b.pos));
    }
}

impl RegisterNode {
    pub fn data(&self) -> &Json {
        &self.data
    }
}

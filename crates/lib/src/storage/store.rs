//! In-memory node index shared by all storage drivers.
//!
//! [`NodeStore`] keeps every node by id plus a per-parent index of children by
//! key. Both maps live behind `Arc`s and are cloned on write, so taking a
//! [`Snapshot`] is cheap and the snapshot never observes later writes.
//!
//! Children of lists are indexed by their normalised position string, whose
//! byte order is the position order; sibling lookups are range queries.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

use tracing::debug;

use super::errors::StorageError;
use super::heal::{HealReport, heal};
use crate::crdt::{CrdtType, Json, JsonObject, NodeId, NodeItem, Pos, SerializedNode};

type Children = BTreeMap<String, NodeId>;

/// Nodes of one document tree.
#[derive(Debug, Clone)]
pub struct NodeStore {
    nodes: Arc<HashMap<NodeId, SerializedNode>>,
    children: Arc<HashMap<NodeId, Children>>,
    revision: u64,
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore {
    /// A store holding only an empty root.
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(HashMap::from([(NodeId::root(), SerializedNode::root())])),
            children: Arc::new(HashMap::new()),
            revision: 0,
        }
    }

    /// Builds a store from persisted items, repairing them first.
    pub fn from_items(items: impl IntoIterator<Item = NodeItem>) -> (Self, HealReport) {
        let (items, report) = heal(items);
        let mut children: HashMap<NodeId, Children> = HashMap::new();
        for (id, node) in &items {
            if let Some((parent, key)) = node.parent() {
                children
                    .entry(parent.clone())
                    .or_default()
                    .insert(key.to_string(), id.clone());
            }
        }
        let store = Self {
            nodes: Arc::new(items.into_iter().collect()),
            children: Arc::new(children),
            revision: 0,
        };
        (store, report)
    }

    /// Incremented by every successful write.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root is always stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&SerializedNode> {
        self.nodes.get(id)
    }

    pub fn has_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes, parents first, siblings in key order.
    pub fn iter_nodes(&self) -> Vec<NodeItem> {
        let mut items = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([NodeId::root()]);
        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if let Some(kids) = self.children.get(&id) {
                queue.extend(kids.values().cloned());
            }
            items.push((id, node.clone()));
        }
        items
    }

    /// Children of `parent` by key.
    pub fn children_of(&self, parent: &NodeId) -> impl Iterator<Item = (&str, &NodeId)> {
        self.children
            .get(parent)
            .into_iter()
            .flat_map(|kids| kids.iter().map(|(key, id)| (key.as_str(), id)))
    }

    /// The child stored under `key` of `parent`.
    pub fn get_child_at(&self, parent: &NodeId, key: &str) -> Option<&NodeId> {
        let key = self.child_key(parent, key).ok()?;
        self.children.get(parent)?.get(&key)
    }

    /// The first sibling after `key` under `parent`, with its key.
    pub fn get_next_sibling(&self, parent: &NodeId, key: &str) -> Option<(&str, &NodeId)> {
        let key = self.child_key(parent, key).ok()?;
        self.children
            .get(parent)?
            .range::<String, _>((Bound::Excluded(&key), Bound::Unbounded))
            .next()
            .map(|(key, id)| (key.as_str(), id))
    }

    /// Key under which a child of `parent` is indexed.
    fn child_key(&self, parent: &NodeId, key: &str) -> Result<String, StorageError> {
        match self.nodes.get(parent).map(|node| node.kind) {
            Some(CrdtType::List) => Pos::parse(key)
                .map(String::from)
                .map_err(|_| StorageError::InvalidPosition {
                    key: key.to_string(),
                }),
            _ => Ok(key.to_string()),
        }
    }

    fn kind_of(&self, id: &NodeId) -> Result<CrdtType, StorageError> {
        self.nodes
            .get(id)
            .map(|node| node.kind)
            .ok_or_else(|| StorageError::NodeNotFound { id: id.clone() })
    }

    /// Stores a new child node at its `(parentId, parentKey)`.
    ///
    /// With `allow_overwrite` an existing child at that key is deleted with
    /// its subtree; otherwise the write fails. A static field of an object
    /// parent under the same key is removed.
    pub fn set_child(
        &mut self,
        id: NodeId,
        mut node: SerializedNode,
        allow_overwrite: bool,
    ) -> Result<(), StorageError> {
        if id.is_root() {
            return Err(StorageError::RootImmutable);
        }
        let Some((parent_id, key)) = node.parent() else {
            return Err(StorageError::MissingParent { id });
        };
        let parent_id = parent_id.clone();
        let parent_kind = match self.nodes.get(&parent_id) {
            Some(parent) => parent.kind,
            None => {
                return Err(StorageError::ParentNotFound {
                    id,
                    parent: parent_id,
                });
            }
        };
        if parent_kind == CrdtType::Register
            || (parent_kind == CrdtType::Object && node.kind == CrdtType::Register)
        {
            return Err(StorageError::IllegalChild {
                parent: parent_id,
                parent_kind,
                child: node.kind,
            });
        }
        let key = self.child_key(&parent_id, key)?;
        if self.nodes.contains_key(&id) {
            return Err(StorageError::NodeAlreadyExists { id });
        }
        if let Some(occupant) = self.get_child_at(&parent_id, &key).cloned() {
            if !allow_overwrite {
                return Err(StorageError::KeyOccupied {
                    parent: parent_id,
                    key,
                });
            }
            self.delete_node(&occupant)?;
        }
        if parent_kind == CrdtType::Object {
            self.remove_static_key(&parent_id, &key);
        }

        node.parent_key = Some(key.clone());
        match node.kind {
            CrdtType::Object if !matches!(node.data, Some(Json::Object(_))) => {
                node.data = Some(Json::Object(JsonObject::new()));
            }
            CrdtType::Register if node.data.is_none() => node.data = Some(Json::Null),
            CrdtType::Map | CrdtType::List => node.data = None,
            _ => {}
        }
        Arc::make_mut(&mut self.children)
            .entry(parent_id)
            .or_default()
            .insert(key, id.clone());
        Arc::make_mut(&mut self.nodes).insert(id, node);
        self.revision += 1;
        Ok(())
    }

    /// Writes static fields of an object, merging or replacing.
    ///
    /// A child node under a written key is deleted: the static value wins.
    pub fn set_object_data(
        &mut self,
        id: &NodeId,
        data: JsonObject,
        merge: bool,
    ) -> Result<(), StorageError> {
        let kind = self.kind_of(id)?;
        if kind != CrdtType::Object {
            return Err(StorageError::TypeMismatch {
                id: id.clone(),
                expected: CrdtType::Object,
                actual: kind,
            });
        }
        for key in data.keys() {
            if let Some(child) = self.get_child_at(id, key).cloned() {
                self.delete_node(&child)?;
            }
        }
        if let Some(node) = Arc::make_mut(&mut self.nodes).get_mut(id) {
            match (&mut node.data, merge) {
                (Some(Json::Object(existing)), true) => existing.extend(data),
                (slot, _) => *slot = Some(Json::Object(data)),
            }
        }
        self.revision += 1;
        Ok(())
    }

    /// Deletes a node and its whole subtree. Returns the number of nodes removed.
    pub fn delete_node(&mut self, id: &NodeId) -> Result<usize, StorageError> {
        if id.is_root() {
            return Err(StorageError::RootImmutable);
        }
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| StorageError::NodeNotFound { id: id.clone() })?;
        if let Some((parent, key)) = node.parent() {
            let (parent, key) = (parent.clone(), key.to_string());
            if let Some(siblings) = Arc::make_mut(&mut self.children).get_mut(&parent) {
                siblings.remove(&key);
            }
        }

        let mut removed = 0;
        let mut stack = vec![id.clone()];
        let nodes = Arc::make_mut(&mut self.nodes);
        let children = Arc::make_mut(&mut self.children);
        while let Some(current) = stack.pop() {
            if nodes.remove(&current).is_some() {
                removed += 1;
            }
            if let Some(kids) = children.remove(&current) {
                stack.extend(kids.into_values());
            }
        }
        debug!(%id, removed, "Deleted subtree");
        self.revision += 1;
        Ok(removed)
    }

    /// Clears `key` of `parent`: deletes the child there, or the static field.
    ///
    /// Returns false if nothing was stored under the key.
    pub fn delete_child_key(&mut self, parent: &NodeId, key: &str) -> Result<bool, StorageError> {
        self.kind_of(parent)?;
        if let Some(child) = self.get_child_at(parent, key).cloned() {
            self.delete_node(&child)?;
            return Ok(true);
        }
        let removed = self.remove_static_key(parent, key);
        if removed {
            self.revision += 1;
        }
        Ok(removed)
    }

    fn remove_static_key(&mut self, id: &NodeId, key: &str) -> bool {
        let has_key = matches!(
            self.nodes.get(id).and_then(|node| node.data.as_ref()),
            Some(Json::Object(data)) if data.contains_key(key)
        );
        if !has_key {
            return false;
        }
        if let Some(Json::Object(data)) = Arc::make_mut(&mut self.nodes)
            .get_mut(id)
            .and_then(|node| node.data.as_mut())
        {
            data.remove(key);
        }
        true
    }

    /// Moves a list child to a new position.
    pub fn move_sibling(&mut self, id: &NodeId, new_key: &str) -> Result<(), StorageError> {
        if id.is_root() {
            return Err(StorageError::RootImmutable);
        }
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| StorageError::NodeNotFound { id: id.clone() })?;
        let Some((parent, old_key)) = node.parent() else {
            return Err(StorageError::MissingParent { id: id.clone() });
        };
        let (parent, old_key) = (parent.clone(), old_key.to_string());
        let parent_kind = self.kind_of(&parent)?;
        if parent_kind != CrdtType::List {
            return Err(StorageError::TypeMismatch {
                id: parent,
                expected: CrdtType::List,
                actual: parent_kind,
            });
        }
        let new_key = self.child_key(&parent, new_key)?;
        if new_key == old_key {
            return Ok(());
        }
        if self.get_child_at(&parent, &new_key).is_some() {
            return Err(StorageError::KeyOccupied {
                parent,
                key: new_key,
            });
        }

        let siblings = Arc::make_mut(&mut self.children).entry(parent).or_default();
        siblings.remove(&old_key);
        siblings.insert(new_key.clone(), id.clone());
        if let Some(node) = Arc::make_mut(&mut self.nodes).get_mut(id) {
            node.parent_key = Some(new_key);
        }
        self.revision += 1;
        Ok(())
    }

    /// A read-only view of the current state, unaffected by later writes.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            store: self.clone(),
        }
    }
}

/// A point-in-time, read-only view of a [`NodeStore`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    store: NodeStore,
}

impl std::ops::Deref for Snapshot {
    type Target = NodeStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

//! Deltas describing the externally visible effect of applied operations.

use std::collections::BTreeMap;

use serde::Serialize;

use super::id::NodeId;
use super::op::Json;

/// Change of a single key of an object or map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeyUpdate {
    Update,
    /// The key was removed. For object static fields the old value is kept.
    Delete {
        #[serde(skip_serializing_if = "Option::is_none")]
        deleted: Option<Json>,
    },
}

/// Change of a list, expressed with indexes valid at the time it was applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ListDelta {
    Insert {
        index: usize,
        item: NodeId,
    },
    Delete {
        index: usize,
        deleted: NodeId,
    },
    #[serde(rename_all = "camelCase")]
    Move {
        index: usize,
        previous_index: usize,
        item: NodeId,
    },
    Set {
        index: usize,
        item: NodeId,
    },
}

/// Changes applied to one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StorageUpdate {
    Object {
        node: NodeId,
        updates: BTreeMap<String, KeyUpdate>,
    },
    Map {
        node: NodeId,
        updates: BTreeMap<String, KeyUpdate>,
    },
    List {
        node: NodeId,
        updates: Vec<ListDelta>,
    },
}

impl StorageUpdate {
    /// A single key change on an object.
    pub fn object_key(node: NodeId, key: impl Into<String>, update: KeyUpdate) -> Self {
        StorageUpdate::Object {
            node,
            updates: BTreeMap::from([(key.into(), update)]),
        }
    }

    /// A single key change on a map.
    pub fn map_key(node: NodeId, key: impl Into<String>, update: KeyUpdate) -> Self {
        StorageUpdate::Map {
            node,
            updates: BTreeMap::from([(key.into(), update)]),
        }
    }

    pub fn list(node: NodeId, updates: Vec<ListDelta>) -> Self {
        StorageUpdate::List { node, updates }
    }

    /// The node this update describes.
    pub fn node_id(&self) -> &NodeId {
        match self {
            StorageUpdate::Object { node, .. }
            | StorageUpdate::Map { node, .. }
            | StorageUpdate::List { node, .. } => node,
        }
    }

    /// Folds a later update of the same node into this one.
    ///
    /// Key updates of the later update win; list deltas are appended in order.
    /// If the kinds differ the later update replaces this one.
    pub fn merge(&mut self, later: StorageUpdate) {
        match (self, later) {
            (
                StorageUpdate::Object { updates, .. },
                StorageUpdate::Object {
                    updates: later_updates,
                    ..
                },
            )
            | (
                StorageUpdate::Map { updates, .. },
                StorageUpdate::Map {
                    updates: later_updates,
                    ..
                },
            ) => updates.extend(later_updates),
            (
                StorageUpdate::List { updates, .. },
                StorageUpdate::List {
                    updates: later_updates,
                    ..
                },
            ) => updates.extend(later_updates),
            (this, later) => *this = later,
        }
    }
}

/// Updates of one batch, merged per node and kept in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSet {
    updates: Vec<StorageUpdate>,
}

impl UpdateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, update: StorageUpdate) {
        match self
            .updates
            .iter_mut()
            .find(|existing| existing.node_id() == update.node_id())
        {
            Some(existing) => existing.merge(update),
            None => self.updates.push(update),
        }
    }

    pub fn extend(&mut self, other: UpdateSet) {
        for update in other.updates {
            self.push(update);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn get(&self, node: &NodeId) -> Option<&StorageUpdate> {
        self.updates.iter().find(|update| update.node_id() == node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StorageUpdate> {
        self.updates.iter()
    }

    pub fn into_vec(self) -> Vec<StorageUpdate> {
        self.updates
    }
}

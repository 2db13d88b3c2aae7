//! Authoritative node storage.
//!
//! The server keeps one tree per room behind a [`StorageDriver`]. Drivers own
//! a [`NodeStore`] and decide how (and whether) it is persisted; all tree
//! queries and writes are provided on top of that store, so a driver only
//! implements access to it and [`StorageDriver::flush`].
//!
//! Storage loaded from an untrusted or older source is always passed through
//! [`heal`] first: a store never holds a structurally invalid tree.
//!
//! [`RoomStorage`] sits on top of a driver and applies client operations with
//! the server's sequencing rules.

pub mod errors;
pub mod file;
pub mod heal;
pub mod memory;
pub mod room;
pub mod store;

use async_trait::async_trait;

pub use errors::StorageError;
pub use file::FileDriver;
pub use heal::{HealReport, heal};
pub use memory::MemoryDriver;
pub use room::{OpResult, RoomStorage};
pub use store::{NodeStore, Snapshot};

use crate::Result;
use crate::crdt::{JsonObject, NodeId, NodeItem, SerializedNode};

/// Storage backend for one document tree.
///
/// All implementations must be `Send` and `Sync` so rooms can be served from
/// any runtime thread.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// The node store backing this driver.
    fn store(&self) -> &NodeStore;

    /// Mutable access to the node store.
    fn store_mut(&mut self) -> &mut NodeStore;

    /// Persists every write made since the last flush.
    async fn flush(&mut self) -> Result<()>;

    fn get_node(&self, id: &NodeId) -> Option<&SerializedNode> {
        self.store().get_node(id)
    }

    fn has_node(&self, id: &NodeId) -> bool {
        self.store().has_node(id)
    }

    /// All nodes, parents first.
    fn iter_nodes(&self) -> Vec<NodeItem> {
        self.store().iter_nodes()
    }

    fn get_child_at(&self, parent: &NodeId, key: &str) -> Option<&NodeId> {
        self.store().get_child_at(parent, key)
    }

    fn get_next_sibling(&self, parent: &NodeId, key: &str) -> Option<(&str, &NodeId)> {
        self.store().get_next_sibling(parent, key)
    }

    fn set_child(&mut self, id: NodeId, node: SerializedNode, allow_overwrite: bool) -> Result<()> {
        Ok(self.store_mut().set_child(id, node, allow_overwrite)?)
    }

    fn set_object_data(&mut self, id: &NodeId, data: JsonObject, merge: bool) -> Result<()> {
        Ok(self.store_mut().set_object_data(id, data, merge)?)
    }

    /// Deletes a node and its subtree, returning the number of removed nodes.
    fn delete_node(&mut self, id: &NodeId) -> Result<usize> {
        Ok(self.store_mut().delete_node(id)?)
    }

    fn delete_child_key(&mut self, parent: &NodeId, key: &str) -> Result<bool> {
        Ok(self.store_mut().delete_child_key(parent, key)?)
    }

    fn move_sibling(&mut self, id: &NodeId, new_key: &str) -> Result<()> {
        Ok(self.store_mut().move_sibling(id, new_key)?)
    }

    /// A read-only view unaffected by later writes.
    fn get_snapshot(&self) -> Snapshot {
        self.store().snapshot()
    }
}

//! Volatile storage driver.

use async_trait::async_trait;

use super::heal::HealReport;
use super::store::NodeStore;
use super::StorageDriver;
use crate::Result;
use crate::crdt::NodeItem;

/// Keeps the tree in memory only. Flushing is a no-op.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    store: NodeStore,
}

impl MemoryDriver {
    /// A driver holding an empty root.
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver seeded with `items`, repaired first.
    pub fn from_items(items: impl IntoIterator<Item = NodeItem>) -> (Self, HealReport) {
        let (store, report) = NodeStore::from_items(items);
        (Self { store }, report)
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn store(&self) -> &NodeStore {
        &self.store
    }

    fn store_mut(&mut self) -> &mut NodeStore {
        &mut self.store
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

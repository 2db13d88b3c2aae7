//! JSON file storage driver.
//!
//! The whole tree is kept in memory and written to a single JSON file on
//! flush. Writes go to a temporary sibling file which is then renamed over the
//! target, so a crash mid-write leaves the previous state intact.
//!
//! Loading always heals the stored tree; if anything had to be repaired the
//! repaired tree is written back on the next flush.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::StorageDriver;
use super::errors::StorageError;
use super::heal::HealReport;
use super::store::NodeStore;
use crate::Result;
use crate::crdt::{NodeId, SerializedNode};

/// Layout version written to every room file.
///
/// Files written before the field existed carry no `_v` and are read as this
/// version.
pub const FORMAT_VERSION: u8 = 1;

fn format_version() -> u8 {
    FORMAT_VERSION
}

/// On-disk layout of a stored tree.
#[derive(Serialize, Deserialize)]
struct PersistedTree {
    #[serde(rename = "_v", default = "format_version")]
    version: u8,
    #[serde(default)]
    nodes: BTreeMap<NodeId, SerializedNode>,
}

/// Stores the tree of one room in a JSON file.
#[derive(Debug)]
pub struct FileDriver {
    store: NodeStore,
    path: PathBuf,
    /// Store revision last written to disk; `None` if the file is stale.
    persisted: Option<u64>,
}

impl FileDriver {
    /// Opens the tree stored at `path`, healing it.
    ///
    /// A missing file yields an empty tree; the file is created on first flush.
    pub async fn open(path: impl AsRef<Path>) -> Result<(Self, HealReport)> {
        let path = path.as_ref().to_path_buf();
        let persisted = match tokio::fs::read_to_string(&path).await {
            Ok(json) => serde_json::from_str::<PersistedTree>(&json).map_err(|source| {
                StorageError::DeserializationFailed {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No storage file yet, starting empty");
                PersistedTree {
                    version: FORMAT_VERSION,
                    nodes: BTreeMap::new(),
                }
            }
            Err(source) => return Err(StorageError::FileIo { path, source }.into()),
        };
        if persisted.version != FORMAT_VERSION {
            return Err(StorageError::UnsupportedVersion {
                path,
                found: persisted.version,
                supported: FORMAT_VERSION,
            }
            .into());
        }

        let (store, report) = NodeStore::from_items(persisted.nodes);
        if !report.is_clean() {
            info!(path = %path.display(), %report, "Healed storage file");
        }
        let driver = Self {
            persisted: report.is_clean().then(|| store.revision()),
            store,
            path,
        };
        Ok((driver, report))
    }

    /// The file this driver persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if there are writes not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.persisted != Some(self.store.revision())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StorageDriver for FileDriver {
    fn store(&self) -> &NodeStore {
        &self.store
    }

    fn store_mut(&mut self) -> &mut NodeStore {
        &mut self.store
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let nodes = self
            .store
            .iter_nodes()
            .into_iter()
            .filter(|(id, node)| !(id.is_root() && node.has_empty_data()))
            .collect();
        let tree = PersistedTree {
            version: FORMAT_VERSION,
            nodes,
        };
        let json = serde_json::to_string_pretty(&tree)
            .map_err(|source| StorageError::SerializationFailed { source })?;

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| StorageError::FileIo {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, json)
            .await
            .map_err(|source| StorageError::FileIo {
                path: temp.clone(),
                source,
            })?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|source| StorageError::FileIo {
                path: self.path.clone(),
                source,
            })?;

        self.persisted = Some(self.store.revision());
        debug!(path = %self.path.display(), nodes = self.store.len(), "Flushed storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::crdt::CrdtType;

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, report) = FileDriver::open(dir.path().join("room.json")).await.unwrap();
        assert!(report.is_clean());
        assert!(!driver.is_dirty());
        assert_eq!(driver.iter_nodes().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms").join("room.json");
        let (mut driver, _) = FileDriver::open(&path).await.unwrap();
        driver
            .set_child(
                NodeId::from("1:0"),
                SerializedNode::child(CrdtType::List, NodeId::root(), "items", None),
                false,
            )
            .unwrap();
        driver
            .set_child(
                NodeId::from("1:1"),
                SerializedNode::child(CrdtType::Register, NodeId::from("1:0"), "!", Some(json!("a"))),
                false,
            )
            .unwrap();
        assert!(driver.is_dirty());
        driver.flush().await.unwrap();
        assert!(!driver.is_dirty());

        let (reopened, report) = FileDriver::open(&path).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(reopened.iter_nodes(), driver.iter_nodes());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_healed_and_marked_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.json");
        let contents = json!({
            "nodes": {
                "1:0": {"type": "Register", "parentId": "root", "parentKey": "a", "data": 1},
                "1:1": {"type": "Object", "parentId": "9:9", "parentKey": "b", "data": {}}
            }
        });
        tokio::fs::write(&path, contents.to_string()).await.unwrap();

        let (mut driver, report) = FileDriver::open(&path).await.unwrap();
        assert_eq!(report.illegal_children, 1);
        assert_eq!(report.unreachable, 1);
        assert!(driver.is_dirty());
        driver.flush().await.unwrap();

        let (_, report) = FileDriver::open(&path).await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.json");
        tokio::fs::write(&path, r#"{"_v": 7, "nodes": {}}"#).await.unwrap();
        let err = FileDriver::open(&path).await.unwrap_err();
        assert!(err.is_format_error());
        assert!(!err.is_io_error());
        assert!(matches!(
            err,
            crate::Error::Storage(StorageError::UnsupportedVersion {
                found: 7,
                supported: FORMAT_VERSION,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_version_is_written_and_defaulted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("room.json");
        tokio::fs::write(&path, r#"{"nodes": {}}"#).await.unwrap();
        let (mut driver, _) = FileDriver::open(&path).await.unwrap();
        driver
            .set_child(
                NodeId::from("1:0"),
                SerializedNode::child(CrdtType::Map, NodeId::root(), "m", None),
                false,
            )
            .unwrap();
        driver.flush().await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(written["_v"], json!(FORMAT_VERSION));
    }
}

//! Storage driver error types.
//!
//! Structural corruption found while loading is never an error: it is repaired
//! by [`heal`](super::heal::heal). The variants here cover invalid write
//! requests and persistence failures.

use std::path::PathBuf;

use thiserror::Error;

use crate::crdt::{CrdtType, NodeId};

/// Errors that can occur during storage driver operations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StorageError {
    /// Node not found by id.
    #[error("Node not found: {id}")]
    NodeNotFound {
        /// The id of the node that was not found
        id: NodeId,
    },

    /// The parent named by a new node does not exist.
    #[error("Parent {parent} of node {id} not found")]
    ParentNotFound { id: NodeId, parent: NodeId },

    /// A node with this id is already stored.
    #[error("Node already exists: {id}")]
    NodeAlreadyExists { id: NodeId },

    /// The target key already holds a child and overwriting was not allowed.
    #[error("Key {key:?} of node {parent} is already taken")]
    KeyOccupied { parent: NodeId, key: String },

    /// The parent kind cannot hold a child of this kind.
    #[error("A {child} cannot be a child of a {parent_kind} ({parent})")]
    IllegalChild {
        parent: NodeId,
        parent_kind: CrdtType,
        child: CrdtType,
    },

    /// The node exists but is of a different kind than required.
    #[error("Node {id} type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        id: NodeId,
        expected: CrdtType,
        actual: CrdtType,
    },

    /// A node was given without a parent link.
    #[error("Node {id} has no parent")]
    MissingParent { id: NodeId },

    /// The root cannot be deleted, moved or replaced.
    #[error("Operation not allowed on the root node")]
    RootImmutable,

    /// A list child key is not a valid position.
    #[error("Invalid list position {key:?}")]
    InvalidPosition { key: String },

    /// Reading or writing the persistence file failed.
    #[error("File I/O error on {path}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serializing the stored nodes failed.
    #[error("Serialization failed")]
    SerializationFailed {
        #[source]
        source: serde_json::Error,
    },

    /// The persistence file could not be parsed.
    #[error("Deserialization of {path} failed")]
    DeserializationFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The persistence file was written in a layout this build cannot read.
    #[error("Unsupported file version {found} in {path} (supported: {supported})")]
    UnsupportedVersion {
        path: PathBuf,
        found: u8,
        supported: u8,
    },
}

impl StorageError {
    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NodeNotFound { .. } | StorageError::ParentNotFound { .. }
        )
    }

    /// Check if this error indicates a conflict with existing data.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::NodeAlreadyExists { .. } | StorageError::KeyOccupied { .. }
        )
    }

    /// Check if this error is a usage error (invalid write request).
    pub fn is_usage_error(&self) -> bool {
        !self.is_io_error() && !self.is_format_error()
    }

    /// Check if this error is related to persistence I/O or encoding.
    pub fn is_io_error(&self) -> bool {
        matches!(
            self,
            StorageError::FileIo { .. } | StorageError::SerializationFailed { .. }
        )
    }

    /// Check if a persistence file is unreadable: malformed or of an unknown version.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            StorageError::DeserializationFailed { .. } | StorageError::UnsupportedVersion { .. }
        )
    }

    /// Get the node id if this error is about a specific node.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            StorageError::NodeNotFound { id }
            | StorageError::ParentNotFound { id, .. }
            | StorageError::NodeAlreadyExists { id }
            | StorageError::TypeMismatch { id, .. }
            | StorageError::MissingParent { id } => Some(id),
            StorageError::KeyOccupied { parent, .. } | StorageError::IllegalChild { parent, .. } => {
                Some(parent)
            }
            _ => None,
        }
    }
}

// Conversion from StorageError to the main Error type
impl From<StorageError> for crate::Error {
    fn from(err: StorageError) -> Self {
        crate::Error::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_helpers() {
        let err = StorageError::NodeNotFound {
            id: NodeId::from("1:0"),
        };
        assert!(err.is_not_found());
        assert!(err.is_usage_error());
        assert!(!err.is_io_error());

        let err = StorageError::FileIo {
            path: PathBuf::from("/tmp/x"),
            source: std::io::Error::other("boom"),
        };
        assert!(err.is_io_error());
        assert!(!err.is_usage_error());

        let err = StorageError::UnsupportedVersion {
            path: PathBuf::from("/tmp/x"),
            found: 9,
            supported: 1,
        };
        assert!(err.is_format_error());
        assert!(!err.is_io_error());
        assert!(!err.is_usage_error());

        let err: crate::Error = StorageError::RootImmutable.into();
        assert_eq!(err.module(), "storage");
    }
}

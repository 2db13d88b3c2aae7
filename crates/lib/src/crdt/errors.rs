//! Error types for CRDT tree operations.
//!
//! This module defines structured error types specific to the document tree:
//! position generation, node attach/detach lifecycle, and invalid mutation
//! requests. Conflicts between replicas are never errors; they are resolved by
//! the reconciler and show up as unchanged or rewritten results instead.

use thiserror::Error;

use super::id::NodeId;

/// Structured error types for CRDT tree operations.
///
/// Every variant except [`CRDTError::InvalidPosition`] and
/// [`CRDTError::InvalidValue`] signals a caller bug (a usage error). Those are
/// surfaced immediately and must not be retried.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CRDTError {
    /// Two positions compared equal; siblings must never share a position
    #[error("Impossible to compare similar positions \"{position}\"")]
    PositionsEqual { position: String },

    /// No position exists between the given bounds because they are out of order
    #[error("Impossible to generate a position between \"{before}\" and \"{after}\"")]
    PositionOutOfOrder { before: String, after: String },

    /// A position string contains bytes outside the alphabet or is empty
    #[error("Invalid position \"{position}\": {reason}")]
    InvalidPosition { position: String, reason: String },

    /// The node is already part of the tree
    #[error("Cannot attach node {id}: already attached")]
    AlreadyAttached { id: NodeId },

    /// The node is not part of the tree (detached or never attached)
    #[error("Node {id} is not attached")]
    NotAttached { id: NodeId },

    /// The node exists but has a different kind than the operation requires
    #[error("Node {id} type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        id: NodeId,
        expected: String,
        actual: String,
    },

    /// A list index outside the list bounds
    #[error("Index {index} out of range for list {id} of length {len}")]
    IndexOutOfRange { id: NodeId, index: usize, len: usize },

    /// The root node cannot be deleted, moved or replaced
    #[error("Operation not allowed on the root node")]
    RootImmutable,

    /// A value that cannot be stored where it was placed
    #[error("Invalid CRDT value: {reason}")]
    InvalidValue { reason: String },
}

impl CRDTError {
    /// Check if this error is a usage error (invalid API call by the caller).
    pub fn is_usage_error(&self) -> bool {
        !matches!(
            self,
            CRDTError::InvalidPosition { .. } | CRDTError::InvalidValue { .. }
        )
    }

    /// Check if this error is related to positions
    pub fn is_position_error(&self) -> bool {
        matches!(
            self,
            CRDTError::PositionsEqual { .. }
                | CRDTError::PositionOutOfOrder { .. }
                | CRDTError::InvalidPosition { .. }
        )
    }

    /// Check if this error is related to the attach/detach lifecycle
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            CRDTError::AlreadyAttached { .. } | CRDTError::NotAttached { .. }
        )
    }

    /// Check if this error is related to node lookup
    pub fn is_not_found_error(&self) -> bool {
        matches!(self, CRDTError::NotAttached { .. })
    }

    /// Check if this error is related to type mismatches
    pub fn is_type_error(&self) -> bool {
        matches!(self, CRDTError::TypeMismatch { .. })
    }

    /// Get the node id if this error is about a specific node
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            CRDTError::AlreadyAttached { id }
            | CRDTError::NotAttached { id }
            | CRDTError::TypeMismatch { id, .. }
            | CRDTError::IndexOutOfRange { id, .. } => Some(id),
            _ => None,
        }
    }
}

// Conversion from CRDTError to the main Error type
impl From<CRDTError> for crate::Error {
    fn from(err: CRDTError) -> Self {
        crate::Error::CRDT(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_helpers() {
        let err = CRDTError::AlreadyAttached {
            id: NodeId::from("1:0"),
        };
        assert!(err.is_usage_error());
        assert!(err.is_lifecycle_error());
        assert_eq!(err.node_id(), Some(&NodeId::from("1:0")));

        let err = CRDTError::InvalidPosition {
            position: "\u{7f}".to_string(),
            reason: "out of alphabet".to_string(),
        };
        assert!(!err.is_usage_error());
        assert!(err.is_position_error());
    }

    #[test]
    fn test_error_conversion() {
        let err: crate::Error = CRDTError::RootImmutable.into();
        assert!(err.is_crdt_error());
        assert!(err.is_usage_error());
    }
}

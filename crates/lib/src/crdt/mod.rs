//! The collaborative document tree.
//!
//! A document is a tree of conflict-free replicated nodes. Composite nodes
//! (objects, maps, lists) hold children; registers wrap a single JSON value.
//! Every replica holds its own copy and changes travel as [`Op`]s, which the
//! [`reconciler`](crate::reconciler) applies with deterministic conflict rules
//! so that all replicas converge.
//!
//! # Core Types
//!
//! - [`Document`] - The arena holding every node of one tree
//! - [`Node`] / [`NodeKind`] - A tree node and its per-kind state
//! - [`Op`] - The wire unit of every mutation
//! - [`Pos`] - Fractional-index key ordering list children
//! - [`SerializedNode`] - Flat persisted form of a node
//! - [`Mutation`] / [`LiveValue`] - User intents, resolved into ops
//! - [`StorageUpdate`] - The visible effect of applied ops
//!
//! # Invariants
//!
//! - Exactly one root, with id `"root"`, always an object.
//! - Sibling keys are unique; list children are ordered by unique positions.
//! - A register is never the child of an object, and never has children.

pub mod diff;
pub mod document;
pub mod errors;
pub mod id;
pub mod mutation;
pub mod node;
pub mod op;
pub mod position;
pub mod serialized;
pub mod update;

pub use diff::diff_ops;
pub use document::Document;
pub use errors::CRDTError;
pub use id::{IdGenerator, NodeId, OpId};
pub use mutation::{LiveValue, Mutation};
pub use node::{ListItem, ListNode, MapNode, Node, NodeKind, ObjectNode, ParentLink, RegisterNode};
pub use op::{CreateOp, CrdtType, Intent, Json, JsonObject, Op};
pub use position::{Pos, compare_position, make_position};
pub use serialized::{NodeItem, SerializedNode};
pub use update::{KeyUpdate, ListDelta, StorageUpdate, UpdateSet};

//! Identifier types for tree nodes and operations.
//!
//! Both identifiers have the shape `"<actor>:<counter>"`, where `actor` is the
//! connection id assigned to a session by the server. Node ids and op ids are
//! minted from two independent counters so that the op counter can advance
//! (e.g. when replaying history) without consuming node ids.

use serde::{Deserialize, Serialize};

use crate::constants::ROOT_ID;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string-like input.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_id!(
    /// Globally unique identifier of a node in the document tree.
    ///
    /// The literal `"root"` is reserved for the tree root and is never minted
    /// by an [`IdGenerator`].
    NodeId
);

string_id!(
    /// Identifier of a single operation, used for last-writer-wins tie-breaking
    /// and for recognising the server's echo of a locally issued operation.
    OpId
);

impl NodeId {
    /// The reserved identifier of the tree root.
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    /// Returns true if this is the reserved root identifier.
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }
}

/// Mints node and operation identifiers for one session.
///
/// The two counters are independent and monotonic. They are not reset when the
/// actor changes after a reconnect; ids stay unique because the actor prefix
/// differs.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    actor: u32,
    node_clock: u64,
    op_clock: u64,
}

impl IdGenerator {
    /// Creates a generator for the given actor (connection id).
    pub fn new(actor: u32) -> Self {
        Self {
            actor,
            node_clock: 0,
            op_clock: 0,
        }
    }

    /// The actor this generator mints ids for.
    pub fn actor(&self) -> u32 {
        self.actor
    }

    /// Switches to a new actor, keeping both counters.
    pub fn set_actor(&mut self, actor: u32) {
        self.actor = actor;
    }

    /// Mints a fresh node id.
    pub fn next_node_id(&mut self) -> NodeId {
        let id = NodeId(format!("{}:{}", self.actor, self.node_clock));
        self.node_clock += 1;
        id
    }

    /// Mints a fresh operation id.
    pub fn next_op_id(&mut self) -> OpId {
        let id = OpId(format!("{}:{}", self.actor, self.op_clock));
        self.op_clock += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_independent() {
        let mut ids = IdGenerator::new(7);
        assert_eq!(ids.next_node_id(), "7:0");
        assert_eq!(ids.next_op_id(), "7:0");
        assert_eq!(ids.next_op_id(), "7:1");
        assert_eq!(ids.next_node_id(), "7:1");
    }

    #[test]
    fn test_actor_change_keeps_counters() {
        let mut ids = IdGenerator::new(1);
        ids.next_node_id();
        ids.set_actor(2);
        assert_eq!(ids.next_node_id(), "2:1");
    }

    #[test]
    fn test_root_id() {
        assert!(NodeId::root().is_root());
        assert!(!NodeId::from("1:0").is_root());
    }
}

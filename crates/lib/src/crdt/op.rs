//! Operations: the wire unit of every tree mutation.
//!
//! Every change to a document travels as an [`Op`]. Ops are produced by local
//! mutations, by serialising subtrees (initial sync and reverse ops for
//! undo), and by the server when it rewrites or corrects an operation.
//!
//! Ops serialise as internally tagged JSON objects:
//!
//! ```
//! use trellis::crdt::{Op, NodeId, OpId};
//!
//! let op = Op::DeleteCrdt { op_id: Some(OpId::from("1:4")), id: NodeId::from("1:2") };
//! let json = serde_json::to_value(&op).unwrap();
//! assert_eq!(json["type"], "DeleteCrdt");
//! assert_eq!(json["opId"], "1:4");
//! ```

use serde::{Deserialize, Serialize};

use super::id::{NodeId, OpId};
use crate::constants::ACK_ID;

/// Any JSON value stored in the tree.
pub type Json = serde_json::Value;

/// A JSON object, used for the static fields of object nodes.
pub type JsonObject = serde_json::Map<String, Json>;

/// The four node kinds of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrdtType {
    Object,
    List,
    Map,
    Register,
}

impl CrdtType {
    /// Human readable name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            CrdtType::Object => "Object",
            CrdtType::List => "List",
            CrdtType::Map => "Map",
            CrdtType::Register => "Register",
        }
    }
}

impl std::fmt::Display for CrdtType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Marks a creation as replacing an existing child at the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Set,
}

/// Payload shared by the four creation ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<OpId>,
    pub id: NodeId,
    pub parent_id: NodeId,
    pub parent_key: String,
    /// Static fields for objects, the wrapped value for registers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    /// With `intent: set`, the child this creation replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_id: Option<NodeId>,
}

impl CreateOp {
    /// A plain creation of `id` under `parent_id` at `parent_key`.
    pub fn new(id: NodeId, parent_id: NodeId, parent_key: impl Into<String>) -> Self {
        Self {
            op_id: None,
            id,
            parent_id,
            parent_key: parent_key.into(),
            data: None,
            intent: None,
            deleted_id: None,
        }
    }

    /// Sets the data payload.
    pub fn with_data(mut self, data: Json) -> Self {
        self.data = Some(data);
        self
    }

    /// Marks this creation as replacing `deleted_id` (`intent: set`).
    pub fn replacing(mut self, deleted_id: Option<NodeId>) -> Self {
        self.intent = Some(Intent::Set);
        self.deleted_id = deleted_id;
        self
    }

    /// True if the op carries `intent: set`.
    pub fn is_set(&self) -> bool {
        self.intent == Some(Intent::Set)
    }

    /// Static fields of an object creation; anything but a JSON object yields none.
    pub fn object_data(&self) -> JsonObject {
        match &self.data {
            Some(Json::Object(map)) => map.clone(),
            _ => JsonObject::new(),
        }
    }
}

/// A single tree operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Op {
    CreateObject(CreateOp),
    CreateMap(CreateOp),
    CreateList(CreateOp),
    CreateRegister(CreateOp),
    #[serde(rename_all = "camelCase")]
    UpdateObject {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
        id: NodeId,
        data: JsonObject,
    },
    #[serde(rename_all = "camelCase")]
    DeleteObjectKey {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
        id: NodeId,
        key: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteCrdt {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
        id: NodeId,
    },
    #[serde(rename_all = "camelCase")]
    SetParentKey {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        op_id: Option<OpId>,
        id: NodeId,
        parent_key: String,
    },
}

impl Op {
    /// Builds a creation op of the given kind.
    pub fn create(kind: CrdtType, create: CreateOp) -> Self {
        match kind {
            CrdtType::Object => Op::CreateObject(create),
            CrdtType::Map => Op::CreateMap(create),
            CrdtType::List => Op::CreateList(create),
            CrdtType::Register => Op::CreateRegister(create),
        }
    }

    /// The acknowledgement sent back for an operation the server ignored.
    pub fn ack(op_id: OpId) -> Self {
        Op::DeleteCrdt {
            op_id: Some(op_id),
            id: NodeId::from(ACK_ID),
        }
    }

    /// True for acknowledgement ops, which carry no tree change.
    pub fn is_ack(&self) -> bool {
        matches!(self, Op::DeleteCrdt { id, .. } if id == ACK_ID)
    }

    /// The id of the node this op targets (the created node for creations).
    pub fn node_id(&self) -> &NodeId {
        match self {
            Op::CreateObject(c) | Op::CreateMap(c) | Op::CreateList(c) | Op::CreateRegister(c) => {
                &c.id
            }
            Op::UpdateObject { id, .. }
            | Op::DeleteObjectKey { id, .. }
            | Op::DeleteCrdt { id, .. }
            | Op::SetParentKey { id, .. } => id,
        }
    }

    pub fn op_id(&self) -> Option<&OpId> {
        match self {
            Op::CreateObject(c) | Op::CreateMap(c) | Op::CreateList(c) | Op::CreateRegister(c) => {
                c.op_id.as_ref()
            }
            Op::UpdateObject { op_id, .. }
            | Op::DeleteObjectKey { op_id, .. }
            | Op::DeleteCrdt { op_id, .. }
            | Op::SetParentKey { op_id, .. } => op_id.as_ref(),
        }
    }

    /// Replaces the op id.
    pub fn set_op_id(&mut self, new_id: Option<OpId>) {
        match self {
            Op::CreateObject(c) | Op::CreateMap(c) | Op::CreateList(c) | Op::CreateRegister(c) => {
                c.op_id = new_id
            }
            Op::UpdateObject { op_id, .. }
            | Op::DeleteObjectKey { op_id, .. }
            | Op::DeleteCrdt { op_id, .. }
            | Op::SetParentKey { op_id, .. } => *op_id = new_id,
        }
    }

    /// Returns the op with the given op id.
    pub fn with_op_id(mut self, op_id: OpId) -> Self {
        self.set_op_id(Some(op_id));
        self
    }

    /// Returns the op with its op id removed, as stored in reverse batches.
    pub fn without_op_id(mut self) -> Self {
        self.set_op_id(None);
        self
    }

    /// For creation ops, the kind of node created and the payload.
    pub fn as_create(&self) -> Option<(CrdtType, &CreateOp)> {
        match self {
            Op::CreateObject(c) => Some((CrdtType::Object, c)),
            Op::CreateMap(c) => Some((CrdtType::Map, c)),
            Op::CreateList(c) => Some((CrdtType::List, c)),
            Op::CreateRegister(c) => Some((CrdtType::Register, c)),
            _ => None,
        }
    }

    /// Mutable access to the payload of a creation op.
    pub fn as_create_mut(&mut self) -> Option<&mut CreateOp> {
        match self {
            Op::CreateObject(c) | Op::CreateMap(c) | Op::CreateList(c) | Op::CreateRegister(c) => {
                Some(c)
            }
            _ => None,
        }
    }

    /// Short name of the op kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Op::CreateObject(_) => "CreateObject",
            Op::CreateMap(_) => "CreateMap",
            Op::CreateList(_) => "CreateList",
            Op::CreateRegister(_) => "CreateRegister",
            Op::UpdateObject { .. } => "UpdateObject",
            Op::DeleteObjectKey { .. } => "DeleteObjectKey",
            Op::DeleteCrdt { .. } => "DeleteCrdt",
            Op::SetParentKey { .. } => "SetParentKey",
        }
    }
}

//! Flat, persisted representation of tree nodes.
//!
//! A document travels (initial storage state) and is persisted as a list of
//! `(id, SerializedNode)` items. The root is the single item without a
//! `parentId`.

use serde::{Deserialize, Serialize};

use super::id::NodeId;
use super::op::{CreateOp, CrdtType, Json, JsonObject};

/// One node of the flat representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedNode {
    #[serde(rename = "type")]
    pub kind: CrdtType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Json>,
}

/// An `(id, node)` pair as it appears in `InitialStorageState`.
pub type NodeItem = (NodeId, SerializedNode);

impl SerializedNode {
    /// An empty root object.
    pub fn root() -> Self {
        Self {
            kind: CrdtType::Object,
            parent_id: None,
            parent_key: None,
            data: Some(Json::Object(JsonObject::new())),
        }
    }

    /// A child node of the given kind.
    pub fn child(
        kind: CrdtType,
        parent_id: NodeId,
        parent_key: impl Into<String>,
        data: Option<Json>,
    ) -> Self {
        Self {
            kind,
            parent_id: Some(parent_id),
            parent_key: Some(parent_key.into()),
            data,
        }
    }

    /// The node described by a creation op.
    pub fn from_create(kind: CrdtType, op: &CreateOp) -> Self {
        let data = match kind {
            CrdtType::Object => Some(Json::Object(op.object_data())),
            CrdtType::Register => Some(op.data.clone().unwrap_or(Json::Null)),
            CrdtType::Map | CrdtType::List => None,
        };
        Self::child(kind, op.parent_id.clone(), op.parent_key.clone(), data)
    }

    /// The `(parent id, parent key)` link, if both halves are present.
    pub fn parent(&self) -> Option<(&NodeId, &str)> {
        match (&self.parent_id, &self.parent_key) {
            (Some(id), Some(key)) => Some((id, key.as_str())),
            _ => None,
        }
    }

    /// Static fields of an object node (empty for any other kind).
    pub fn object_data(&self) -> JsonObject {
        match (&self.kind, &self.data) {
            (CrdtType::Object, Some(Json::Object(map))) => map.clone(),
            _ => JsonObject::new(),
        }
    }

    /// True if this is an object without static fields.
    pub fn has_empty_data(&self) -> bool {
        match &self.data {
            None => true,
            Some(Json::Object(map)) => map.is_empty(),
            Some(_) => false,
        }
    }
}

//! User intents turned into operations.
//!
//! A [`Mutation`] describes what a user wants to do to a node ("set key
//! `title`", "move list item 3 to 0"). [`Mutation::into_ops`] resolves it
//! against the current [`Document`] into the operations that perform it,
//! minting node ids for any new nodes. Op ids are left empty; they are assigned
//! when the session applies and queues the ops.

use std::collections::BTreeMap;

use super::document::Document;
use super::errors::CRDTError;
use super::id::{IdGenerator, NodeId};
use super::op::{CreateOp, CrdtType, Json, JsonObject, Op};
use super::position::{Pos, make_position};

/// A value to store in the tree: plain JSON or a new composite node.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveValue {
    /// A JSON value. Static data under objects, a register elsewhere.
    Json(Json),
    /// A new object; JSON entries become its static fields.
    Object(BTreeMap<String, LiveValue>),
    /// A new map.
    Map(BTreeMap<String, LiveValue>),
    /// A new list.
    List(Vec<LiveValue>),
}

impl LiveValue {
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, LiveValue)>) -> Self {
        LiveValue::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, LiveValue)>) -> Self {
        LiveValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(items: impl IntoIterator<Item = LiveValue>) -> Self {
        LiveValue::List(items.into_iter().collect())
    }

    /// The node kind this value becomes when stored in a map or a list.
    pub fn crdt_type(&self) -> CrdtType {
        match self {
            LiveValue::Json(_) => CrdtType::Register,
            LiveValue::Object(_) => CrdtType::Object,
            LiveValue::Map(_) => CrdtType::Map,
            LiveValue::List(_) => CrdtType::List,
        }
    }
}

impl From<Json> for LiveValue {
    fn from(value: Json) -> Self {
        LiveValue::Json(value)
    }
}

/// A change requested on an existing node.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    ObjectSet {
        node: NodeId,
        key: String,
        value: LiveValue,
    },
    ObjectUpdate {
        node: NodeId,
        fields: BTreeMap<String, LiveValue>,
    },
    ObjectDelete {
        node: NodeId,
        key: String,
    },
    MapSet {
        node: NodeId,
        key: String,
        value: LiveValue,
    },
    MapDelete {
        node: NodeId,
        key: String,
    },
    ListInsert {
        node: NodeId,
        index: usize,
        value: LiveValue,
    },
    ListPush {
        node: NodeId,
        value: LiveValue,
    },
    ListMove {
        node: NodeId,
        from: usize,
        to: usize,
    },
    ListDelete {
        node: NodeId,
        index: usize,
    },
    ListSet {
        node: NodeId,
        index: usize,
        value: LiveValue,
    },
    ListClear {
        node: NodeId,
    },
}

impl Mutation {
    /// The node the mutation targets.
    pub fn node(&self) -> &NodeId {
        match self {
            Mutation::ObjectSet { node, .. }
            | Mutation::ObjectUpdate { node, .. }
            | Mutation::ObjectDelete { node, .. }
            | Mutation::MapSet { node, .. }
            | Mutation::MapDelete { node, .. }
            | Mutation::ListInsert { node, .. }
            | Mutation::ListPush { node, .. }
            | Mutation::ListMove { node, .. }
            | Mutation::ListDelete { node, .. }
            | Mutation::ListSet { node, .. }
            | Mutation::ListClear { node } => node,
        }
    }

    /// Resolves the mutation into operations against the current document.
    ///
    /// An empty result means there is nothing to do (e.g. deleting a missing
    /// key).
    ///
    /// # Errors
    ///
    /// Usage errors: the node is missing or of the wrong kind, or a list index
    /// is out of range.
    pub fn into_ops(self, doc: &Document, ids: &mut IdGenerator) -> Result<Vec<Op>, CRDTError> {
        match self {
            Mutation::ObjectSet { node, key, value } => {
                doc.object(&node)?;
                Ok(object_field_ops(&node, BTreeMap::from([(key, value)]), ids))
            }
            Mutation::ObjectUpdate { node, fields } => {
                doc.object(&node)?;
                Ok(object_field_ops(&node, fields, ids))
            }
            Mutation::ObjectDelete { node, key } => {
                if !doc.object(&node)?.has_key(&key) {
                    return Ok(Vec::new());
                }
                Ok(vec![Op::DeleteObjectKey {
                    op_id: None,
                    id: node,
                    key,
                }])
            }
            Mutation::MapSet { node, key, value } => {
                let replaced = doc.map(&node)?.get(&key).cloned();
                let mut ops = create_ops(&value, ids.next_node_id(), &node, &key, ids);
                mark_as_set(&mut ops, replaced);
                Ok(ops)
            }
            Mutation::MapDelete { node, key } => Ok(doc
                .map(&node)?
                .get(&key)
                .map(|child| delete(child.clone()))
                .into_iter()
                .collect()),
            Mutation::ListInsert { node, index, value } => list_insert(doc, node, index, value, ids),
            Mutation::ListPush { node, value } => {
                let index = doc.list(&node)?.len();
                list_insert(doc, node, index, value, ids)
            }
            Mutation::ListMove { node, from, to } => {
                let list = doc.list(&node)?;
                let len = list.len();
                for index in [from, to] {
                    if index >= len {
                        return Err(CRDTError::IndexOutOfRange {
                            id: node.clone(),
                            index,
                            len,
                        });
                    }
                }
                if from == to {
                    return Ok(Vec::new());
                }
                let pos_of = |index: usize| list.get(index).map(|item| &item.pos);
                let (before, after) = if to < from {
                    (to.checked_sub(1).and_then(pos_of), pos_of(to))
                } else {
                    (pos_of(to), pos_of(to + 1))
                };
                let pos = make_position(before, after)?;
                let item = list.items()[from].id.clone();
                Ok(vec![Op::SetParentKey {
                    op_id: None,
                    id: item,
                    parent_key: pos.into(),
                }])
            }
            Mutation::ListDelete { node, index } => {
                let list = doc.list(&node)?;
                let item = list.get(index).ok_or_else(|| CRDTError::IndexOutOfRange {
                    id: node.clone(),
                    index,
                    len: list.len(),
                })?;
                Ok(vec![delete(item.id.clone())])
            }
            Mutation::ListSet { node, index, value } => {
                let list = doc.list(&node)?;
                let item = list.get(index).ok_or_else(|| CRDTError::IndexOutOfRange {
                    id: node.clone(),
                    index,
                    len: list.len(),
                })?;
                let replaced = item.id.clone();
                let mut ops = create_ops(&value, ids.next_node_id(), &node, item.pos.as_str(), ids);
                mark_as_set(&mut ops, Some(replaced));
                Ok(ops)
            }
            Mutation::ListClear { node } => Ok(doc
                .list(&node)?
                .items()
                .iter()
                .map(|item| delete(item.id.clone()))
                .collect()),
        }
    }
}

fn delete(id: NodeId) -> Op {
    Op::DeleteCrdt { op_id: None, id }
}

fn mark_as_set(ops: &mut [Op], replaced: Option<NodeId>) {
    if let Some(create) = ops.first_mut().and_then(Op::as_create_mut) {
        create.intent = Some(super::op::Intent::Set);
        create.deleted_id = replaced;
    }
}

fn list_insert(
    doc: &Document,
    node: NodeId,
    index: usize,
    value: LiveValue,
    ids: &mut IdGenerator,
) -> Result<Vec<Op>, CRDTError> {
    let list = doc.list(&node)?;
    if index > list.len() {
        return Err(CRDTError::IndexOutOfRange {
            id: node,
            index,
            len: list.len(),
        });
    }
    let before = index.checked_sub(1).and_then(|i| list.get(i)).map(|item| &item.pos);
    let after = list.get(index).map(|item| &item.pos);
    let pos = make_position(before, after)?;
    Ok(create_ops(&value, ids.next_node_id(), &node, pos.as_str(), ids))
}

/// Ops writing fields of an existing object: JSON into one `UpdateObject`,
/// composite values as new child subtrees.
fn object_field_ops(
    node: &NodeId,
    fields: BTreeMap<String, LiveValue>,
    ids: &mut IdGenerator,
) -> Vec<Op> {
    let mut data = JsonObject::new();
    let mut children = Vec::new();
    for (key, value) in fields {
        match value {
            LiveValue::Json(json) => {
                data.insert(key, json);
            }
            live => children.extend(create_ops(&live, ids.next_node_id(), node, &key, ids)),
        }
    }
    let mut ops = Vec::with_capacity(children.len() + 1);
    if !data.is_empty() {
        ops.push(Op::UpdateObject {
            op_id: None,
            id: node.clone(),
            data,
        });
    }
    ops.extend(children);
    ops
}

/// Creation ops for a new subtree rooted at `id`, parents first.
fn create_ops(
    value: &LiveValue,
    id: NodeId,
    parent: &NodeId,
    key: &str,
    ids: &mut IdGenerator,
) -> Vec<Op> {
    let mut ops = Vec::new();
    let create = CreateOp::new(id.clone(), parent.clone(), key);
    match value {
        LiveValue::Json(json) => ops.push(Op::CreateRegister(create.with_data(json.clone()))),
        LiveValue::Object(fields) => {
            let data: JsonObject = fields
                .iter()
                .filter_map(|(k, v)| match v {
                    LiveValue::Json(json) => Some((k.clone(), json.clone())),
                    _ => None,
                })
                .collect();
            ops.push(Op::CreateObject(create.with_data(Json::Object(data))));
            for (child_key, child) in fields {
                if !matches!(child, LiveValue::Json(_)) {
                    ops.extend(create_ops(child, ids.next_node_id(), &id, child_key, ids));
                }
            }
        }
        LiveValue::Map(entries) => {
            ops.push(Op::CreateMap(create));
            for (child_key, child) in entries {
                ops.extend(create_ops(child, ids.next_node_id(), &id, child_key, ids));
            }
        }
        LiveValue::List(items) => {
            ops.push(Op::CreateList(create));
            let mut previous: Option<Pos> = None;
            for child in items {
                // Only fails for out-of-order bounds, which cannot happen when appending.
                let Ok(pos) = make_position(previous.as_ref(), None) else {
                    break;
                };
                ops.extend(create_ops(child, ids.next_node_id(), &id, pos.as_str(), ids));
                previous = Some(pos);
            }
        }
    }
    ops
}

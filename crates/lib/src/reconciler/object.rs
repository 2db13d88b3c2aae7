//! Object rules: per-key last-writer-wins against pending local writes.

use tracing::debug;

use super::{ApplyResult, Provenance};
use crate::Result;
use crate::crdt::{
    CrdtType, CreateOp, Document, JsonObject, KeyUpdate, Node, NodeId, Op, OpId, StorageUpdate,
};

/// What a remote write on a key should do given the pending local marker.
enum KeyOwnership {
    /// No pending local write: apply.
    Free,
    /// The echo of our own pending write: already applied, clear the marker.
    OwnEcho,
    /// A different local write is pending: the remote write loses.
    Pending,
}

fn ownership(pending: Option<&OpId>, op_id: Option<&OpId>) -> KeyOwnership {
    match pending {
        None => KeyOwnership::Free,
        Some(pending) if Some(pending) == op_id => KeyOwnership::OwnEcho,
        Some(_) => KeyOwnership::Pending,
    }
}

/// Creates a child node under `key` of an object, replacing whatever was there.
pub(super) fn attach_child(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    provenance: Provenance,
) -> Result<ApplyResult> {
    let object_id = &create.parent_id;
    let key = create.parent_key.as_str();

    if kind == CrdtType::Register {
        debug!(parent = %object_id, key, "Registers cannot be object children, ignoring");
        return Ok(ApplyResult::unchanged());
    }

    let exists = doc.contains(&create.id);
    let Some(object) = doc.object_mut(object_id) else {
        return Ok(ApplyResult::unchanged());
    };

    if exists {
        if create.op_id.is_some() && object.prop_to_last_update.get(key) == create.op_id.as_ref() {
            object.prop_to_last_update.remove(key);
        }
        return Ok(ApplyResult::unchanged());
    }

    if provenance.is_local() {
        if let Some(op_id) = &create.op_id {
            object.prop_to_last_update.insert(key.to_string(), op_id.clone());
        }
    } else {
        match ownership(object.prop_to_last_update.get(key), create.op_id.as_ref()) {
            KeyOwnership::Free => {}
            // The node is not attached although the server accepted it:
            // an earlier echo detached it, so put it back.
            KeyOwnership::OwnEcho => {
                object.prop_to_last_update.remove(key);
            }
            KeyOwnership::Pending => return Ok(ApplyResult::unchanged()),
        }
    }

    let reverse = take_key(doc, object_id, key)?;
    doc.attach(Node::from_create(kind, create, key))?;
    if let Some(object) = doc.object_mut(object_id) {
        object.children.insert(key.to_string(), create.id.clone());
    }
    Ok(ApplyResult::modified(
        StorageUpdate::object_key(object_id.clone(), key, KeyUpdate::Update),
        reverse,
    ))
}

/// Clears `key` of an object, returning the ops that would restore it.
fn take_key(doc: &mut Document, object_id: &NodeId, key: &str) -> Result<Vec<Op>> {
    let Some(object) = doc.object_mut(object_id) else {
        return Ok(Vec::new());
    };
    if let Some(child) = object.children.remove(key) {
        let reverse = doc.serialize_to_ops(&child, object_id, key)?;
        doc.detach(&child);
        return Ok(reverse);
    }
    if let Some(old) = object.data.remove(key) {
        return Ok(vec![Op::UpdateObject {
            op_id: None,
            id: object_id.clone(),
            data: JsonObject::from_iter([(key.to_string(), old)]),
        }]);
    }
    Ok(vec![Op::DeleteObjectKey {
        op_id: None,
        id: object_id.clone(),
        key: key.to_string(),
    }])
}

/// Writes static fields, key by key.
pub(super) fn apply_update(
    doc: &mut Document,
    object_id: &NodeId,
    data: &JsonObject,
    op_id: Option<&OpId>,
    provenance: Provenance,
) -> ApplyResult {
    let mut updates = std::collections::BTreeMap::new();
    let mut reverse = Vec::new();
    let mut previous = JsonObject::new();

    for (key, value) in data {
        let Some(object) = doc.object_mut(object_id) else {
            return ApplyResult::unchanged();
        };
        if provenance.is_local() {
            if let Some(op_id) = op_id {
                object.prop_to_last_update.insert(key.clone(), op_id.clone());
            }
        } else {
            match ownership(object.prop_to_last_update.get(key.as_str()), op_id) {
                KeyOwnership::Free => {}
                KeyOwnership::OwnEcho => {
                    object.prop_to_last_update.remove(key.as_str());
                    continue;
                }
                KeyOwnership::Pending => continue,
            }
        }

        if let Some(child) = object.children.remove(key.as_str()) {
            // A static value replaces a child node under the same key.
            if let Ok(ops) = doc.serialize_to_ops(&child, object_id, key) {
                reverse.extend(ops);
            }
            doc.detach(&child);
        } else if let Some(old) = object.data.get(key.as_str()) {
            previous.insert(key.clone(), old.clone());
        } else {
            reverse.push(Op::DeleteObjectKey {
                op_id: None,
                id: object_id.clone(),
                key: key.clone(),
            });
        }
        if let Some(object) = doc.object_mut(object_id) {
            object.data.insert(key.clone(), value.clone());
        }
        updates.insert(key.clone(), KeyUpdate::Update);
    }

    if updates.is_empty() {
        return ApplyResult::unchanged();
    }
    if !previous.is_empty() {
        reverse.insert(
            0,
            Op::UpdateObject {
                op_id: None,
                id: object_id.clone(),
                data: previous,
            },
        );
    }
    ApplyResult::modified(
        StorageUpdate::Object {
            node: object_id.clone(),
            updates,
        },
        reverse,
    )
}

/// Removes a key, static or child.
pub(super) fn apply_delete_key(
    doc: &mut Document,
    object_id: &NodeId,
    key: &str,
    op_id: Option<&OpId>,
    provenance: Provenance,
) -> Result<ApplyResult> {
    let Some(object) = doc.object_mut(object_id) else {
        return Ok(ApplyResult::unchanged());
    };
    if provenance.is_local() {
        if !object.has_key(key) {
            return Ok(ApplyResult::unchanged());
        }
        if let Some(op_id) = op_id {
            object.prop_to_last_update.insert(key.to_string(), op_id.clone());
        }
    } else {
        match ownership(object.prop_to_last_update.get(key), op_id) {
            KeyOwnership::Free => {}
            KeyOwnership::OwnEcho => {
                object.prop_to_last_update.remove(key);
                return Ok(ApplyResult::unchanged());
            }
            // A local write on this key is still pending and wins.
            KeyOwnership::Pending => return Ok(ApplyResult::unchanged()),
        }
        if !object.has_key(key) {
            return Ok(ApplyResult::unchanged());
        }
    }

    let deleted = object.data.get(key).cloned();
    let reverse = take_key(doc, object_id, key)?;
    Ok(ApplyResult::modified(
        StorageUpdate::object_key(object_id.clone(), key, KeyUpdate::Delete { deleted }),
        reverse,
    ))
}

/// Removes a child node of an object.
pub(super) fn detach_child(
    doc: &mut Document,
    object_id: &NodeId,
    child: &NodeId,
) -> Result<ApplyResult> {
    let Some(object) = doc.object_mut(object_id) else {
        return Ok(ApplyResult::unchanged());
    };
    let Some(key) = object
        .children
        .iter()
        .find_map(|(key, id)| (id == child).then(|| key.clone()))
    else {
        return Ok(ApplyResult::unchanged());
    };
    let reverse = take_key(doc, object_id, &key)?;
    Ok(ApplyResult::modified(
        StorageUpdate::object_key(object_id.clone(), key, KeyUpdate::Delete { deleted: None }),
        reverse,
    ))
}

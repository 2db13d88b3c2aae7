//! Map rules: a pending local `set` on a key wins until the server echoes it.

use super::{ApplyResult, Provenance};
use crate::Result;
use crate::crdt::{CrdtType, CreateOp, Document, KeyUpdate, Node, NodeId, Op, StorageUpdate};

pub(super) fn attach_child(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    provenance: Provenance,
) -> Result<ApplyResult> {
    let map_id = &create.parent_id;
    let key = create.parent_key.as_str();
    let exists = doc.contains(&create.id);
    let Some(map) = doc.map_mut(map_id) else {
        return Ok(ApplyResult::unchanged());
    };

    if exists {
        if create.op_id.is_some() && map.unacknowledged_sets.get(key) == create.op_id.as_ref() {
            map.unacknowledged_sets.remove(key);
        }
        return Ok(ApplyResult::unchanged());
    }

    match provenance {
        Provenance::Local | Provenance::UndoRedo => {
            if let Some(op_id) = &create.op_id {
                map.unacknowledged_sets.insert(key.to_string(), op_id.clone());
            }
        }
        Provenance::Ack => match map.unacknowledged_sets.get(key) {
            // Our latest set on this key. An earlier echo may have detached
            // the node (undo then redo before the flush): the server holds it.
            Some(pending) if Some(pending) == create.op_id.as_ref() => {
                map.unacknowledged_sets.remove(key);
            }
            Some(_) => return Ok(ApplyResult::unchanged()),
            None => {}
        },
        Provenance::Remote => {
            if map.unacknowledged_sets.contains_key(key) {
                return Ok(ApplyResult::unchanged());
            }
        }
    }

    let reverse = match map.children.remove(key) {
        Some(previous) => {
            let ops = doc.serialize_to_ops(&previous, map_id, key)?;
            doc.detach(&previous);
            ops
        }
        None => vec![Op::DeleteCrdt {
            op_id: None,
            id: create.id.clone(),
        }],
    };
    doc.attach(Node::from_create(kind, create, key))?;
    if let Some(map) = doc.map_mut(map_id) {
        map.children.insert(key.to_string(), create.id.clone());
    }
    Ok(ApplyResult::modified(
        StorageUpdate::map_key(map_id.clone(), key, KeyUpdate::Update),
        reverse,
    ))
}

pub(super) fn detach_child(
    doc: &mut Document,
    map_id: &NodeId,
    child: &NodeId,
) -> Result<ApplyResult> {
    let Some(map) = doc.map_mut(map_id) else {
        return Ok(ApplyResult::unchanged());
    };
    let Some(key) = map
        .children
        .iter()
        .find_map(|(key, id)| (id == child).then(|| key.clone()))
    else {
        return Ok(ApplyResult::unchanged());
    };
    map.children.remove(&key);
    let reverse = doc.serialize_to_ops(child, map_id, &key)?;
    doc.detach(child);
    Ok(ApplyResult::modified(
        StorageUpdate::map_key(map_id.clone(), key, KeyUpdate::Delete { deleted: None }),
        reverse,
    ))
}

//! List rules: position collisions, `set` replacement and moves.
//!
//! A list keeps its children sorted by [`Pos`] with unique positions. When an
//! incoming operation targets an occupied position the outcome depends on
//! provenance:
//!
//! - remote and acknowledged operations keep their position and the current
//!   occupant is shifted just after it, as the server did the same;
//! - local and replayed operations go to a fresh position after the occupant
//!   and a `SetParentKey` fix is returned so the server and the other replicas
//!   agree on the new placement.
//!
//! A remote `set` whose replaced child is not the occupant hides the occupant
//! ("implicitly deleted") instead of destroying it, because the server may
//! still move it back through an acknowledgement.

use tracing::{debug, warn};

use super::{ApplyResult, Provenance};
use crate::Result;
use crate::crdt::{
    CrdtType, CreateOp, Document, ListDelta, ListItem, Node, NodeId, Op, Pos, StorageUpdate,
    make_position,
};

pub(super) fn attach_child(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    provenance: Provenance,
) -> Result<ApplyResult> {
    let pos = match Pos::parse(&create.parent_key) {
        Ok(pos) => pos,
        Err(err) => {
            warn!(id = %create.id, %err, "Ignoring list creation with an invalid position");
            return Ok(ApplyResult::unchanged());
        }
    };
    if create.is_set() {
        match provenance {
            Provenance::Remote => apply_set_remote(doc, kind, create, pos),
            Provenance::Ack => apply_set_ack(doc, kind, create, pos),
            Provenance::Local | Provenance::UndoRedo => apply_set_local(doc, kind, create, pos),
        }
    } else {
        match provenance {
            Provenance::Remote => apply_insert_remote(doc, kind, create, pos),
            Provenance::Ack => apply_insert_ack(doc, kind, create, pos),
            Provenance::Local | Provenance::UndoRedo => apply_insert_local(doc, kind, create, pos),
        }
    }
}

fn list_update(list_id: &NodeId, deltas: Vec<ListDelta>) -> ApplyResult {
    if deltas.is_empty() {
        ApplyResult::unchanged()
    } else {
        ApplyResult::modified(StorageUpdate::list(list_id.clone(), deltas), Vec::new())
    }
}

fn delete_op(id: &NodeId) -> Op {
    Op::DeleteCrdt {
        op_id: None,
        id: id.clone(),
    }
}

/// Index of the item at `pos`, if any.
fn index_at(doc: &Document, list_id: &NodeId, pos: &Pos) -> Option<usize> {
    doc.list(list_id).ok()?.index_of_pos(pos)
}

fn index_of(doc: &Document, list_id: &NodeId, id: &NodeId) -> Option<usize> {
    doc.list(list_id).ok()?.index_of_id(id)
}

fn pos_at(doc: &Document, list_id: &NodeId, index: usize) -> Option<Pos> {
    Some(doc.list(list_id).ok()?.get(index)?.pos.clone())
}

/// A free position right after the item at `index`.
fn position_after(doc: &Document, list_id: &NodeId, index: usize) -> Result<Pos> {
    let before = pos_at(doc, list_id, index);
    let after = pos_at(doc, list_id, index + 1);
    Ok(make_position(before.as_ref(), after.as_ref())?)
}

/// Moves the item at `index` to a new position, keeping the child link in sync.
fn reposition(doc: &mut Document, list_id: &NodeId, index: usize, pos: Pos) {
    let Some(list) = doc.list_mut(list_id) else {
        return;
    };
    let Some(item) = list.items.get_mut(index) else {
        return;
    };
    item.pos = pos.clone();
    let id = item.id.clone();
    list.sort();
    doc.set_parent_key(&id, pos);
}

/// If `pos` is taken, moves its occupant to a fresh position right after it.
fn shift_occupant(doc: &mut Document, list_id: &NodeId, pos: &Pos) -> Result<()> {
    if let Some(index) = index_at(doc, list_id, pos) {
        let shifted = position_after(doc, list_id, index)?;
        debug!(list = %list_id, from = %pos, to = %shifted, "Shifting list item off a taken position");
        reposition(doc, list_id, index, shifted);
    }
    Ok(())
}

/// Creates the node and links it at `pos`, which the caller made free.
fn create_item(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    pos: Pos,
) -> Result<usize> {
    doc.attach(Node::from_create(kind, create, pos.clone()))?;
    let list_id = &create.parent_id;
    let index = doc
        .list_mut(list_id)
        .map(|list| {
            list.insert_sorted(ListItem {
                pos,
                id: create.id.clone(),
            })
        })
        .unwrap_or_default();
    Ok(index)
}

/// Puts a hidden child back at `pos`, which the caller made free.
fn restore_hidden(doc: &mut Document, list_id: &NodeId, id: &NodeId, pos: Pos) -> Option<usize> {
    doc.set_parent_key(id, pos.clone());
    let list = doc.list_mut(list_id)?;
    list.implicitly_deleted.remove(id);
    Some(list.insert_sorted(ListItem { pos, id: id.clone() }))
}

/// Takes the item at `index` out of the list without destroying it.
fn hide_item(doc: &mut Document, list_id: &NodeId, index: usize) -> Option<ListDelta> {
    let list = doc.list_mut(list_id)?;
    let item = list.items.remove(index);
    list.implicitly_deleted.insert(item.id.clone());
    Some(ListDelta::Delete {
        index,
        deleted: item.id,
    })
}

/// Removes the child a `set` replaced, wherever it currently is in the list.
fn detach_replaced(
    doc: &mut Document,
    list_id: &NodeId,
    deleted_id: Option<&NodeId>,
) -> Result<Option<(ListDelta, Vec<Op>)>> {
    let Some(deleted_id) = deleted_id else {
        return Ok(None);
    };
    let Some(index) = index_of(doc, list_id, deleted_id) else {
        return Ok(None);
    };
    let Some(pos) = pos_at(doc, list_id, index) else {
        return Ok(None);
    };
    let reverse = doc.serialize_to_ops(deleted_id, list_id, pos.as_str())?;
    if let Some(list) = doc.list_mut(list_id) {
        list.items.remove(index);
    }
    doc.detach(deleted_id);
    Ok(Some((
        ListDelta::Delete {
            index,
            deleted: deleted_id.clone(),
        },
        reverse,
    )))
}

fn apply_insert_remote(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    pos: Pos,
) -> Result<ApplyResult> {
    if doc.contains(&create.id) {
        return Ok(ApplyResult::unchanged());
    }
    let list_id = &create.parent_id;
    shift_occupant(doc, list_id, &pos)?;
    let index = create_item(doc, kind, create, pos)?;
    Ok(list_update(
        list_id,
        vec![ListDelta::Insert {
            index,
            item: create.id.clone(),
        }],
    ))
}

fn apply_insert_ack(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    pos: Pos,
) -> Result<ApplyResult> {
    let list_id = &create.parent_id;

    if let Some(previous_index) = index_of(doc, list_id, &create.id) {
        if pos_at(doc, list_id, previous_index).as_ref() == Some(&pos) {
            return Ok(ApplyResult::unchanged());
        }
        // The server placed our item elsewhere: follow it.
        shift_occupant(doc, list_id, &pos)?;
        let Some(current) = index_of(doc, list_id, &create.id) else {
            return Ok(ApplyResult::unchanged());
        };
        reposition(doc, list_id, current, pos);
        let index = index_of(doc, list_id, &create.id).unwrap_or(current);
        if index == previous_index {
            return Ok(ApplyResult::unchanged());
        }
        return Ok(list_update(
            list_id,
            vec![ListDelta::Move {
                index,
                previous_index,
                item: create.id.clone(),
            }],
        ));
    }

    let hidden = doc
        .list(list_id)
        .is_ok_and(|list| list.is_implicitly_deleted(&create.id));
    if hidden {
        shift_occupant(doc, list_id, &pos)?;
        let Some(index) = restore_hidden(doc, list_id, &create.id, pos) else {
            return Ok(ApplyResult::unchanged());
        };
        return Ok(list_update(
            list_id,
            vec![ListDelta::Insert {
                index,
                item: create.id.clone(),
            }],
        ));
    }

    if doc.contains(&create.id) {
        // Attached under another parent; nothing to follow here.
        return Ok(ApplyResult::unchanged());
    }
    apply_insert_remote(doc, kind, create, pos)
}

fn apply_insert_local(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    pos: Pos,
) -> Result<ApplyResult> {
    if doc.contains(&create.id) {
        return Ok(ApplyResult::unchanged());
    }
    let list_id = &create.parent_id;
    let (pos, fix) = match index_at(doc, list_id, &pos) {
        Some(occupied) => {
            let fresh = position_after(doc, list_id, occupied)?;
            let fix = Op::SetParentKey {
                op_id: None,
                id: create.id.clone(),
                parent_key: fresh.to_string(),
            };
            (fresh, Some(fix))
        }
        None => (pos, None),
    };
    let index = create_item(doc, kind, create, pos)?;
    let mut result = ApplyResult::modified(
        StorageUpdate::list(
            list_id.clone(),
            vec![ListDelta::Insert {
                index,
                item: create.id.clone(),
            }],
        ),
        vec![delete_op(&create.id)],
    );
    result.fix = fix;
    Ok(result)
}

fn apply_set_remote(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    pos: Pos,
) -> Result<ApplyResult> {
    if doc.contains(&create.id) {
        return Ok(ApplyResult::unchanged());
    }
    let list_id = &create.parent_id;
    let mut deltas = Vec::new();

    match index_at(doc, list_id, &pos) {
        Some(index) => {
            let occupant = doc
                .list(list_id)?
                .get(index)
                .map(|item| item.id.clone());
            if let Some(list) = doc.list_mut(list_id) {
                list.items.remove(index);
            }
            let replaced_occupant = occupant.as_ref() == create.deleted_id.as_ref();
            match occupant {
                Some(occupant) if replaced_occupant => {
                    doc.detach(&occupant);
                }
                Some(occupant) => {
                    if let Some(list) = doc.list_mut(list_id) {
                        list.implicitly_deleted.insert(occupant);
                    }
                }
                None => {}
            }
            let index = create_item(doc, kind, create, pos)?;
            deltas.push(ListDelta::Set {
                index,
                item: create.id.clone(),
            });
            if !replaced_occupant
                && let Some((delta, _)) = detach_replaced(doc, list_id, create.deleted_id.as_ref())?
            {
                deltas.push(delta);
            }
        }
        None => {
            if let Some((delta, _)) = detach_replaced(doc, list_id, create.deleted_id.as_ref())? {
                deltas.push(delta);
            }
            let index = create_item(doc, kind, create, pos)?;
            deltas.push(ListDelta::Insert {
                index,
                item: create.id.clone(),
            });
        }
    }
    Ok(list_update(list_id, deltas))
}

fn apply_set_ack(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    pos: Pos,
) -> Result<ApplyResult> {
    let list_id = &create.parent_id;
    let mut deltas = Vec::new();

    if let Some((delta, _)) = detach_replaced(doc, list_id, create.deleted_id.as_ref())? {
        deltas.push(delta);
    }

    if let Ok(list) = doc.list(list_id)
        && let Some(pending) = list.unacknowledged_sets.get(&pos)
    {
        if Some(pending) != create.op_id.as_ref() {
            // A newer local set on this position is still in flight.
            return Ok(list_update(list_id, deltas));
        }
        if let Some(list) = doc.list_mut(list_id) {
            list.unacknowledged_sets.remove(&pos);
        }
    }

    if let Some(previous_index) = index_of(doc, list_id, &create.id) {
        if pos_at(doc, list_id, previous_index).as_ref() == Some(&pos) {
            return Ok(list_update(list_id, deltas));
        }
        if let Some(occupied) = index_at(doc, list_id, &pos)
            && let Some(delta) = hide_item(doc, list_id, occupied)
        {
            deltas.push(delta);
        }
        let Some(previous_index) = index_of(doc, list_id, &create.id) else {
            return Ok(list_update(list_id, deltas));
        };
        reposition(doc, list_id, previous_index, pos);
        let index = index_of(doc, list_id, &create.id).unwrap_or(previous_index);
        if index != previous_index {
            deltas.push(ListDelta::Move {
                index,
                previous_index,
                item: create.id.clone(),
            });
        }
        return Ok(list_update(list_id, deltas));
    }

    let hidden = doc
        .list(list_id)
        .is_ok_and(|list| list.is_implicitly_deleted(&create.id));
    if !hidden && doc.contains(&create.id) {
        return Ok(list_update(list_id, deltas));
    }

    let replaced = match index_at(doc, list_id, &pos) {
        Some(occupied) => hide_item(doc, list_id, occupied).is_some(),
        None => false,
    };
    let index = if hidden {
        restore_hidden(doc, list_id, &create.id, pos)
    } else {
        Some(create_item(doc, kind, create, pos)?)
    };
    if let Some(index) = index {
        let item = create.id.clone();
        deltas.push(if replaced {
            ListDelta::Set { index, item }
        } else {
            ListDelta::Insert { index, item }
        });
    }
    Ok(list_update(list_id, deltas))
}

fn apply_set_local(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    pos: Pos,
) -> Result<ApplyResult> {
    if doc.contains(&create.id) {
        return Ok(ApplyResult::unchanged());
    }
    let list_id = &create.parent_id;
    if let (Some(op_id), Some(list)) = (&create.op_id, doc.list_mut(list_id)) {
        list.unacknowledged_sets.insert(pos.clone(), op_id.clone());
    }

    let mut deltas = Vec::new();
    let mut reverse = vec![delete_op(&create.id)];

    match index_at(doc, list_id, &pos) {
        Some(index) => {
            let occupant = doc
                .list(list_id)?
                .get(index)
                .map(|item| item.id.clone());
            if let Some(occupant) = &occupant {
                reverse.extend(doc.serialize_to_ops(occupant, list_id, pos.as_str())?);
                if let Some(list) = doc.list_mut(list_id) {
                    list.items.remove(index);
                }
                doc.detach(occupant);
            }
            let index = create_item(doc, kind, create, pos)?;
            deltas.push(ListDelta::Set {
                index,
                item: create.id.clone(),
            });
            if create.deleted_id != occupant
                && let Some((delta, ops)) = detach_replaced(doc, list_id, create.deleted_id.as_ref())?
            {
                deltas.push(delta);
                reverse.extend(ops);
            }
        }
        None => {
            let index = create_item(doc, kind, create, pos)?;
            deltas.push(ListDelta::Insert {
                index,
                item: create.id.clone(),
            });
            if let Some((delta, ops)) = detach_replaced(doc, list_id, create.deleted_id.as_ref())? {
                deltas.push(delta);
                reverse.extend(ops);
            }
        }
    }

    Ok(ApplyResult::modified(
        StorageUpdate::list(list_id.clone(), deltas),
        reverse,
    ))
}

/// Removes a child of a list, visible or hidden.
pub(super) fn detach_child(
    doc: &mut Document,
    list_id: &NodeId,
    child: &NodeId,
) -> Result<ApplyResult> {
    let Some(index) = index_of(doc, list_id, child) else {
        let hidden = doc
            .list_mut(list_id)
            .is_some_and(|list| list.implicitly_deleted.remove(child));
        if hidden {
            doc.detach(child);
        }
        return Ok(ApplyResult::unchanged());
    };
    let Some(pos) = pos_at(doc, list_id, index) else {
        return Ok(ApplyResult::unchanged());
    };
    let reverse = doc.serialize_to_ops(child, list_id, pos.as_str())?;
    if let Some(list) = doc.list_mut(list_id) {
        list.items.remove(index);
    }
    doc.detach(child);
    Ok(ApplyResult::modified(
        StorageUpdate::list(
            list_id.clone(),
            vec![ListDelta::Delete {
                index,
                deleted: child.clone(),
            }],
        ),
        reverse,
    ))
}

/// Moves a child of a list to a new position.
pub(super) fn set_child_key(
    doc: &mut Document,
    list_id: &NodeId,
    child: &NodeId,
    key: &str,
    provenance: Provenance,
) -> Result<ApplyResult> {
    let pos = match Pos::parse(key) {
        Ok(pos) => pos,
        Err(err) => {
            warn!(id = %child, %err, "Ignoring move to an invalid position");
            return Ok(ApplyResult::unchanged());
        }
    };

    let hidden = doc
        .list(list_id)
        .is_ok_and(|list| list.is_implicitly_deleted(child));
    if hidden {
        if provenance.is_local() {
            return Ok(ApplyResult::unchanged());
        }
        shift_occupant(doc, list_id, &pos)?;
        let Some(index) = restore_hidden(doc, list_id, child, pos) else {
            return Ok(ApplyResult::unchanged());
        };
        return Ok(list_update(
            list_id,
            vec![ListDelta::Insert {
                index,
                item: child.clone(),
            }],
        ));
    }

    let Some(previous_index) = index_of(doc, list_id, child) else {
        return Ok(ApplyResult::unchanged());
    };
    let Some(previous_pos) = pos_at(doc, list_id, previous_index) else {
        return Ok(ApplyResult::unchanged());
    };
    if previous_pos == pos {
        return Ok(ApplyResult::unchanged());
    }

    let mut fix = None;
    let target = match (provenance.is_local(), index_at(doc, list_id, &pos)) {
        (true, Some(occupied)) => {
            let fresh = position_after(doc, list_id, occupied)?;
            fix = Some(Op::SetParentKey {
                op_id: None,
                id: child.clone(),
                parent_key: fresh.to_string(),
            });
            fresh
        }
        (false, Some(_)) => {
            shift_occupant(doc, list_id, &pos)?;
            pos
        }
        (_, None) => pos,
    };

    let Some(current) = index_of(doc, list_id, child) else {
        return Ok(ApplyResult::unchanged());
    };
    reposition(doc, list_id, current, target);
    let index = index_of(doc, list_id, child).unwrap_or(current);

    let reverse = if provenance.is_local() {
        vec![Op::SetParentKey {
            op_id: None,
            id: child.clone(),
            parent_key: previous_pos.to_string(),
        }]
    } else {
        Vec::new()
    };
    let deltas = if index == previous_index {
        Vec::new()
    } else {
        vec![ListDelta::Move {
            index,
            previous_index,
            item: child.clone(),
        }]
    };
    let mut result = if provenance.is_local() {
        // The position changed even if the visible order did not.
        ApplyResult::modified(StorageUpdate::list(list_id.clone(), deltas), reverse)
    } else {
        list_update(list_id, deltas)
    };
    result.fix = fix;
    Ok(result)
}

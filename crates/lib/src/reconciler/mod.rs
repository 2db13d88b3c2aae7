//! Operation application and conflict resolution.
//!
//! Every change to a [`Document`] goes through [`apply_op`] (or the batch form
//! [`apply_ops`]). The same operation is applied whether it was just issued
//! locally, arrived from the server, or is replayed from history; its
//! [`Provenance`] selects which conflict rule applies:
//!
//! - [`Provenance::Local`]: an optimistic mutation issued by this session. It
//!   always applies and records a pending marker so the server echo can be
//!   recognised.
//! - [`Provenance::Remote`]: another replica's operation broadcast by the
//!   server. It loses against keys this session still has pending writes on.
//! - [`Provenance::Ack`]: the server's echo of one of our own operations. It
//!   clears pending markers and moves list items to the position the server
//!   settled on.
//! - [`Provenance::UndoRedo`]: a batch replayed from the history stacks. It
//!   behaves like a local mutation.
//!
//! Applying an operation never fails because of a conflict. Conflicts are
//! resolved deterministically and show up as an unchanged result, a smaller
//! delta, or a `fix` operation for the caller to send along.
//!
//! # Examples
//!
//! ```
//! use trellis::crdt::{CreateOp, Document, NodeId, Op, OpId};
//! use trellis::reconciler::{Provenance, apply_op};
//!
//! let mut doc = Document::new();
//! let op = Op::CreateList(CreateOp::new(NodeId::from("1:0"), NodeId::root(), "items"))
//!     .with_op_id(OpId::from("1:0"));
//! let result = apply_op(&mut doc, &op, Provenance::Local).unwrap();
//!
//! assert!(result.is_modified());
//! assert_eq!(doc.root_json(), serde_json::json!({"items": []}));
//! ```

mod list;
mod map;
mod object;

use std::collections::HashSet;

use tracing::debug;

use crate::Result;
use crate::crdt::{CrdtType, CreateOp, Document, NodeId, NodeKind, Op, ParentLink, StorageUpdate, UpdateSet};

/// Origin of an operation being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    Local,
    Remote,
    Ack,
    UndoRedo,
}

impl Provenance {
    /// True for operations originating in this session.
    pub fn is_local(&self) -> bool {
        matches!(self, Provenance::Local | Provenance::UndoRedo)
    }
}

/// Outcome of applying one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyResult {
    /// The visible change, or `None` if the tree did not change.
    pub update: Option<StorageUpdate>,
    /// Operations restoring the previous state, for the history stacks.
    pub reverse: Vec<Op>,
    /// A correction to send along with a local operation whose target slot was
    /// already taken (the node was placed elsewhere).
    pub fix: Option<Op>,
}

impl ApplyResult {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn modified(update: StorageUpdate, reverse: Vec<Op>) -> Self {
        Self {
            update: Some(update),
            reverse,
            fix: None,
        }
    }

    pub fn with_fix(mut self, fix: Op) -> Self {
        self.fix = Some(fix);
        self
    }

    pub fn is_modified(&self) -> bool {
        self.update.is_some()
    }
}

/// Outcome of applying a batch of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    /// Visible changes, merged per node.
    pub updates: UpdateSet,
    /// Operations undoing the whole batch, in application order.
    pub reverse: Vec<Op>,
    /// Corrections emitted while applying local operations.
    pub fixes: Vec<Op>,
}

/// Applies a single operation to `doc`.
///
/// # Errors
///
/// Only arena invariant violations, which indicate a bug in the caller (for
/// example attaching a node that is already attached through another path).
pub fn apply_op(doc: &mut Document, op: &Op, provenance: Provenance) -> Result<ApplyResult> {
    if op.is_ack() {
        return Ok(ApplyResult::unchanged());
    }
    let result = match op {
        Op::CreateObject(create)
        | Op::CreateMap(create)
        | Op::CreateList(create)
        | Op::CreateRegister(create) => {
            let Some((kind, _)) = op.as_create() else {
                return Ok(ApplyResult::unchanged());
            };
            apply_create(doc, kind, create, provenance)?
        }
        Op::UpdateObject { op_id, id, data } => {
            object::apply_update(doc, id, data, op_id.as_ref(), provenance)
        }
        Op::DeleteObjectKey { op_id, id, key } => {
            object::apply_delete_key(doc, id, key, op_id.as_ref(), provenance)?
        }
        Op::DeleteCrdt { id, .. } => apply_delete(doc, id)?,
        Op::SetParentKey { id, parent_key, .. } => {
            apply_set_parent_key(doc, id, parent_key, provenance)?
        }
    };
    debug!(
        op = op.kind_name(),
        id = %op.node_id(),
        ?provenance,
        modified = result.is_modified(),
        "Applied op"
    );
    Ok(result)
}

/// Applies a batch, choosing each operation's provenance with `provenance_of`.
///
/// Changes to nodes created earlier in the same batch are folded into their
/// creation: they produce neither a separate delta nor separate reverse ops.
pub fn apply_ops<F>(doc: &mut Document, ops: &[Op], mut provenance_of: F) -> Result<BatchResult>
where
    F: FnMut(&Op) -> Provenance,
{
    let mut batch = BatchResult::default();
    let mut created: HashSet<NodeId> = HashSet::new();

    for op in ops {
        if op.is_ack() {
            // Still let the caller observe it, e.g. to clear offline markers.
            provenance_of(op);
            continue;
        }
        let provenance = provenance_of(op);
        let result = apply_op(doc, op, provenance)?;
        if let Some(update) = result.update {
            if !created.contains(update.node_id()) {
                batch.updates.push(update);
                batch.reverse.splice(0..0, result.reverse);
            }
            if let Some((kind, create)) = op.as_create()
                && kind != CrdtType::Register
            {
                created.insert(create.id.clone());
            }
        }
        batch.fixes.extend(result.fix);
    }
    Ok(batch)
}

fn apply_create(
    doc: &mut Document,
    kind: CrdtType,
    create: &CreateOp,
    provenance: Provenance,
) -> Result<ApplyResult> {
    let Some(parent) = doc.get(&create.parent_id) else {
        debug!(parent = %create.parent_id, id = %create.id, "Parent missing, ignoring creation");
        return Ok(ApplyResult::unchanged());
    };
    match parent.crdt_type() {
        CrdtType::Object => object::attach_child(doc, kind, create, provenance),
        CrdtType::Map => map::attach_child(doc, kind, create, provenance),
        CrdtType::List => list::attach_child(doc, kind, create, provenance),
        CrdtType::Register => {
            debug!(parent = %create.parent_id, "Registers have no children, ignoring creation");
            Ok(ApplyResult::unchanged())
        }
    }
}

fn apply_delete(doc: &mut Document, id: &NodeId) -> Result<ApplyResult> {
    if id.is_root() {
        return Ok(ApplyResult::unchanged());
    }
    let Some(node) = doc.get(id) else {
        return Ok(ApplyResult::unchanged());
    };
    let ParentLink::Child { parent, .. } = node.parent().clone() else {
        return Ok(ApplyResult::unchanged());
    };
    detach_child(doc, &parent, id)
}

/// Removes `child` from `parent`, deleting its subtree.
pub(crate) fn detach_child(doc: &mut Document, parent: &NodeId, child: &NodeId) -> Result<ApplyResult> {
    match doc.get(parent).map(|node| node.crdt_type()) {
        Some(CrdtType::Object) => object::detach_child(doc, parent, child),
        Some(CrdtType::Map) => map::detach_child(doc, parent, child),
        Some(CrdtType::List) => list::detach_child(doc, parent, child),
        Some(CrdtType::Register) | None => {
            // The parent is gone, so is the child for all practical purposes.
            doc.detach(child);
            Ok(ApplyResult::unchanged())
        }
    }
}

fn apply_set_parent_key(
    doc: &mut Document,
    id: &NodeId,
    key: &str,
    provenance: Provenance,
) -> Result<ApplyResult> {
    let Some(node) = doc.get(id) else {
        return Ok(ApplyResult::unchanged());
    };
    let Some(parent) = node.parent().parent_id().cloned() else {
        return Ok(ApplyResult::unchanged());
    };
    match doc.get(&parent).map(|node| node.kind()) {
        Some(NodeKind::List(_)) => list::set_child_key(doc, &parent, id, key, provenance),
        _ => Ok(ApplyResult::unchanged()),
    }
}

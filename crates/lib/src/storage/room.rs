//! Server-side application of client operations.
//!
//! The server is the sequencer of a room: every client op passes through one
//! [`RoomStorage`] in arrival order. An op is either accepted, possibly
//! rewritten and paired with a correction (`fix`) broadcast to every replica,
//! or ignored. Ignored ops are answered with an acknowledgement so the sender
//! can drop its offline marker.

use serde::Serialize;
use tracing::{debug, warn};

use super::StorageDriver;
use crate::Result;
use crate::crdt::{
    CrdtType, CreateOp, JsonObject, NodeId, NodeItem, Op, Pos, SerializedNode, make_position,
};

/// Outcome of applying one client op.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OpResult {
    /// The op took effect. `op` is what to broadcast; it differs from the
    /// incoming op when the server moved it to a free position.
    Accepted {
        op: Op,
        #[serde(skip_serializing_if = "Option::is_none")]
        fix: Option<Op>,
    },
    /// The op had no effect.
    Ignored,
}

impl OpResult {
    fn accepted(op: Op) -> Self {
        OpResult::Accepted { op, fix: None }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, OpResult::Accepted { .. })
    }

    /// The ops to broadcast for this result.
    ///
    /// An ignored op yields an acknowledgement of `original`, if it carried an
    /// op id.
    pub fn outgoing(&self, original: &Op) -> Vec<Op> {
        match self {
            OpResult::Accepted { op, fix } => std::iter::once(op.clone()).chain(fix.clone()).collect(),
            OpResult::Ignored => original.op_id().cloned().map(Op::ack).into_iter().collect(),
        }
    }
}

/// The authoritative tree of one room.
#[derive(Debug)]
pub struct RoomStorage<D> {
    driver: D,
}

impl<D: StorageDriver> RoomStorage<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_inner(self) -> D {
        self.driver
    }

    /// The node list sent to clients as `InitialStorageState`.
    pub fn initial_state(&self) -> Vec<NodeItem> {
        self.driver.iter_nodes()
    }

    /// Persists everything applied so far.
    pub async fn flush(&mut self) -> Result<()> {
        self.driver.flush().await
    }

    /// Applies ops in order.
    pub fn apply_ops(&mut self, ops: impl IntoIterator<Item = Op>) -> Result<Vec<OpResult>> {
        ops.into_iter().map(|op| self.apply_op(op)).collect()
    }

    /// Applies one client op.
    pub fn apply_op(&mut self, op: Op) -> Result<OpResult> {
        if op.is_ack() {
            return Ok(OpResult::Ignored);
        }
        let result = match &op {
            Op::CreateObject(create)
            | Op::CreateMap(create)
            | Op::CreateList(create)
            | Op::CreateRegister(create) => {
                let kind = op.as_create().map_or(CrdtType::Object, |(kind, _)| kind);
                self.apply_create(&op, kind, create)?
            }
            Op::UpdateObject { id, data, .. } => self.apply_update(&op, id, data)?,
            Op::DeleteObjectKey { id, key, .. } => {
                if self.object_kind(id) {
                    if self.driver.delete_child_key(id, key)? {
                        OpResult::accepted(op.clone())
                    } else {
                        OpResult::Ignored
                    }
                } else {
                    OpResult::Ignored
                }
            }
            Op::DeleteCrdt { id, .. } => {
                if id.is_root() || !self.driver.has_node(id) {
                    OpResult::Ignored
                } else {
                    let removed = self.driver.delete_node(id)?;
                    debug!(%id, removed, "Deleted node");
                    OpResult::accepted(op.clone())
                }
            }
            Op::SetParentKey { id, parent_key, .. } => self.apply_set_parent_key(&op, id, parent_key)?,
        };
        if !result.is_accepted() {
            warn!(op = op.kind_name(), id = %op.node_id(), "Ignored op");
        }
        Ok(result)
    }

    fn object_kind(&self, id: &NodeId) -> bool {
        self.driver
            .get_node(id)
            .is_some_and(|node| node.kind == CrdtType::Object)
    }

    fn apply_create(&mut self, op: &Op, kind: CrdtType, create: &CreateOp) -> Result<OpResult> {
        if self.driver.has_node(&create.id) {
            return Ok(OpResult::Ignored);
        }
        let Some(parent_kind) = self.driver.get_node(&create.parent_id).map(|node| node.kind) else {
            return Ok(OpResult::Ignored);
        };
        let node = SerializedNode::from_create(kind, create);
        match parent_kind {
            CrdtType::Register => Ok(OpResult::Ignored),
            CrdtType::Object if kind == CrdtType::Register => Ok(OpResult::Ignored),
            CrdtType::Object | CrdtType::Map => {
                self.driver.set_child(create.id.clone(), node, true)?;
                Ok(OpResult::accepted(op.clone()))
            }
            CrdtType::List => self.apply_list_create(op, create, node),
        }
    }

    fn apply_list_create(
        &mut self,
        op: &Op,
        create: &CreateOp,
        mut node: SerializedNode,
    ) -> Result<OpResult> {
        let list = &create.parent_id;
        let Ok(pos) = Pos::parse(&create.parent_key) else {
            return Ok(OpResult::Ignored);
        };

        if create.is_set() {
            // The replaced node goes even if it moved meanwhile, and so does
            // whatever now sits at the target slot.
            if let Some(deleted) = &create.deleted_id
                && self
                    .driver
                    .get_node(deleted)
                    .is_some_and(|node| node.parent_id.as_ref() == Some(list))
            {
                self.driver.delete_node(deleted)?;
            }
            let mut fix = None;
            if let Some(occupant) = self.driver.get_child_at(list, pos.as_str()).cloned() {
                self.driver.delete_node(&occupant)?;
                fix = Some(Op::DeleteCrdt {
                    op_id: None,
                    id: occupant,
                });
            }
            self.driver.set_child(create.id.clone(), node, false)?;
            return Ok(OpResult::Accepted {
                op: op.clone(),
                fix,
            });
        }

        if self.driver.get_child_at(list, pos.as_str()).is_none() {
            self.driver.set_child(create.id.clone(), node, false)?;
            return Ok(OpResult::accepted(op.clone()));
        }

        let free = self.free_position_after(list, &pos)?;
        debug!(id = %create.id, from = %pos, to = %free, "Moving colliding insert");
        node.parent_key = Some(free.to_string());
        self.driver.set_child(create.id.clone(), node, false)?;

        let mut rewritten = op.clone();
        if let Some(create) = rewritten.as_create_mut() {
            create.parent_key = free.to_string();
        }
        Ok(OpResult::Accepted {
            op: rewritten,
            fix: Some(Op::SetParentKey {
                op_id: None,
                id: create.id.clone(),
                parent_key: free.into(),
            }),
        })
    }

    /// A position between `pos` and its next sibling.
    fn free_position_after(&self, list: &NodeId, pos: &Pos) -> Result<Pos> {
        let next = self
            .driver
            .get_next_sibling(list, pos.as_str())
            .and_then(|(key, _)| Pos::parse(key).ok());
        Ok(make_position(Some(pos), next.as_ref())?)
    }

    fn apply_update(&mut self, op: &Op, id: &NodeId, data: &JsonObject) -> Result<OpResult> {
        if !self.object_kind(id) {
            return Ok(OpResult::Ignored);
        }
        self.driver.set_object_data(id, data.clone(), true)?;
        Ok(OpResult::accepted(op.clone()))
    }

    fn apply_set_parent_key(&mut self, op: &Op, id: &NodeId, key: &str) -> Result<OpResult> {
        if id.is_root() {
            return Ok(OpResult::Ignored);
        }
        let Some((list, current)) = self
            .driver
            .get_node(id)
            .and_then(|node| node.parent())
            .map(|(parent, key)| (parent.clone(), key.to_string()))
        else {
            return Ok(OpResult::Ignored);
        };
        if self.driver.get_node(&list).map(|node| node.kind) != Some(CrdtType::List) {
            return Ok(OpResult::Ignored);
        }
        let Ok(pos) = Pos::parse(key) else {
            return Ok(OpResult::Ignored);
        };
        if pos.as_str() == current {
            return Ok(OpResult::Ignored);
        }

        if self.driver.get_child_at(&list, pos.as_str()).is_none() {
            self.driver.move_sibling(id, pos.as_str())?;
            return Ok(OpResult::accepted(op.clone()));
        }

        let free = self.free_position_after(&list, &pos)?;
        self.driver.move_sibling(id, free.as_str())?;
        let mut rewritten = op.clone();
        if let Op::SetParentKey { parent_key, .. } = &mut rewritten {
            *parent_key = free.to_string();
        }
        Ok(OpResult::Accepted {
            op: rewritten,
            fix: Some(Op::SetParentKey {
                op_id: None,
                id: id.clone(),
                parent_key: free.into(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::crdt::OpId;
    use crate::storage::MemoryDriver;

    fn room_with_list() -> RoomStorage<MemoryDriver> {
        let mut room = RoomStorage::new(MemoryDriver::new());
        let result = room
            .apply_op(Op::CreateList(CreateOp::new(
                NodeId::from("1:0"),
                NodeId::root(),
                "items",
            )))
            .unwrap();
        assert!(result.is_accepted());
        room
    }

    fn register(id: &str, key: &str, value: &str) -> Op {
        Op::CreateRegister(
            CreateOp::new(NodeId::from(id), NodeId::from("1:0"), key).with_data(json!(value)),
        )
        .with_op_id(OpId::from(id))
    }

    #[test]
    fn test_colliding_insert_is_moved() {
        let mut room = room_with_list();
        room.apply_op(register("1:1", "!", "a")).unwrap();
        let result = room.apply_op(register("2:1", "!", "b")).unwrap();

        let OpResult::Accepted { op, fix: Some(fix) } = &result else {
            panic!("expected a fix, got {result:?}");
        };
        let Op::SetParentKey { id, parent_key, .. } = fix else {
            panic!("expected SetParentKey fix");
        };
        assert_eq!(id, "2:1");
        assert!(Pos::parse(parent_key).unwrap() > Pos::parse("!").unwrap());
        assert_eq!(op.as_create().unwrap().1.parent_key, *parent_key);
        assert_eq!(room.driver().iter_nodes().len(), 4);
        assert_eq!(result.outgoing(&register("2:1", "!", "b")).len(), 2);
    }

    #[test]
    fn test_ignored_op_is_acknowledged() {
        let mut room = RoomStorage::new(MemoryDriver::new());
        let op = Op::DeleteCrdt {
            op_id: Some(OpId::from("3:7")),
            id: NodeId::from("9:9"),
        };
        let result = room.apply_op(op.clone()).unwrap();
        assert_eq!(result, OpResult::Ignored);
        assert_eq!(result.outgoing(&op), vec![Op::ack(OpId::from("3:7"))]);
        assert_eq!(serde_json::to_value(&result).unwrap(), json!({"action": "ignored"}));
    }

    #[test]
    fn test_set_replaces_moved_target_and_occupant() {
        let mut room = room_with_list();
        room.apply_op(register("1:1", "!", "a")).unwrap();
        room.apply_op(register("1:2", "#", "b")).unwrap();
        // 1:1 moved away, 1:2 moved into its old slot.
        room.apply_op(Op::SetParentKey {
            op_id: None,
            id: NodeId::from("1:1"),
            parent_key: "$".to_string(),
        })
        .unwrap();
        room.apply_op(Op::SetParentKey {
            op_id: None,
            id: NodeId::from("1:2"),
            parent_key: "!".to_string(),
        })
        .unwrap();

        let set = Op::CreateRegister(
            CreateOp::new(NodeId::from("2:0"), NodeId::from("1:0"), "!")
                .with_data(json!("c"))
                .replacing(Some(NodeId::from("1:1"))),
        );
        let result = room.apply_op(set).unwrap();
        let OpResult::Accepted { fix: Some(Op::DeleteCrdt { id, .. }), .. } = result else {
            panic!("expected an eviction fix");
        };
        assert_eq!(id, "1:2");
        let children: Vec<&str> = room
            .driver()
            .store()
            .children_of(&NodeId::from("1:0"))
            .map(|(_, id)| id.as_str())
            .collect();
        assert_eq!(children, vec!["2:0"]);
    }

    #[test]
    fn test_register_under_object_ignored() {
        let mut room = RoomStorage::new(MemoryDriver::new());
        let op = Op::CreateRegister(CreateOp::new(NodeId::from("1:0"), NodeId::root(), "a"));
        assert_eq!(room.apply_op(op).unwrap(), OpResult::Ignored);
    }

    #[test]
    fn test_update_evicts_child_with_same_key() {
        let mut room = room_with_list();
        let mut data = JsonObject::new();
        data.insert("items".to_string(), json!(1));
        let result = room
            .apply_op(Op::UpdateObject {
                op_id: None,
                id: NodeId::root(),
                data,
            })
            .unwrap();
        assert!(result.is_accepted());
        assert_eq!(room.initial_state().len(), 1);
    }

    #[test]
    fn test_delete_missing_key_ignored() {
        let mut room = RoomStorage::new(MemoryDriver::new());
        let op = Op::DeleteObjectKey {
            op_id: None,
            id: NodeId::root(),
            key: "nope".to_string(),
        };
        assert_eq!(room.apply_op(op).unwrap(), OpResult::Ignored);
    }
}

//! Wire messages between a client session and the server.
//!
//! Every message is a JSON object `{"type": ..., "data": ...}`. Heartbeats
//! travel as bare [`PING`]/[`PONG`] text frames outside this envelope.

use serde::{Deserialize, Serialize};

use crate::crdt::{Json, JsonObject, NodeItem, Op};

/// Heartbeat frame sent by the client.
pub const PING: &str = "ping";

/// Heartbeat answer sent by the server.
pub const PONG: &str = "pong";

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// A presence patch (or the full presence right after connecting).
    UpdatePresence { presence: JsonObject },
    /// A custom event broadcast to the other users.
    ClientEvent { event: Json },
    /// Requests the `InitialStorageState`.
    FetchStorage,
    UpdateStorage(Vec<Op>),
}

/// A connected user as announced by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub actor: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Json>,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    UpdatePresence {
        actor: u32,
        presence: JsonObject,
    },
    UserJoined(UserInfo),
    UserLeft {
        actor: u32,
    },
    Event {
        actor: u32,
        event: Json,
    },
    /// The users already in the room, sent once after connecting.
    RoomState {
        users: Vec<UserInfo>,
    },
    /// The full tree, root first.
    InitialStorageState(Vec<NodeItem>),
    UpdateStorage(Vec<Op>),
}

impl ClientMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::crdt::{NodeId, SerializedNode};

    #[test]
    fn test_envelope_shape() {
        let value = serde_json::to_value(ClientMessage::FetchStorage).unwrap();
        assert_eq!(value, json!({"type": "FetchStorage"}));

        let value = serde_json::to_value(ClientMessage::ClientEvent { event: json!(1) }).unwrap();
        assert_eq!(value, json!({"type": "ClientEvent", "data": {"event": 1}}));
    }

    #[test]
    fn test_initial_storage_decodes() {
        let text = r#"{"type": "InitialStorageState", "data": [["root", {"type": "Object", "data": {"a": 1}}]]}"#;
        let ServerMessage::InitialStorageState(items) = ServerMessage::from_json(text).unwrap() else {
            panic!("wrong message");
        };
        assert_eq!(items[0].0, NodeId::root());
        assert_eq!(
            items[0].1,
            SerializedNode {
                data: Some(json!({"a": 1})),
                ..SerializedNode::root()
            }
        );
    }
}

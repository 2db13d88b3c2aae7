use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use trellis::crdt::{Document, IdGenerator, Json, LiveValue, Mutation, NodeId, Op};
use trellis::reconciler::{Provenance, apply_ops};
use trellis::session::{ClientMessage, ClientSession, ConnectionState, ServerMessage, SessionConfig};
use trellis::storage::{MemoryDriver, RoomStorage};

/// Rounds after which `sync` gives up on reaching a quiet room.
const MAX_ROUNDS: usize = 50;

/// The id of the child stored under `key` of the root object.
pub fn root_child(doc: &Document, key: &str) -> NodeId {
    doc.object(&NodeId::root())
        .unwrap()
        .children()
        .get(key)
        .cloned()
        .unwrap_or_else(|| panic!("no child under {key:?}"))
}

pub fn set_root(key: &str, value: impl Into<LiveValue>) -> Mutation {
    Mutation::ObjectSet {
        node: NodeId::root(),
        key: key.to_string(),
        value: value.into(),
    }
}

pub fn text(value: &str) -> LiveValue {
    LiveValue::Json(json!(value))
}

/// Applies a mutation to a bare document as a local change.
pub fn mutate_doc(doc: &mut Document, ids: &mut IdGenerator, mutation: Mutation) -> Vec<Op> {
    let ops: Vec<Op> = mutation
        .into_ops(doc, ids)
        .unwrap()
        .into_iter()
        .map(|op| op.with_op_id(ids.next_op_id()))
        .collect();
    apply_ops(doc, &ops, |_| Provenance::Local).unwrap();
    ops
}

/// A document with an empty list under `"items"`, and that list's id.
pub fn doc_with_list(ids: &mut IdGenerator) -> (Document, NodeId) {
    let mut doc = Document::new();
    mutate_doc(&mut doc, ids, set_root("items", LiveValue::list([])));
    let list = root_child(&doc, "items");
    (doc, list)
}

/// One room: a server storage and several clients, with messages routed by
/// hand and a simulated clock.
pub struct TestRoom {
    pub storage: RoomStorage<MemoryDriver>,
    pub clients: Vec<ClientSession>,
    pub now: Instant,
}

impl TestRoom {
    /// A room with `count` connected clients (actors 1..=count) that have
    /// all loaded the storage.
    pub fn new(count: usize) -> Self {
        let now = Instant::now();
        let clients = (1..=count as u32)
            .map(|actor| {
                let mut session = ClientSession::new("room", SessionConfig::default());
                session.set_state(ConnectionState::Authenticating);
                session.on_authenticated(actor);
                session.on_open(now);
                session
            })
            .collect();
        let mut room = Self {
            storage: RoomStorage::new(MemoryDriver::new()),
            clients,
            now,
        };
        room.sync();
        room
    }

    pub fn client(&mut self, index: usize) -> &mut ClientSession {
        &mut self.clients[index]
    }

    pub fn mutate(&mut self, index: usize, mutation: Mutation) {
        let now = self.now;
        self.clients[index].mutate(mutation, now).unwrap();
    }

    /// Routes messages until every client and the server are quiet.
    pub fn sync(&mut self) {
        for _ in 0..MAX_ROUNDS {
            if !self.round() {
                return;
            }
        }
        panic!("room did not settle after {MAX_ROUNDS} rounds");
    }

    /// One round: every client flushes, the server processes the messages in
    /// client order, then replies are delivered. Returns false when nothing
    /// was sent.
    pub fn round(&mut self) -> bool {
        self.now += Duration::from_secs(1);
        let now = self.now;
        let mut deliveries = Vec::new();
        for from in 0..self.clients.len() {
            let actor = self.clients[from].actor();
            for message in self.clients[from].take_outgoing(now) {
                deliveries.extend(route(&mut self.storage, self.clients.len(), from, actor, message));
            }
        }
        let active = !deliveries.is_empty();
        for (to, message) in deliveries {
            // A disconnected client misses whatever was broadcast meanwhile.
            if self.clients[to].state().is_open() {
                self.clients[to].handle_message(message, now).unwrap();
            }
        }
        active
    }

    /// Drops the socket of a client.
    pub fn disconnect(&mut self, index: usize) {
        self.clients[index].on_disconnect(ConnectionState::Unavailable);
    }

    /// Reopens the socket of a client and lets the room settle.
    pub fn reconnect(&mut self, index: usize) {
        let now = self.now;
        let client = &mut self.clients[index];
        let actor = client.actor();
        client.set_state(ConnectionState::Authenticating);
        client.on_authenticated(actor);
        client.on_open(now);
        self.sync();
    }

    /// The server's tree as JSON.
    pub fn server_json(&self) -> Json {
        Document::load(self.storage.initial_state()).root_json()
    }

    /// Asserts that every client and the server hold the same tree.
    pub fn assert_converged(&self) -> Json {
        let expected = self.server_json();
        for (index, client) in self.clients.iter().enumerate() {
            assert_eq!(
                client.root_json().as_ref(),
                Some(&expected),
                "client {index} diverged from the server"
            );
        }
        expected
    }
}

/// What the server sends in answer to one client message.
fn route(
    storage: &mut RoomStorage<MemoryDriver>,
    clients: usize,
    from: usize,
    actor: u32,
    message: ClientMessage,
) -> Vec<(usize, ServerMessage)> {
    let others = (0..clients).filter(move |to| *to != from);
    match message {
        ClientMessage::UpdatePresence { presence } => others
            .map(|to| (to, ServerMessage::UpdatePresence { actor, presence: presence.clone() }))
            .collect(),
        ClientMessage::ClientEvent { event } => others
            .map(|to| (to, ServerMessage::Event { actor, event: event.clone() }))
            .collect(),
        ClientMessage::FetchStorage => {
            vec![(from, ServerMessage::InitialStorageState(storage.initial_state()))]
        }
        ClientMessage::UpdateStorage(ops) => {
            let mut broadcast = Vec::new();
            let mut acks = Vec::new();
            for op in ops {
                let result = storage.apply_op(op.clone()).unwrap();
                if result.is_accepted() {
                    broadcast.extend(result.outgoing(&op));
                } else {
                    acks.extend(result.outgoing(&op));
                }
            }
            let mut replies = Vec::new();
            if !broadcast.is_empty() {
                replies.extend(
                    (0..clients).map(|to| (to, ServerMessage::UpdateStorage(broadcast.clone()))),
                );
            }
            if !acks.is_empty() {
                replies.push((from, ServerMessage::UpdateStorage(acks)));
            }
            replies
        }
    }
}

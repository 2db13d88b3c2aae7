//! Client sessions: one replica of one room.
//!
//! [`ClientSession`] is the synchronous core. It owns the local [`Document`],
//! the undo/redo [`History`], presence, and the outgoing buffers, and it knows
//! nothing about sockets or timers: callers feed it server messages and the
//! current time, and take the messages it wants to send. The async
//! [`SessionDriver`] wires it to a [`Transport`], and [`Client`] keeps the
//! rooms a process has entered.
//!
//! Every storage op sent is also kept in the offline set until the server
//! echoes it (or acknowledges it). After a reconnect the local tree is moved
//! to the fresh authoritative snapshot and the offline ops are replayed and
//! resent.
//!
//! # Examples
//!
//! ```
//! use tokio::time::Instant;
//! use trellis::crdt::{LiveValue, Mutation, NodeId};
//! use trellis::session::{ClientSession, ServerMessage, SessionConfig};
//!
//! let mut session = ClientSession::new("room", SessionConfig::default());
//! let now = Instant::now();
//! session.on_authenticated(1);
//! session.on_open(now);
//! session
//!     .handle_message(ServerMessage::InitialStorageState(Vec::new()), now)
//!     .unwrap();
//!
//! session
//!     .mutate(
//!         Mutation::ObjectSet {
//!             node: NodeId::root(),
//!             key: "title".to_string(),
//!             value: serde_json::json!("hello").into(),
//!         },
//!         now,
//!     )
//!     .unwrap();
//! assert_eq!(session.root_json().unwrap()["title"], "hello");
//! assert_eq!(session.offline_ops().len(), 1);
//! ```

pub mod config;
pub mod connection;
pub mod driver;
pub mod errors;
pub mod events;
pub mod protocol;
pub mod registry;

use std::collections::BTreeMap;

use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use config::SessionConfig;
pub use connection::{Backoff, ConnectionState};
pub use driver::{Connection, Credentials, Frame, RoomHandle, SessionDriver, Transport};
pub use errors::SessionError;
pub use events::{
    EventHub, EventKind, Listener, OthersChange, OthersEvent, SessionEvent, SubscriptionId, User,
};
pub use protocol::{ClientMessage, ServerMessage, UserInfo};
pub use registry::Client;

use crate::Result;
use crate::crdt::{
    Document, IdGenerator, Json, JsonObject, Mutation, NodeItem, Op, UpdateSet, diff_ops,
};
use crate::history::{History, HistoryBatch, HistoryError, HistoryItem};
use crate::reconciler::{Provenance, apply_ops};

/// Messages waiting for the next flush.
#[derive(Debug, Default)]
struct Outgoing {
    presence: Option<JsonObject>,
    fetch_storage: bool,
    events: Vec<Json>,
    ops: Vec<Op>,
}

impl Outgoing {
    fn is_empty(&self) -> bool {
        self.presence.is_none() && !self.fetch_storage && self.events.is_empty() && self.ops.is_empty()
    }

    fn drain(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        if let Some(presence) = self.presence.take() {
            messages.push(ClientMessage::UpdatePresence { presence });
        }
        if std::mem::take(&mut self.fetch_storage) {
            messages.push(ClientMessage::FetchStorage);
        }
        messages.extend(
            self.events
                .drain(..)
                .map(|event| ClientMessage::ClientEvent { event }),
        );
        if !self.ops.is_empty() {
            messages.push(ClientMessage::UpdateStorage(std::mem::take(&mut self.ops)));
        }
        messages
    }
}

/// The state of one room as seen by this client.
#[derive(Debug)]
pub struct ClientSession {
    room_id: String,
    config: SessionConfig,
    ids: IdGenerator,
    state: ConnectionState,
    doc: Option<Document>,
    history: History,
    events: EventHub,
    presence: JsonObject,
    others: BTreeMap<u32, User>,
    outgoing: Outgoing,
    /// Sent ops not yet echoed by the server, in send order.
    offline_ops: Vec<Op>,
    /// Reverse items of the open batch, if any.
    batch: Option<HistoryBatch>,
    last_flush: Option<Instant>,
    flush_at: Option<Instant>,
}

impl ClientSession {
    pub fn new(room_id: impl Into<String>, config: SessionConfig) -> Self {
        let config = config.normalized();
        Self {
            room_id: room_id.into(),
            ids: IdGenerator::new(0),
            state: ConnectionState::Closed,
            doc: None,
            history: History::new(config.history_limit),
            events: EventHub::new(),
            presence: JsonObject::new(),
            others: BTreeMap::new(),
            outgoing: Outgoing::default(),
            offline_ops: Vec::new(),
            batch: None,
            last_flush: None,
            flush_at: None,
            config,
        }
    }

    /// Sets the presence announced when the connection opens.
    pub fn with_initial_presence(mut self, presence: JsonObject) -> Self {
        self.presence = presence;
        self
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The connection id assigned by the server (0 before authentication).
    pub fn actor(&self) -> u32 {
        self.ids.actor()
    }

    /// The local tree, once the initial storage has arrived.
    pub fn document(&self) -> Option<&Document> {
        self.doc.as_ref()
    }

    pub fn root_json(&self) -> Option<Json> {
        self.doc.as_ref().map(Document::root_json)
    }

    pub fn presence(&self) -> &JsonObject {
        &self.presence
    }

    pub fn others(&self) -> Vec<User> {
        self.others.values().cloned().collect()
    }

    pub fn offline_ops(&self) -> &[Op] {
        &self.offline_ops
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn is_batching(&self) -> bool {
        self.batch.is_some()
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        self.events.subscribe(kind, listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Reports a failure to `error` subscribers.
    pub fn emit_error(&mut self, message: impl Into<String>) {
        self.events.emit(SessionEvent::Error(message.into()));
    }

    // Connection lifecycle

    pub fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        if !self.state.can_transition_to(state) {
            warn!(from = %self.state, to = %state, "Unexpected connection transition");
        }
        info!(room = %self.room_id, from = %self.state, to = %state, "Connection state changed");
        self.state = state;
        self.events.emit(SessionEvent::Connection(state));
    }

    /// The server accepted our credentials and assigned `actor`.
    pub fn on_authenticated(&mut self, actor: u32) {
        self.ids.set_actor(actor);
        self.set_state(ConnectionState::Connecting);
    }

    /// The socket is open: announce our presence and ask for the storage.
    ///
    /// Buffered ops are dropped here; they are all in the offline set and
    /// are resent once the storage snapshot arrives.
    pub fn on_open(&mut self, now: Instant) {
        self.set_state(ConnectionState::Open);
        self.outgoing.ops.clear();
        self.outgoing.presence = Some(self.presence.clone());
        self.outgoing.fetch_storage = true;
        self.flush_at = Some(now);
    }

    /// The socket is gone; `state` is `Unavailable`, `Failed` or `Closed`.
    pub fn on_disconnect(&mut self, state: ConnectionState) {
        self.flush_at = None;
        self.set_state(state);
    }

    // Flushing

    /// When the outgoing buffer is due, if anything is pending.
    pub fn next_flush_at(&self) -> Option<Instant> {
        self.flush_at
    }

    /// Schedules a flush no earlier than one throttle interval after the last.
    ///
    /// A flush already scheduled is moved, never duplicated.
    fn schedule_flush(&mut self, now: Instant) {
        if !self.state.is_open() || self.outgoing.is_empty() {
            return;
        }
        let due = match self.last_flush {
            Some(last) => (last + self.config.throttle_duration()).max(now),
            None => now,
        };
        self.flush_at = Some(due);
    }

    /// Takes the buffered messages if a flush is due at `now`.
    pub fn take_outgoing(&mut self, now: Instant) -> Vec<ClientMessage> {
        match self.flush_at {
            Some(due) if due <= now => {}
            _ => return Vec::new(),
        }
        self.flush_at = None;
        let messages = self.outgoing.drain();
        if !messages.is_empty() {
            self.last_flush = Some(now);
        }
        messages
    }

    // Incoming

    /// Applies one message from the server.
    pub fn handle_message(&mut self, message: ServerMessage, now: Instant) -> Result<()> {
        match message {
            ServerMessage::RoomState { users } => {
                self.others = users
                    .into_iter()
                    .filter(|user| user.actor != self.ids.actor())
                    .map(|user| {
                        let user = User {
                            actor: user.actor,
                            info: user.info,
                            presence: JsonObject::new(),
                        };
                        (user.actor, user)
                    })
                    .collect();
                self.emit_others(OthersChange::Reset);
            }
            ServerMessage::UserJoined(user) => {
                self.others.insert(
                    user.actor,
                    User {
                        actor: user.actor,
                        info: user.info,
                        presence: JsonObject::new(),
                    },
                );
                self.emit_others(OthersChange::Enter { actor: user.actor });
                // The newcomer has not seen our presence yet.
                self.queue_presence(self.presence.clone());
                self.schedule_flush(now);
            }
            ServerMessage::UserLeft { actor } => {
                if self.others.remove(&actor).is_some() {
                    self.emit_others(OthersChange::Leave { actor });
                }
            }
            ServerMessage::UpdatePresence { actor, presence } => {
                self.others
                    .entry(actor)
                    .or_insert_with(|| User {
                        actor,
                        info: None,
                        presence: JsonObject::new(),
                    })
                    .presence
                    .extend(presence);
                self.emit_others(OthersChange::Update { actor });
            }
            ServerMessage::Event { actor, event } => {
                self.events.emit(SessionEvent::Event { actor, event });
            }
            ServerMessage::InitialStorageState(items) => self.load_storage(items, now)?,
            ServerMessage::UpdateStorage(ops) => self.apply_remote_ops(&ops)?,
        }
        Ok(())
    }

    fn emit_others(&mut self, change: OthersChange) {
        let others = self.others();
        self.events
            .emit(SessionEvent::Others(OthersEvent { change, others }));
    }

    fn load_storage(&mut self, items: Vec<NodeItem>, now: Instant) -> Result<()> {
        let (fresh, report) = Document::load_with_report(items);
        if !report.is_clean() {
            warn!(room = %self.room_id, %report, "Initial storage needed repair");
        }
        let Some(doc) = self.doc.as_mut() else {
            debug!(room = %self.room_id, nodes = fresh.len(), "Storage loaded");
            self.doc = Some(fresh);
            return Ok(());
        };

        // Move to the authoritative state, then replay what was never acknowledged.
        doc.clear_pending();
        let target = fresh.to_items();
        let diff = diff_ops(&doc.to_items(), &target);
        let mut updates = apply_ops(doc, &diff, |_| Provenance::Remote)?.updates;
        if doc.to_items() != target {
            warn!(room = %self.room_id, "Local tree diverged from the snapshot, replacing it");
            *doc = fresh;
        }
        let replay = apply_ops(doc, &self.offline_ops, |_| Provenance::Local)?;
        updates.extend(replay.updates);

        let fixes = stamp_ops(&mut self.ids, replay.fixes);
        self.offline_ops.extend(fixes);
        debug!(
            room = %self.room_id,
            diff = diff.len(),
            resent = self.offline_ops.len(),
            "Storage resynchronised"
        );
        self.outgoing.ops.extend(self.offline_ops.iter().cloned());
        self.emit_storage(updates);
        self.schedule_flush(now);
        Ok(())
    }

    fn apply_remote_ops(&mut self, ops: &[Op]) -> Result<()> {
        let Some(doc) = self.doc.as_mut() else {
            debug!(room = %self.room_id, "Dropping storage update received before the snapshot");
            return Ok(());
        };
        let offline = &mut self.offline_ops;
        let result = apply_ops(doc, ops, |op| {
            let Some(op_id) = op.op_id() else {
                return Provenance::Remote;
            };
            match offline.iter().position(|sent| sent.op_id() == Some(op_id)) {
                Some(index) => {
                    offline.remove(index);
                    Provenance::Ack
                }
                None => Provenance::Remote,
            }
        })?;
        self.emit_storage(result.updates);
        Ok(())
    }

    // Local changes

    /// Applies a user mutation locally and queues it for the server.
    pub fn mutate(&mut self, mutation: Mutation, now: Instant) -> Result<()> {
        let doc = self.doc.as_ref().ok_or_else(|| SessionError::StorageNotLoaded {
            room_id: self.room_id.clone(),
        })?;
        let ops = mutation.into_ops(doc, &mut self.ids)?;
        self.apply_local(ops, now)
    }

    fn apply_local(&mut self, ops: Vec<Op>, now: Instant) -> Result<()> {
        let ops = stamp_ops(&mut self.ids, ops);
        let doc = self.doc.as_mut().ok_or_else(|| SessionError::StorageNotLoaded {
            room_id: self.room_id.clone(),
        })?;
        let result = apply_ops(doc, &ops, |_| Provenance::Local)?;
        let fixes = stamp_ops(&mut self.ids, result.fixes);

        self.record_history(result.reverse.into_iter().map(HistoryItem::Storage).collect());
        self.send_ops(ops.into_iter().chain(fixes).collect(), now);
        self.emit_storage(result.updates);
        Ok(())
    }

    fn send_ops(&mut self, ops: Vec<Op>, now: Instant) {
        if ops.is_empty() {
            return;
        }
        self.offline_ops.extend(ops.iter().cloned());
        self.outgoing.ops.extend(ops);
        self.schedule_flush(now);
    }

    fn emit_storage(&mut self, updates: UpdateSet) {
        if !updates.is_empty() {
            self.events.emit(SessionEvent::Storage(updates.into_vec()));
        }
    }

    /// Merges `patch` into our presence and queues it for the others.
    pub fn update_presence(&mut self, patch: JsonObject, add_to_history: bool, now: Instant) {
        let reverse = self.apply_presence(patch);
        if add_to_history && !reverse.is_empty() {
            self.record_history(vec![HistoryItem::Presence(reverse)]);
        }
        self.schedule_flush(now);
    }

    /// Applies a presence patch and returns the patch restoring the old values.
    fn apply_presence(&mut self, patch: JsonObject) -> JsonObject {
        let reverse = patch
            .keys()
            .map(|key| {
                let old = self.presence.get(key).cloned().unwrap_or(Json::Null);
                (key.clone(), old)
            })
            .collect();
        self.presence.extend(patch.clone());
        self.queue_presence(patch);
        self.events
            .emit(SessionEvent::MyPresence(self.presence.clone()));
        reverse
    }

    fn queue_presence(&mut self, patch: JsonObject) {
        self.outgoing
            .presence
            .get_or_insert_with(JsonObject::new)
            .extend(patch);
    }

    /// Queues a custom event for the other users. Dropped while offline.
    pub fn broadcast_event(&mut self, event: Json, now: Instant) {
        if !self.state.is_open() {
            debug!(room = %self.room_id, "Not connected, dropping broadcast event");
            return;
        }
        self.outgoing.events.push(event);
        self.schedule_flush(now);
    }

    // History

    fn record_history(&mut self, reverse: HistoryBatch) {
        if reverse.is_empty() {
            return;
        }
        match &mut self.batch {
            Some(batch) => {
                batch.splice(0..0, reverse);
            }
            None => {
                self.history.record(reverse);
                self.emit_history();
            }
        }
    }

    fn emit_history(&mut self) {
        self.events.emit(SessionEvent::History {
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        });
    }

    /// Runs `f` as one unit: a single undo entry and coalesced notifications.
    ///
    /// Nested calls join the outer batch.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        if self.batch.is_some() {
            return f(self);
        }
        self.batch = Some(Vec::new());
        self.events.suspend();
        let result = f(self);
        if let Some(reverse) = self.batch.take()
            && !reverse.is_empty()
        {
            self.history.record(reverse);
            self.emit_history();
        }
        self.events.resume();
        result
    }

    pub fn undo(&mut self, now: Instant) -> Result<()> {
        if self.batch.is_some() {
            return Err(HistoryError::NotAllowedInBatch { action: "undo" }.into());
        }
        let Some(items) = self.history.pop_undo() else {
            return Ok(());
        };
        let reverse = self.replay(items, now)?;
        self.history.push_redo(reverse);
        self.emit_history();
        Ok(())
    }

    pub fn redo(&mut self, now: Instant) -> Result<()> {
        if self.batch.is_some() {
            return Err(HistoryError::NotAllowedInBatch { action: "redo" }.into());
        }
        let Some(items) = self.history.pop_redo() else {
            return Ok(());
        };
        let reverse = self.replay(items, now)?;
        self.history.push_undo(reverse);
        self.emit_history();
        Ok(())
    }

    /// Applies a history entry and returns the entry undoing it.
    fn replay(&mut self, items: HistoryBatch, now: Instant) -> Result<HistoryBatch> {
        let mut reverse = HistoryBatch::new();
        let mut ops = Vec::new();
        for item in items {
            match item {
                HistoryItem::Storage(op) => ops.push(op),
                HistoryItem::Presence(patch) => {
                    reverse.push(HistoryItem::Presence(self.apply_presence(patch)));
                }
            }
        }
        if !ops.is_empty() {
            let ops = stamp_ops(&mut self.ids, ops);
            let doc = self.doc.as_mut().ok_or_else(|| SessionError::StorageNotLoaded {
                room_id: self.room_id.clone(),
            })?;
            let result = apply_ops(doc, &ops, |_| Provenance::UndoRedo)?;
            let fixes = stamp_ops(&mut self.ids, result.fixes);
            reverse.extend(result.reverse.into_iter().map(HistoryItem::Storage));
            self.send_ops(ops.into_iter().chain(fixes).collect(), now);
            self.emit_storage(result.updates);
        }
        self.schedule_flush(now);
        Ok(reverse)
    }

    /// Coalesces everything recorded until [`resume_history`](Self::resume_history).
    pub fn pause_history(&mut self) {
        self.history.pause();
    }

    pub fn resume_history(&mut self) -> Result<()> {
        self.history.resume()?;
        self.emit_history();
        Ok(())
    }
}

/// Gives every op a fresh op id.
fn stamp_ops(ids: &mut IdGenerator, ops: Vec<Op>) -> Vec<Op> {
    ops.into_iter()
        .map(|op| op.with_op_id(ids.next_op_id()))
        .collect()
}

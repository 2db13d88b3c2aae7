//! Event fan-out for session subscribers.
//!
//! Listeners subscribe to one [`EventKind`] and are called synchronously, on
//! the task that owns the session, in subscription order. Inside a batch the
//! hub is suspended: events are queued and coalesced, then delivered when the
//! batch ends.

use serde::Serialize;

use super::connection::ConnectionState;
use crate::crdt::{Json, JsonObject, StorageUpdate, UpdateSet};

/// Handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Event categories a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MyPresence,
    Others,
    Storage,
    Connection,
    History,
    Event,
    Error,
}

/// Another user connected to the room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub actor: u32,
    pub info: Option<Json>,
    pub presence: JsonObject,
}

/// What happened to the other users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OthersChange {
    /// The whole list was replaced (after connecting).
    Reset,
    Enter { actor: u32 },
    Leave { actor: u32 },
    Update { actor: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OthersEvent {
    pub change: OthersChange,
    /// Everyone else in the room after the change, ordered by actor.
    pub others: Vec<User>,
}

/// An event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MyPresence(JsonObject),
    Others(OthersEvent),
    Storage(Vec<StorageUpdate>),
    Connection(ConnectionState),
    History { can_undo: bool, can_redo: bool },
    Event { actor: u32, event: Json },
    Error(String),
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::MyPresence(_) => EventKind::MyPresence,
            SessionEvent::Others(_) => EventKind::Others,
            SessionEvent::Storage(_) => EventKind::Storage,
            SessionEvent::Connection(_) => EventKind::Connection,
            SessionEvent::History { .. } => EventKind::History,
            SessionEvent::Event { .. } => EventKind::Event,
            SessionEvent::Error(_) => EventKind::Error,
        }
    }
}

/// A subscriber callback.
pub type Listener = Box<dyn FnMut(&SessionEvent) + Send>;

/// Per-category publish lists.
#[derive(Default)]
pub struct EventHub {
    next_id: u64,
    listeners: Vec<(SubscriptionId, EventKind, Listener)>,
    suspended: Option<Vec<SessionEvent>>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listeners.len())
            .field("suspended", &self.suspended.as_ref().map(Vec::len))
            .finish()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, kind, listener));
        id
    }

    /// Removes a listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn emit(&mut self, event: SessionEvent) {
        if let Some(queue) = &mut self.suspended {
            queue.push(event);
            return;
        }
        self.deliver(&event);
    }

    fn deliver(&mut self, event: &SessionEvent) {
        let kind = event.kind();
        for (_, subscribed, listener) in &mut self.listeners {
            if *subscribed == kind {
                listener(event);
            }
        }
    }

    /// Starts queueing events. Nested suspensions share one queue.
    pub fn suspend(&mut self) {
        if self.suspended.is_none() {
            self.suspended = Some(Vec::new());
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    /// Delivers the queued events, coalesced.
    ///
    /// Storage updates merge into one event; only the last presence, others
    /// and history events are kept.
    pub fn resume(&mut self) {
        let Some(queue) = self.suspended.take() else {
            return;
        };
        for event in coalesce(queue) {
            self.deliver(&event);
        }
    }
}

fn coalesce(queue: Vec<SessionEvent>) -> Vec<SessionEvent> {
    let mut storage: Option<(usize, UpdateSet)> = None;
    let mut out: Vec<SessionEvent> = Vec::with_capacity(queue.len());
    for event in queue {
        match event {
            SessionEvent::Storage(updates) => {
                let (_, set) = storage.get_or_insert_with(|| {
                    out.push(SessionEvent::Storage(Vec::new()));
                    (out.len() - 1, UpdateSet::new())
                });
                for update in updates {
                    set.push(update);
                }
            }
            event @ (SessionEvent::MyPresence(_)
            | SessionEvent::Others(_)
            | SessionEvent::History { .. }) => {
                let kind = event.kind();
                if let Some(previous) = out.iter_mut().find(|queued| queued.kind() == kind) {
                    *previous = event;
                } else {
                    out.push(event);
                }
            }
            event => out.push(event),
        }
    }
    if let Some((slot, set)) = storage {
        out[slot] = SessionEvent::Storage(set.into_vec());
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::crdt::{KeyUpdate, NodeId};

    fn recorder(hub: &mut EventHub, kind: EventKind) -> Arc<Mutex<Vec<SessionEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hub.subscribe(
            kind,
            Box::new(move |event| sink.lock().unwrap().push(event.clone())),
        );
        seen
    }

    #[test]
    fn test_delivers_by_kind() {
        let mut hub = EventHub::new();
        let storage = recorder(&mut hub, EventKind::Storage);
        let connection = recorder(&mut hub, EventKind::Connection);

        hub.emit(SessionEvent::Connection(ConnectionState::Open));
        assert!(storage.lock().unwrap().is_empty());
        assert_eq!(connection.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let mut hub = EventHub::new();
        let id = hub.subscribe(EventKind::Error, Box::new(|_| panic!("unsubscribed")));
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.emit(SessionEvent::Error("boom".to_string()));
    }

    #[test]
    fn test_suspended_events_are_coalesced() {
        let mut hub = EventHub::new();
        let storage = recorder(&mut hub, EventKind::Storage);
        let history = recorder(&mut hub, EventKind::History);

        hub.suspend();
        for key in ["a", "b"] {
            hub.emit(SessionEvent::Storage(vec![StorageUpdate::object_key(
                NodeId::root(),
                key,
                KeyUpdate::Update,
            )]));
            hub.emit(SessionEvent::History {
                can_undo: key == "b",
                can_redo: false,
            });
        }
        assert!(storage.lock().unwrap().is_empty());
        hub.resume();

        let storage = storage.lock().unwrap();
        assert_eq!(storage.len(), 1);
        let SessionEvent::Storage(updates) = &storage[0] else {
            panic!("expected storage event");
        };
        assert_eq!(updates.len(), 1);
        assert_eq!(
            history.lock().unwrap().as_slice(),
            &[SessionEvent::History {
                can_undo: true,
                can_redo: false
            }]
        );
    }
}

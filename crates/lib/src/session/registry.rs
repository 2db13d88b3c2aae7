//! Rooms entered by one process.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::config::SessionConfig;
use super::driver::{RoomHandle, SessionDriver, Transport};
use super::ClientSession;

/// Entry point for applications: keeps one running session per room.
pub struct Client {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    rooms: HashMap<String, RoomHandle>,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        Self {
            transport,
            config: config.normalized(),
            rooms: HashMap::new(),
        }
    }

    /// Returns the session of `room_id`, starting one if needed.
    ///
    /// Must be called inside a tokio runtime.
    pub fn enter(&mut self, room_id: &str) -> RoomHandle {
        if let Some(handle) = self.rooms.get(room_id)
            && !handle.is_closed()
        {
            return handle.clone();
        }
        info!(room = room_id, "Entering room");
        let session = ClientSession::new(room_id, self.config.clone());
        let handle = SessionDriver::start(session, Arc::clone(&self.transport));
        self.rooms.insert(room_id.to_string(), handle.clone());
        handle
    }

    /// Stops the session of `room_id`. Returns false if it was not entered.
    pub async fn leave(&mut self, room_id: &str) -> bool {
        let Some(handle) = self.rooms.remove(room_id) else {
            return false;
        };
        info!(room = room_id, "Leaving room");
        // An already stopped room is left all the same.
        if let Err(err) = handle.shutdown().await {
            warn!(room = room_id, %err, "Room task already stopped");
        }
        true
    }

    pub fn get_room(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).cloned()
    }

    pub fn room_ids(&self) -> impl Iterator<Item = &str> {
        self.rooms.keys().map(String::as_str)
    }
}

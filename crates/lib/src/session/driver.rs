//! Async driver running a [`ClientSession`] against a transport.
//!
//! One task per room owns the session and the socket. It authenticates and
//! connects, flushes the outgoing buffer when the throttle allows, pings the
//! server and tears the socket down when no pong arrives, and reconnects with
//! backoff. Callers talk to the task through a cloneable [`RoomHandle`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::connection::{Backoff, ConnectionState};
use super::errors::SessionError;
use super::events::{EventKind, Listener, SubscriptionId, User};
use super::protocol::{PING, PONG, ServerMessage};
use super::ClientSession;
use crate::Result;
use crate::crdt::{Json, JsonObject, Mutation};

/// Result of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Connection id assigned to this client; prefixes every minted id.
    pub actor: u32,
    pub token: String,
}

/// A frame received from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16 },
}

/// Opens authenticated connections to rooms.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn authenticate(&self, room_id: &str) -> Result<Credentials>;

    async fn connect(
        &self,
        room_id: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn Connection>>;
}

/// An open socket.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    /// The next frame, or `None` once the socket is gone.
    ///
    /// Must be cancel safe: it is polled alongside timers and dropped when
    /// one of them fires first.
    async fn recv(&mut self) -> Option<Frame>;

    async fn close(&mut self);
}

/// Commands accepted by the room task.
enum RoomCommand {
    Mutate {
        mutations: Vec<Mutation>,
        response: oneshot::Sender<Result<()>>,
    },
    UpdatePresence {
        patch: JsonObject,
        add_to_history: bool,
    },
    BroadcastEvent(Json),
    Undo {
        response: oneshot::Sender<Result<()>>,
    },
    Redo {
        response: oneshot::Sender<Result<()>>,
    },
    PauseHistory,
    ResumeHistory {
        response: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        response: oneshot::Sender<Option<Json>>,
    },
    State {
        response: oneshot::Sender<ConnectionState>,
    },
    Others {
        response: oneshot::Sender<Vec<User>>,
    },
    Subscribe {
        kind: EventKind,
        listener: Listener,
        response: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe(SubscriptionId),
    Shutdown,
}

/// Owns a session and its socket; see the module docs.
pub struct SessionDriver {
    session: ClientSession,
    transport: Arc<dyn Transport>,
    commands: mpsc::Receiver<RoomCommand>,
    connection: Option<Box<dyn Connection>>,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
    next_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
}

impl SessionDriver {
    /// Spawns the room task on the current runtime and returns its handle.
    ///
    /// The first connection attempt starts immediately.
    pub fn start(session: ClientSession, transport: Arc<dyn Transport>) -> RoomHandle {
        let (tx, rx) = mpsc::channel(100);
        let room_id: Arc<str> = Arc::from(session.room_id());
        let backoff = Backoff::new(
            &session.config().backoff_delays,
            &session.config().slow_backoff_delays,
        );
        let driver = Self {
            session,
            transport,
            commands: rx,
            connection: None,
            backoff,
            reconnect_at: Some(Instant::now()),
            next_ping: None,
            pong_deadline: None,
        };
        let span = info_span!("room", room = %room_id);
        tokio::spawn(driver.run().instrument(span));
        RoomHandle {
            room_id,
            commands: tx,
        }
    }

    async fn run(mut self) {
        info!("Starting room session");
        loop {
            let flush_at = self.session.next_flush_at();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(RoomCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },

                frame = next_frame(&mut self.connection) => {
                    self.handle_frame(frame).await;
                }

                _ = sleep_until_some(flush_at) => {
                    self.flush().await;
                }

                _ = sleep_until_some(self.next_ping) => {
                    self.ping().await;
                }

                _ = sleep_until_some(self.pong_deadline) => {
                    let timeout_ms = self.session.config().pong_timeout;
                    self.fail(SessionError::PongTimeout { timeout_ms }.into()).await;
                }

                _ = sleep_until_some(self.reconnect_at) => {
                    self.connect().await;
                }
            }
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.session.on_disconnect(ConnectionState::Closed);
        info!("Room session stopped");
    }

    fn handle_command(&mut self, command: RoomCommand) {
        let now = Instant::now();
        match command {
            RoomCommand::Mutate {
                mutations,
                response,
            } => {
                let result = self.session.batch(|session| {
                    mutations
                        .into_iter()
                        .try_for_each(|mutation| session.mutate(mutation, now))
                });
                let _ = response.send(result);
            }
            RoomCommand::UpdatePresence {
                patch,
                add_to_history,
            } => self.session.update_presence(patch, add_to_history, now),
            RoomCommand::BroadcastEvent(event) => self.session.broadcast_event(event, now),
            RoomCommand::Undo { response } => {
                let _ = response.send(self.session.undo(now));
            }
            RoomCommand::Redo { response } => {
                let _ = response.send(self.session.redo(now));
            }
            RoomCommand::PauseHistory => self.session.pause_history(),
            RoomCommand::ResumeHistory { response } => {
                let _ = response.send(self.session.resume_history());
            }
            RoomCommand::Snapshot { response } => {
                let _ = response.send(self.session.root_json());
            }
            RoomCommand::State { response } => {
                let _ = response.send(self.session.state());
            }
            RoomCommand::Others { response } => {
                let _ = response.send(self.session.others());
            }
            RoomCommand::Subscribe {
                kind,
                listener,
                response,
            } => {
                let _ = response.send(self.session.subscribe(kind, listener));
            }
            RoomCommand::Unsubscribe(id) => {
                self.session.unsubscribe(id);
            }
            // Handled by the loop.
            RoomCommand::Shutdown => {}
        }
    }

    async fn connect(&mut self) {
        self.reconnect_at = None;
        let room_id = self.session.room_id().to_string();
        self.session.set_state(ConnectionState::Authenticating);
        let credentials = match self.transport.authenticate(&room_id).await {
            Ok(credentials) => credentials,
            Err(err) => {
                self.schedule_reconnect(&err, ConnectionState::Failed);
                return;
            }
        };
        self.session.on_authenticated(credentials.actor);

        match self.transport.connect(&room_id, &credentials).await {
            Ok(connection) => {
                let now = Instant::now();
                self.connection = Some(connection);
                self.backoff.reset();
                self.next_ping = Some(now + self.session.config().heartbeat_duration());
                self.pong_deadline = None;
                self.session.on_open(now);
            }
            Err(err) => self.schedule_reconnect(&err, ConnectionState::Unavailable),
        }
    }

    fn schedule_reconnect(&mut self, err: &crate::Error, state: ConnectionState) {
        let slow = matches!(err, crate::Error::Session(session_err) if session_err.needs_slow_backoff());
        let delay = self.backoff.next_delay(slow);
        warn!(%err, delay_ms = delay.as_millis() as u64, "Connection lost, retrying");
        self.session.emit_error(err.to_string());
        self.session.on_disconnect(state);
        self.reconnect_at = Some(Instant::now() + delay);
    }

    /// Drops the socket and schedules a reconnect.
    async fn fail(&mut self, err: crate::Error) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.next_ping = None;
        self.pong_deadline = None;
        self.schedule_reconnect(&err, ConnectionState::Unavailable);
    }

    async fn handle_frame(&mut self, frame: Option<Frame>) {
        let text = match frame {
            None => {
                return self
                    .fail(SessionError::ConnectionClosed { code: 1006 }.into())
                    .await;
            }
            Some(Frame::Close { code }) => {
                return self.fail(SessionError::ConnectionClosed { code }.into()).await;
            }
            Some(Frame::Text(text)) => text,
        };
        if text == PONG {
            self.pong_deadline = None;
            return;
        }
        let message = match ServerMessage::from_json(&text) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "Ignoring undecodable server frame");
                self.session.emit_error(
                    SessionError::InvalidMessage {
                        reason: err.to_string(),
                    }
                    .to_string(),
                );
                return;
            }
        };
        if let Err(err) = self.session.handle_message(message, Instant::now()) {
            error!(%err, "Failed to apply server message");
            self.session.emit_error(err.to_string());
        }
    }

    async fn ping(&mut self) {
        let now = Instant::now();
        self.next_ping = Some(now + self.session.config().heartbeat_duration());
        let sent = match self.connection.as_mut() {
            Some(connection) => connection.send(PING.to_string()).await,
            None => return,
        };
        if let Err(err) = sent {
            return self.fail(err).await;
        }
        if self.pong_deadline.is_none() {
            self.pong_deadline = Some(now + self.session.config().pong_timeout_duration());
        }
    }

    async fn flush(&mut self) {
        let messages = self.session.take_outgoing(Instant::now());
        if messages.is_empty() {
            return;
        }
        let mut failure = None;
        if let Some(connection) = self.connection.as_mut() {
            for message in messages {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        error!(%err, "Failed to encode client message");
                        continue;
                    }
                };
                if let Err(err) = connection.send(text).await {
                    failure = Some(err);
                    break;
                }
            }
        }
        match failure {
            Some(err) => self.fail(err).await,
            None => debug!("Flushed outgoing buffer"),
        }
    }
}

async fn next_frame(connection: &mut Option<Box<dyn Connection>>) -> Option<Frame> {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to a running room task.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: Arc<str>,
    commands: mpsc::Sender<RoomCommand>,
}

impl std::fmt::Debug for RoomCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RoomCommand::Mutate { .. } => "Mutate",
            RoomCommand::UpdatePresence { .. } => "UpdatePresence",
            RoomCommand::BroadcastEvent(_) => "BroadcastEvent",
            RoomCommand::Undo { .. } => "Undo",
            RoomCommand::Redo { .. } => "Redo",
            RoomCommand::PauseHistory => "PauseHistory",
            RoomCommand::ResumeHistory { .. } => "ResumeHistory",
            RoomCommand::Snapshot { .. } => "Snapshot",
            RoomCommand::State { .. } => "State",
            RoomCommand::Others { .. } => "Others",
            RoomCommand::Subscribe { .. } => "Subscribe",
            RoomCommand::Unsubscribe(_) => "Unsubscribe",
            RoomCommand::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// True once the room task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn closed(&self) -> crate::Error {
        SessionError::RoomClosed {
            room_id: self.room_id.to_string(),
        }
        .into()
    }

    async fn send(&self, command: RoomCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| self.closed())
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        rx.await.map_err(|_| self.closed())
    }

    pub async fn mutate(&self, mutation: Mutation) -> Result<()> {
        self.batch(vec![mutation]).await
    }

    /// Applies several mutations as one undo step.
    pub async fn batch(&self, mutations: Vec<Mutation>) -> Result<()> {
        self.request(|response| RoomCommand::Mutate {
            mutations,
            response,
        })
        .await?
    }

    pub async fn update_presence(&self, patch: JsonObject, add_to_history: bool) -> Result<()> {
        self.send(RoomCommand::UpdatePresence {
            patch,
            add_to_history,
        })
        .await
    }

    pub async fn broadcast_event(&self, event: Json) -> Result<()> {
        self.send(RoomCommand::BroadcastEvent(event)).await
    }

    pub async fn undo(&self) -> Result<()> {
        self.request(|response| RoomCommand::Undo { response }).await?
    }

    pub async fn redo(&self) -> Result<()> {
        self.request(|response| RoomCommand::Redo { response }).await?
    }

    pub async fn pause_history(&self) -> Result<()> {
        self.send(RoomCommand::PauseHistory).await
    }

    pub async fn resume_history(&self) -> Result<()> {
        self.request(|response| RoomCommand::ResumeHistory { response })
            .await?
    }

    /// JSON view of the storage, `None` until it is loaded.
    pub async fn root_json(&self) -> Result<Option<Json>> {
        self.request(|response| RoomCommand::Snapshot { response })
            .await
    }

    pub async fn connection_state(&self) -> Result<ConnectionState> {
        self.request(|response| RoomCommand::State { response }).await
    }

    pub async fn others(&self) -> Result<Vec<User>> {
        self.request(|response| RoomCommand::Others { response }).await
    }

    pub async fn subscribe(&self, kind: EventKind, listener: Listener) -> Result<SubscriptionId> {
        self.request(|response| RoomCommand::Subscribe {
            kind,
            listener,
            response,
        })
        .await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.send(RoomCommand::Unsubscribe(id)).await
    }

    /// Stops the room task and closes its socket.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(RoomCommand::Shutdown).await
    }
}

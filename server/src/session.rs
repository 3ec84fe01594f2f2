//! Server-side handles for connected clients
//!
//! A [`Session`] is created by the transport when a connection is accepted and
//! handed to the hub, which from then on owns it exclusively. The transport
//! keeps only the receiving end of the outbound queue, so dropping the session
//! inside the hub is what closes the connection's outbound path.

use crate::world::PlayerId;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};

pub type SessionId = String;

/// One serialized message, shared between every session it is fanned out to.
pub type Outbound = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Registered,
    Bound,
    Unregistering,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Backpressure,
    Kicked,
    IdleTimeout,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Backpressure => "evicted: outbound queue full",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::IdleTimeout => "timed out",
            DisconnectReason::Shutdown => "server shutting down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The outbound queue is at capacity; the peer is not keeping up.
    Full,
    /// The writer side has gone away.
    Closed,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    outbound: mpsc::Sender<Outbound>,
    player_id: Option<PlayerId>,
    state: SessionState,
    /// Last time the hub processed an inbound frame for this session
    pub last_seen: Instant,
}

impl Session {
    pub fn new(id: SessionId, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            outbound,
            player_id: None,
            state: SessionState::Connected,
            last_seen: Instant::now(),
        }
    }

    /// Creates a session with a fresh UUID and a bounded outbound queue,
    /// returning the receiving end for the connection's writer.
    pub fn open(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(uuid::Uuid::new_v4().to_string(), tx), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn mark_registered(&mut self) {
        self.state = SessionState::Registered;
    }

    pub(crate) fn bind(&mut self, player_id: PlayerId) {
        self.player_id = Some(player_id);
        self.state = SessionState::Bound;
    }

    /// Leaves the active set; the returned player id (if any) must be removed
    /// from the world by the caller. Dropping the session afterwards closes it.
    pub(crate) fn begin_unregister(&mut self) -> Option<PlayerId> {
        self.state = SessionState::Unregistering;
        self.player_id.take()
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Non-blocking enqueue onto the outbound queue.
    pub fn try_send(&self, payload: Outbound) -> Result<(), DeliveryError> {
        self.outbound.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// True once the connection's writer has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Consumes the session, dropping the only outbound sender.
    pub(crate) fn close(mut self) -> SessionState {
        self.state = SessionState::Closed;
        self.state
    }
}

/// The hub's active session set.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session to the active set. Returns false if the id is already
    /// registered, leaving the existing session untouched.
    pub fn insert(&mut self, mut session: Session) -> bool {
        if self.sessions.contains_key(session.id()) {
            return false;
        }
        session.mark_registered();
        info!("Session {} registered", session.id());
        self.sessions.insert(session.id.clone(), session);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Ids of sessions that have been silent for longer than `timeout`.
    pub fn timed_out(&self, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.is_timed_out(timeout))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Enqueues `payload` on every session except `exclude`, returning the
    /// ids that could not take it. Never blocks.
    pub fn fan_out(
        &self,
        payload: &Outbound,
        exclude: Option<&str>,
    ) -> Vec<(SessionId, DeliveryError)> {
        self.sessions
            .values()
            .filter(|s| Some(s.id()) != exclude)
            .filter_map(|s| {
                s.try_send(Arc::clone(payload))
                    .err()
                    .map(|e| (s.id.clone(), e))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Session> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }
}

//! Bounded set of client sessions.
//!
//! Sessions live in a `BTreeMap` keyed by [`SessionId`]. Ids only grow, so
//! iteration follows accept order and removing closed sessions never
//! disturbs the position of the others.

use std::collections::BTreeMap;
use std::fmt;

use super::session::{ClientSession, Message, SessionPhase, SessionSettings};
use super::transport::Transport;
use crate::domain::SessionId;

/// Observer called with every application message before it is routed.
pub type MessageTap = Box<dyn FnMut(SessionId, &Message) + Send>;

/// Owns every live [`ClientSession`].
pub struct SessionRegistry<T> {
    sessions: BTreeMap<SessionId, ClientSession<T>>,
    next_id: Option<SessionId>,
    max_clients: usize,
    settings: SessionSettings,
    on_message: Option<MessageTap>,
}

impl<T: fmt::Debug> fmt::Debug for SessionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions)
            .field("next_id", &self.next_id)
            .field("max_clients", &self.max_clients)
            .field("settings", &self.settings)
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

impl<T: Transport> SessionRegistry<T> {
    /// Creates an empty registry holding at most `max_clients` sessions.
    #[must_use]
    pub fn new(max_clients: usize, settings: SessionSettings) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_id: Some(SessionId::new(1)),
            max_clients,
            settings,
            on_message: None,
        }
    }

    /// Registers the message observer, replacing any previous one.
    pub fn on_message(&mut self, tap: impl FnMut(SessionId, &Message) + Send + 'static) {
        self.on_message = Some(Box::new(tap));
    }

    /// Adds a session for `transport`, or drops the connection when full.
    pub fn accept_if_capacity(&mut self, transport: T) -> Option<SessionId> {
        if self.sessions.len() >= self.max_clients {
            tracing::warn!(
                peer = ?transport.peer(),
                max_clients = self.max_clients,
                "rejecting connection, session limit reached"
            );
            return None;
        }
        let Some(id) = self.next_id else {
            tracing::warn!(peer = ?transport.peer(), "rejecting connection, session ids exhausted");
            return None;
        };
        self.next_id = id.next();
        let session = ClientSession::new(id, transport, self.settings);
        tracing::debug!(session = %id, peer = ?session.peer(), "connection accepted");
        self.sessions.insert(id, session);
        Some(id)
    }

    /// Removes every `Closed` session and returns how many went away.
    pub fn sweep_closed(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.phase() != SessionPhase::Closed);
        before - self.sessions.len()
    }

    /// Polls every session once, in id order, and collects their messages.
    pub async fn poll_all(&mut self) -> Vec<(SessionId, Message)> {
        let mut inbound = Vec::new();
        for (id, session) in &mut self.sessions {
            for message in session.poll().await {
                if let Some(tap) = self.on_message.as_mut() {
                    tap(*id, &message);
                }
                inbound.push((*id, message));
            }
        }
        inbound
    }

    /// Sends a Text frame to every open session. Returns the number of
    /// sessions that received it.
    pub async fn broadcast_text(&mut self, text: &str) -> usize {
        let mut delivered = 0;
        for session in self.sessions.values_mut().filter(|s| s.is_open()) {
            match session.send_text(text).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::debug!(session = %session.id(), error = %err, "broadcast send failed");
                }
            }
        }
        delivered
    }

    /// Sends a Binary frame to every open session. Returns the number of
    /// sessions that received it.
    pub async fn broadcast_binary(&mut self, data: &[u8]) -> usize {
        let mut delivered = 0;
        for session in self.sessions.values_mut().filter(|s| s.is_open()) {
            match session.send_binary(data).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::debug!(session = %session.id(), error = %err, "broadcast send failed");
                }
            }
        }
        delivered
    }

    /// Sends a Text frame to one session.
    pub async fn send_text(&mut self, id: SessionId, text: &str) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => session.send_text(text).await.is_ok(),
            None => false,
        }
    }

    /// Closes every session with `code`.
    pub async fn close_all(&mut self, code: u16) {
        for session in self.sessions.values_mut() {
            session.close(code).await;
        }
    }

    /// Borrows a session.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<&ClientSession<T>> {
        self.sessions.get(&id)
    }

    /// Number of sessions, including pending and closed ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry holds no session.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of `Open` sessions.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_open()).count()
    }
}

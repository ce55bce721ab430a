// Session registry for connected participants

use crate::relay::error::RelayError;
use crate::relay::message::OutboundFrame;
use crate::relay::policy::Role;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque identifier assigned to a session at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Write side of a connection: a queue drained by the connection's writer task
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self { tx }
    }

    /// Queue a frame for the connection; never blocks
    pub fn send(&self, frame: OutboundFrame) -> Result<(), mpsc::error::SendError<OutboundFrame>> {
        self.tx.send(frame)
    }
}

/// A registered participant connection
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub role: Role,
    pub mission_id: String,
    connection: ConnectionHandle,
}

impl Session {
    /// Push a frame to this session, failing soft if it has gone away
    pub fn deliver(&self, frame: OutboundFrame) -> Result<(), RelayError> {
        self.connection
            .send(frame)
            .map_err(|_| RelayError::Delivery(self.id.to_string()))
    }
}

/// In-memory mapping of session id to session.
///
/// Owned by a single broker; it is never shared between tasks.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new session and return its freshly generated id
    pub fn register(
        &mut self,
        connection: ConnectionHandle,
        role: Role,
        mission_id: impl Into<String>,
    ) -> SessionId {
        let id = SessionId::generate();
        let session = Session {
            id,
            role,
            mission_id: mission_id.into(),
            connection,
        };

        tracing::info!(
            "Session {} registered as {} in mission {}",
            id,
            role,
            session.mission_id
        );

        self.sessions.insert(id, session);
        id
    }

    /// Remove a session; returns false if it was already gone
    pub fn unregister(&mut self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some(session) => {
                tracing::info!(
                    "Session {} ({}) left mission {}",
                    id,
                    session.role,
                    session.mission_id
                );
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Sessions currently registered under `mission_id`
    pub fn sessions_for_mission<'a>(
        &'a self,
        mission_id: &'a str,
    ) -> impl Iterator<Item = &'a Session> + 'a {
        self.sessions
            .values()
            .filter(move |s| s.mission_id == mission_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of distinct missions with at least one session
    pub fn mission_count(&self) -> usize {
        self.sessions
            .values()
            .map(|s| s.mission_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

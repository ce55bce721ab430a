// Single-writer broker that owns the session registry and router

use crate::relay::error::RelayError;
use crate::relay::message::{HistoryEntry, OutboundFrame};
use crate::relay::policy::Role;
use crate::relay::registry::{ConnectionHandle, SessionId, SessionRegistry};
use crate::relay::router::{DeliveryReport, Router};
use crate::relay::storage::HistoryStore;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T, RelayError>>;

/// Commands processed, one at a time, by the broker
#[derive(Debug)]
pub enum BrokerCommand {
    /// A connection was opened and validated
    Register {
        role: Role,
        mission_id: String,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        reply: oneshot::Sender<SessionId>,
    },
    /// A connection closed
    Unregister { session_id: SessionId },
    /// A connected session sent a message
    Inbound {
        session_id: SessionId,
        message: Value,
        reply: Reply<Option<DeliveryReport>>,
    },
    /// Out-of-band submission with no session context
    Submit {
        mission_id: String,
        sender_role: Role,
        message: Value,
        reply: Reply<DeliveryReport>,
    },
    /// Read back a mission's history
    History {
        mission_id: String,
        reply: Reply<Vec<HistoryEntry>>,
    },
    /// Snapshot of registry counters
    Stats { reply: oneshot::Sender<BrokerStats> },
    /// Shutdown the broker
    Shutdown,
}

/// Registry counters reported by the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub sessions: usize,
    pub missions: usize,
}

/// Handle for communicating with the broker
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<BrokerCommand>,
}

impl BrokerHandle {
    /// Send a command to the broker
    pub fn send_command(&self, cmd: BrokerCommand) -> Result<(), RelayError> {
        self.tx.send(cmd).map_err(|_| RelayError::BrokerUnavailable)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BrokerCommand,
    ) -> Result<T, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(build(reply))?;
        rx.await.map_err(|_| RelayError::BrokerUnavailable)
    }

    /// Register a connection's outbound queue under a role and mission
    pub async fn register(
        &self,
        role: Role,
        mission_id: String,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Result<SessionId, RelayError> {
        self.request(|reply| BrokerCommand::Register {
            role,
            mission_id,
            outbound,
            reply,
        })
        .await
    }

    /// Remove a session; a stopped broker has nothing left to remove
    pub fn unregister(&self, session_id: SessionId) {
        let _ = self.send_command(BrokerCommand::Unregister { session_id });
    }

    /// Route a message on behalf of a connected session.
    ///
    /// Resolves once the history append has completed. `Ok(None)` means the
    /// session was no longer registered and nothing was routed.
    pub async fn inbound(
        &self,
        session_id: SessionId,
        message: Value,
    ) -> Result<Option<DeliveryReport>, RelayError> {
        self.request(|reply| BrokerCommand::Inbound {
            session_id,
            message,
            reply,
        })
        .await?
    }

    /// Route an out-of-band submission
    pub async fn submit(
        &self,
        mission_id: String,
        sender_role: Role,
        message: Value,
    ) -> Result<DeliveryReport, RelayError> {
        self.request(|reply| BrokerCommand::Submit {
            mission_id,
            sender_role,
            message,
            reply,
        })
        .await?
    }

    pub async fn history(&self, mission_id: String) -> Result<Vec<HistoryEntry>, RelayError> {
        self.request(|reply| BrokerCommand::History { mission_id, reply })
            .await?
    }

    pub async fn stats(&self) -> Result<BrokerStats, RelayError> {
        self.request(|reply| BrokerCommand::Stats { reply }).await
    }

    pub fn shutdown(&self) -> Result<(), RelayError> {
        self.send_command(BrokerCommand::Shutdown)
    }
}

/// Owns all mutable relay state and serializes every operation on it
pub struct MessageBroker {
    registry: SessionRegistry,
    router: Router,
    rx: mpsc::UnboundedReceiver<BrokerCommand>,
}

impl MessageBroker {
    /// Create a new message broker
    pub fn new(store: Arc<dyn HistoryStore>) -> (Self, BrokerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();

        let broker = Self {
            registry: SessionRegistry::new(),
            router: Router::new(store),
            rx,
        };

        (broker, BrokerHandle { tx })
    }

    /// Spawn the broker on the current runtime and return its handle
    pub fn spawn(store: Arc<dyn HistoryStore>) -> BrokerHandle {
        let (broker, handle) = Self::new(store);
        tokio::spawn(broker.run());
        handle
    }

    /// Run the broker event loop
    pub async fn run(mut self) {
        tracing::info!("Message broker started");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                BrokerCommand::Register {
                    role,
                    mission_id,
                    outbound,
                    reply,
                } => {
                    let id = self
                        .registry
                        .register(ConnectionHandle::new(outbound), role, mission_id);
                    if reply.send(id).is_err() {
                        // Registrant went away before learning its id
                        self.registry.unregister(id);
                    }
                }
                BrokerCommand::Unregister { session_id } => {
                    self.registry.unregister(session_id);
                }
                BrokerCommand::Inbound {
                    session_id,
                    message,
                    reply,
                } => {
                    let result = self.handle_inbound(session_id, message);
                    let _ = reply.send(result);
                }
                BrokerCommand::Submit {
                    mission_id,
                    sender_role,
                    message,
                    reply,
                } => {
                    let result = self.route(&mission_id, sender_role, message);
                    let _ = reply.send(result);
                }
                BrokerCommand::History { mission_id, reply } => {
                    let result = self
                        .router
                        .store()
                        .history(&mission_id)
                        .map_err(RelayError::from);
                    let _ = reply.send(result);
                }
                BrokerCommand::Stats { reply } => {
                    let _ = reply.send(BrokerStats {
                        sessions: self.registry.len(),
                        missions: self.registry.mission_count(),
                    });
                }
                BrokerCommand::Shutdown => {
                    tracing::info!("Broker shutting down");
                    break;
                }
            }
        }

        tracing::info!("Message broker stopped");
    }

    fn handle_inbound(
        &mut self,
        session_id: SessionId,
        message: Value,
    ) -> Result<Option<DeliveryReport>, RelayError> {
        // Role and mission come from the registry, never from the frame
        let Some(session) = self.registry.get(session_id) else {
            tracing::debug!("Dropping message from unregistered session {}", session_id);
            return Ok(None);
        };

        let mission_id = session.mission_id.clone();
        let role = session.role;

        self.route(&mission_id, role, message).map(Some)
    }

    fn route(
        &mut self,
        mission_id: &str,
        sender_role: Role,
        message: Value,
    ) -> Result<DeliveryReport, RelayError> {
        let outcome = self
            .router
            .route(&self.registry, mission_id, sender_role, message);

        // Closed queues belong to connections that are already going away
        for id in &outcome.deliveries.failed {
            if self.registry.unregister(*id) {
                tracing::info!("Removed failed session {}", id);
            }
        }

        outcome.into_result()
    }
}

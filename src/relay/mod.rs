// Mission relay: role-policed message routing between mission participants
//
// Connections assert a role (ICC, CLIENT or OPERATOR) and a mission id. A
// single broker task owns the session registry, routes each message to the
// sessions the role policy allows, and appends it to the mission's history.

pub mod error;
pub mod policy;
pub mod identity;
pub mod message;
pub mod storage;
pub mod registry;
pub mod router;
pub mod broker;
pub mod connection;
pub mod config;
pub mod server;
pub mod cli;
pub mod commands;

pub use error::{RelayError, StoreError};
pub use policy::{allowed, Role};
pub use identity::{AssertedRoleResolver, Identity, RoleClaim, RoleResolver};
pub use message::{Envelope, HistoryEntry, OutboundFrame};
pub use storage::{HistoryStore, SqliteHistoryStore};
pub use registry::{SessionId, SessionRegistry};
pub use router::{DeliveryReport, Router};
pub use broker::{BrokerHandle, MessageBroker};
pub use config::RelayConfig;
pub use server::RelayServer;
pub use cli::{RelayCli, RelayCommand};
pub use commands::execute_command;

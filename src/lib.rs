//! mission-relay - Real-time message relay for mission chat
//!
//! This library routes messages between ICC, client and operator
//! participants of a mission, enforcing which roles may reach each other,
//! and records every routed message in a durable per-mission history.

pub mod relay;

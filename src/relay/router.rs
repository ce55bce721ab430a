// Mission-scoped message routing with role policy and persistence

use crate::relay::error::{RelayError, StoreError};
use crate::relay::message::{Envelope, HistoryEntry, MonotonicClock, OutboundFrame};
use crate::relay::policy::{allowed, Role};
use crate::relay::registry::{SessionId, SessionRegistry};
use crate::relay::storage::HistoryStore;
use serde_json::Value;
use std::sync::Arc;

/// Per-recipient results of one route call
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<SessionId>,
    pub failed: Vec<SessionId>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Result of a route call: best-effort deliveries plus the persistence attempt
#[derive(Debug)]
pub struct RouteOutcome {
    pub deliveries: DeliveryReport,
    pub timestamp: u64,
    pub persisted: Result<(), StoreError>,
}

impl RouteOutcome {
    /// Collapse into a result; a failed history append fails the whole call
    pub fn into_result(self) -> Result<DeliveryReport, RelayError> {
        self.persisted?;
        Ok(self.deliveries)
    }
}

/// Delivers messages to eligible sessions and records them in history
pub struct Router {
    store: Arc<dyn HistoryStore>,
    clock: MonotonicClock,
}

impl Router {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            clock: MonotonicClock::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Route `message` from `sender_role` to every session in `mission_id`
    /// the policy permits, then append it to the mission history.
    pub fn route(
        &mut self,
        registry: &SessionRegistry,
        mission_id: &str,
        sender_role: Role,
        message: Value,
    ) -> RouteOutcome {
        let timestamp = self.clock.now_millis();
        let mut deliveries = DeliveryReport::default();

        let envelope = Envelope {
            from: sender_role,
            message,
            timestamp,
        };

        for session in registry.sessions_for_mission(mission_id) {
            if !allowed(sender_role, session.role) {
                continue;
            }

            match session.deliver(OutboundFrame::Delivery(envelope.clone())) {
                Ok(()) => deliveries.delivered.push(session.id),
                Err(e) => {
                    tracing::warn!("{}", e);
                    deliveries.failed.push(session.id);
                }
            }
        }

        tracing::debug!(
            "Mission {}: {} message delivered to {} of {} eligible sessions",
            mission_id,
            sender_role,
            deliveries.delivered.len(),
            deliveries.attempted()
        );

        let entry = HistoryEntry {
            sender_role,
            message: envelope.message,
            timestamp,
        };

        let persisted = self.store.append(mission_id, &entry);
        if let Err(e) = &persisted {
            tracing::error!("Failed to persist message for mission {}: {}", mission_id, e);
        }

        RouteOutcome {
            deliveries,
            timestamp,
            persisted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::registry::ConnectionHandle;
    use crate::relay::storage::SqliteHistoryStore;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc;

    type Inbox = mpsc::UnboundedReceiver<OutboundFrame>;

    /// Store whose writes always fail
    struct FailingStore;

    impl HistoryStore for FailingStore {
        fn append(&self, _mission_id: &str, _entry: &HistoryEntry) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("read-only volume")))
        }

        fn history(&self, _mission_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn setup() -> (TempDir, Arc<SqliteHistoryStore>, Router) {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteHistoryStore::new(dir.path()).unwrap());
        let router = Router::new(store.clone());
        (dir, store, router)
    }

    fn join(registry: &mut SessionRegistry, role: Role, mission: &str) -> (SessionId, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.register(ConnectionHandle::new(tx), role, mission), rx)
    }

    fn drain(inbox: &mut Inbox) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = inbox.try_recv() {
            match frame {
                OutboundFrame::Delivery(envelope) => out.push(envelope),
                OutboundFrame::Error(notice) => panic!("unexpected error frame: {:?}", notice),
            }
        }
        out
    }

    #[test]
    fn test_hub_routing_within_mission() {
        let (_dir, _store, mut router) = setup();
        let mut registry = SessionRegistry::new();

        let (icc, mut icc_inbox) = join(&mut registry, Role::Icc, "m1");
        let (client, mut client_inbox) = join(&mut registry, Role::Client, "m1");
        let (operator, mut operator_inbox) = join(&mut registry, Role::Operator, "m1");

        let report = router
            .route(&registry, "m1", Role::Icc, json!("proceed"))
            .into_result()
            .unwrap();

        assert_eq!(report.failed, Vec::<SessionId>::new());
        assert_eq!(report.delivered.len(), 2);
        assert!(report.delivered.contains(&client));
        assert!(report.delivered.contains(&operator));
        assert!(drain(&mut icc_inbox).is_empty());
        assert_eq!(drain(&mut client_inbox)[0].from, Role::Icc);
        assert_eq!(drain(&mut operator_inbox)[0].message, json!("proceed"));

        let report = router
            .route(&registry, "m1", Role::Client, json!("need support"))
            .into_result()
            .unwrap();

        assert_eq!(report.delivered, vec![icc]);
        let received = drain(&mut icc_inbox);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].from, Role::Client);
        assert!(drain(&mut operator_inbox).is_empty());
        assert!(drain(&mut client_inbox).is_empty());
    }

    #[test]
    fn test_other_missions_not_reached() {
        let (_dir, store, mut router) = setup();
        let mut registry = SessionRegistry::new();

        let (_icc, _icc_inbox) = join(&mut registry, Role::Icc, "m1");
        let (_client, mut other_inbox) = join(&mut registry, Role::Client, "m2");

        let report = router
            .route(&registry, "m1", Role::Icc, json!("m1 only"))
            .into_result()
            .unwrap();

        assert_eq!(report.attempted(), 0);
        assert!(drain(&mut other_inbox).is_empty());
        // Zero recipients still records the message
        assert_eq!(store.history("m1").unwrap().len(), 1);
        assert!(store.history("m2").unwrap().is_empty());
    }

    #[test]
    fn test_history_records_calls_in_order() {
        let (_dir, store, mut router) = setup();
        let registry = SessionRegistry::new();

        let roles = [Role::Icc, Role::Client, Role::Operator, Role::Icc, Role::Client];
        for (i, role) in roles.iter().enumerate() {
            router
                .route(&registry, "m1", *role, json!({ "seq": i }))
                .into_result()
                .unwrap();
        }

        let history = store.history("m1").unwrap();
        assert_eq!(history.len(), roles.len());
        for (i, entry) in history.iter().enumerate() {
            assert_eq!(entry.sender_role, roles[i]);
            assert_eq!(entry.message, json!({ "seq": i }));
        }
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(store.history("m2").unwrap().is_empty());
    }

    #[test]
    fn test_failed_delivery_is_isolated() {
        let (_dir, store, mut router) = setup();
        let mut registry = SessionRegistry::new();

        let (gone, gone_inbox) = join(&mut registry, Role::Client, "m1");
        let (live, mut live_inbox) = join(&mut registry, Role::Operator, "m1");
        drop(gone_inbox);

        let report = router
            .route(&registry, "m1", Role::Icc, json!("status report"))
            .into_result()
            .unwrap();

        assert_eq!(report.failed, vec![gone]);
        assert_eq!(report.delivered, vec![live]);
        assert_eq!(drain(&mut live_inbox).len(), 1);
        assert_eq!(store.history("m1").unwrap().len(), 1);
    }

    #[test]
    fn test_persistence_failure_surfaces_after_delivery() {
        let mut router = Router::new(Arc::new(FailingStore));
        let mut registry = SessionRegistry::new();
        let (_client, mut client_inbox) = join(&mut registry, Role::Client, "m1");

        let outcome = router.route(&registry, "m1", Role::Icc, json!("still delivered"));
        assert_eq!(outcome.deliveries.delivered.len(), 1);

        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err, RelayError::Persistence(_)));
        assert_eq!(drain(&mut client_inbox).len(), 1);
    }

    #[test]
    fn test_envelope_and_history_share_timestamp() {
        let (_dir, store, mut router) = setup();
        let mut registry = SessionRegistry::new();
        let (_icc, mut icc_inbox) = join(&mut registry, Role::Icc, "m1");

        let outcome = router.route(&registry, "m1", Role::Operator, json!(42));
        let timestamp = outcome.timestamp;
        outcome.into_result().unwrap();

        assert_eq!(drain(&mut icc_inbox)[0].timestamp, timestamp);
        assert_eq!(store.history("m1").unwrap()[0].timestamp, timestamp);
    }
}

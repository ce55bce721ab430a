// Connection lifecycle: registration, inbound frame dispatch and teardown

use crate::relay::broker::BrokerHandle;
use crate::relay::error::RelayError;
use crate::relay::identity::Identity;
use crate::relay::message::{ErrorNotice, InboundFrame, OutboundFrame};
use crate::relay::registry::SessionId;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

/// Serve one accepted WebSocket connection until it closes.
///
/// The session is registered with the broker for the lifetime of the
/// connection and always unregistered on the way out.
pub async fn serve_connection<S>(
    ws: WebSocketStream<S>,
    broker: BrokerHandle,
    identity: Identity,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let session_id = broker
        .register(identity.role, identity.mission_id.clone(), outgoing_tx.clone())
        .await?;

    let (mut ws_tx, mut ws_rx) = ws.split();

    // Spawn task to handle outgoing frames
    let write_task = tokio::spawn(async move {
        while let Some(frame) = outgoing_rx.recv().await {
            let text = match frame.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode outbound frame: {}", e);
                    continue;
                }
            };

            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }

        let _ = ws_tx.close().await;
    });

    // Handle incoming frames
    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    reject_frame(session_id, &outgoing_tx);
                    continue;
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("Error reading from session {}: {}", session_id, e);
                break;
            }
        };

        handle_frame(session_id, &text, &broker, &outgoing_tx).await;
    }

    broker.unregister(session_id);
    write_task.abort();

    Ok(())
}

/// Decode one text frame and route it, or answer the sender with an error notice
async fn handle_frame(
    session_id: SessionId,
    text: &str,
    broker: &BrokerHandle,
    outgoing_tx: &mpsc::UnboundedSender<OutboundFrame>,
) {
    let frame = match InboundFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!("Undecodable frame from session {}: {:?}", session_id, e);
            reject_frame(session_id, outgoing_tx);
            return;
        }
    };

    if let Err(e) = broker.inbound(session_id, frame.message).await {
        tracing::error!("Message from session {} not recorded: {}", session_id, e);
    }
}

fn reject_frame(session_id: SessionId, outgoing_tx: &mpsc::UnboundedSender<OutboundFrame>) {
    tracing::warn!("Rejected malformed frame from session {}", session_id);
    let _ = outgoing_tx.send(OutboundFrame::Error(ErrorNotice::invalid_format()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::broker::MessageBroker;
    use crate::relay::message::Envelope;
    use crate::relay::policy::Role;
    use crate::relay::storage::SqliteHistoryStore;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role as WsRole;

    async fn open(broker: &BrokerHandle, role: Role, mission: &str) -> WebSocketStream<DuplexStream> {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, WsRole::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, WsRole::Client, None).await;

        let identity = Identity {
            role,
            mission_id: mission.to_string(),
        };
        tokio::spawn(serve_connection(server, broker.clone(), identity));
        client
    }

    async fn wait_for_sessions(broker: &BrokerHandle, expected: usize) {
        for _ in 0..100 {
            if broker.stats().await.unwrap().sessions == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} sessions", expected);
    }

    async fn next_text(ws: &mut WebSocketStream<DuplexStream>) -> String {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .unwrap();
        msg.into_text().unwrap()
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_single_error_reply() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteHistoryStore::new(dir.path()).unwrap());
        let broker = MessageBroker::spawn(store);

        let mut client = open(&broker, Role::Client, "m1").await;
        let mut icc = open(&broker, Role::Icc, "m1").await;
        wait_for_sessions(&broker, 2).await;

        client.send(WsMessage::Text("{not json".into())).await.unwrap();
        assert_eq!(next_text(&mut client).await, r#"{"error":"Invalid message format"}"#);

        // Connection stays usable after the error
        client
            .send(WsMessage::Text(r#"{"message":"after error"}"#.into()))
            .await
            .unwrap();
        let envelope: Envelope = serde_json::from_str(&next_text(&mut icc).await).unwrap();
        assert_eq!(envelope.message, json!("after error"));

        // Only the valid frame was recorded, and the ICC saw nothing else
        assert_eq!(broker.history("m1".into()).await.unwrap().len(), 1);
        let extra = tokio::time::timeout(Duration::from_millis(100), icc.next()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn test_frame_cannot_spoof_role_or_mission() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteHistoryStore::new(dir.path()).unwrap());
        let broker = MessageBroker::spawn(store);

        let mut operator = open(&broker, Role::Operator, "m1").await;
        let mut icc = open(&broker, Role::Icc, "m1").await;
        wait_for_sessions(&broker, 2).await;

        let spoof = json!({"message": "hi", "from": "ICC", "role": "ICC", "missionId": "m2"});
        operator
            .send(WsMessage::Text(spoof.to_string()))
            .await
            .unwrap();

        let envelope: Envelope = serde_json::from_str(&next_text(&mut icc).await).unwrap();
        assert_eq!(envelope.from, Role::Operator);

        let history = broker.history("m1".into()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sender_role, Role::Operator);
        assert!(broker.history("m2".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_unregisters_session() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteHistoryStore::new(dir.path()).unwrap());
        let broker = MessageBroker::spawn(store);

        let mut client = open(&broker, Role::Client, "m1").await;
        wait_for_sessions(&broker, 1).await;

        client.close(None).await.unwrap();
        wait_for_sessions(&broker, 0).await;
    }
}

// HTTP front door: WebSocket upgrades, out-of-band submission and history

use crate::relay::broker::{BrokerHandle, MessageBroker};
use crate::relay::config::RelayConfig;
use crate::relay::connection::serve_connection;
use crate::relay::error::RelayError;
use crate::relay::identity::{AssertedRoleResolver, RoleClaim, RoleResolver};
use crate::relay::message::{invalid_payload, SubmitAck, SubmitRequest};
use crate::relay::router::DeliveryReport;
use crate::relay::storage::HistoryStore;
use anyhow::{Context, Result};
use hyper::header::{
    HeaderValue, CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE,
};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode, Uri};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role as WsRole;
use tokio_tungstenite::WebSocketStream;

/// Header carrying the caller-asserted role on connection requests
pub const ROLE_HEADER: &str = "x-role";

/// Query parameter carrying the mission id
pub const MISSION_PARAM: &str = "missionId";

/// Shared state handed to every request
pub struct RelayState {
    broker: BrokerHandle,
    resolver: Arc<dyn RoleResolver>,
}

impl RelayState {
    pub fn new(broker: BrokerHandle, resolver: Arc<dyn RoleResolver>) -> Self {
        Self { broker, resolver }
    }
}

/// A running relay: broker actor plus HTTP listener
pub struct RelayServer {
    local_addr: SocketAddr,
    broker: BrokerHandle,
    shutdown_tx: mpsc::UnboundedSender<()>,
}

impl RelayServer {
    /// Start a relay that trusts asserted roles
    pub async fn start(config: &RelayConfig, store: Arc<dyn HistoryStore>) -> Result<Self> {
        Self::start_with_resolver(config, store, Arc::new(AssertedRoleResolver)).await
    }

    /// Start a relay with a custom role resolver
    pub async fn start_with_resolver(
        config: &RelayConfig,
        store: Arc<dyn HistoryStore>,
        resolver: Arc<dyn RoleResolver>,
    ) -> Result<Self> {
        let broker = MessageBroker::spawn(store);
        let state = Arc::new(RelayState::new(broker.clone(), resolver));

        let make_svc = make_service_fn(move |_conn: &AddrStream| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle_request(req, state.clone())))
            }
        });

        let server = Server::try_bind(&config.listen_addr)
            .with_context(|| format!("Failed to bind {}", config.listen_addr))?
            .serve(make_svc);

        let local_addr = server.local_addr();
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();

        let graceful = server.with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        });

        tokio::spawn(async move {
            if let Err(e) = graceful.await {
                tracing::error!("HTTP server error: {}", e);
            }
            tracing::info!("Listener shut down");
        });

        tracing::info!("Listening on {}", local_addr);

        Ok(Self {
            local_addr,
            broker,
            shutdown_tx,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broker(&self) -> &BrokerHandle {
        &self.broker
    }

    /// Shutdown the listener and the broker
    pub fn shutdown(&self) -> Result<()> {
        self.broker
            .shutdown()
            .context("Failed to send shutdown command")?;

        self.shutdown_tx
            .send(())
            .context("Failed to send listener shutdown")?;

        Ok(())
    }
}

/// Dispatch one HTTP request
pub async fn handle_request(
    req: Request<Body>,
    state: Arc<RelayState>,
) -> Result<Response<Body>, Infallible> {
    if is_websocket_upgrade(&req) {
        return Ok(accept_websocket(req, &state));
    }

    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/send") => handle_send(req, &state).await,
        (&Method::GET, "/history") => handle_history(req.uri(), &state).await,
        (&Method::GET, "/status") => match state.broker.stats().await {
            Ok(stats) => json_response(StatusCode::OK, &stats),
            Err(e) => error_response(&e),
        },
        (&Method::GET, "/") => text_response(StatusCode::OK, "Mission relay running"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

fn is_websocket_upgrade(req: &Request<Body>) -> bool {
    req.headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Validate the connection request, answer 101 and hand the socket to the
/// lifecycle manager once hyper completes the upgrade
fn accept_websocket(req: Request<Body>, state: &RelayState) -> Response<Body> {
    let claim = RoleClaim::new(
        req.headers()
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        query_param(req.uri(), MISSION_PARAM),
    );

    let identity = match state.resolver.resolve(&claim) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("Rejected connection: {}", e);
            return error_response(&e);
        }
    };

    let accept = match req.headers().get(SEC_WEBSOCKET_KEY) {
        Some(key) => derive_accept_key(key.as_bytes()),
        None => return text_response(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key"),
    };

    let Ok(accept) = HeaderValue::from_str(&accept) else {
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
    };

    tracing::info!(
        "Accepting {} connection for mission {}",
        identity.role,
        identity.mission_id
    );

    let broker = state.broker.clone();
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(upgraded, WsRole::Server, None).await;
                if let Err(e) = serve_connection(ws, broker, identity).await {
                    tracing::warn!("Connection ended with error: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("WebSocket upgrade failed: {}", e);
            }
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    response
}

async fn handle_send(req: Request<Body>, state: &RelayState) -> Response<Body> {
    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to read submission body: {}", e);
            return error_response(&invalid_payload());
        }
    };

    match submit(&bytes, state).await {
        Ok(report) => {
            tracing::debug!(
                "Submission delivered to {} sessions",
                report.delivered.len()
            );
            json_response(StatusCode::OK, &SubmitAck::sent())
        }
        Err(e) => error_response(&e),
    }
}

async fn submit(bytes: &[u8], state: &RelayState) -> Result<DeliveryReport, RelayError> {
    let mut request = SubmitRequest::from_bytes(bytes)?;
    let identity = state
        .resolver
        .resolve(&request.claim())
        .map_err(|_| invalid_payload())?;
    let message = request.take_message()?;

    state
        .broker
        .submit(identity.mission_id, identity.role, message)
        .await
}

async fn handle_history(uri: &Uri, state: &RelayState) -> Response<Body> {
    let Some(mission_id) = query_param(uri, MISSION_PARAM).filter(|m| !m.is_empty()) else {
        return text_response(StatusCode::BAD_REQUEST, "Missing missionId");
    };

    match state.broker.history(mission_id).await {
        Ok(history) => json_response(StatusCode::OK, &history),
        Err(e) => error_response(&e),
    }
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn error_response(error: &RelayError) -> Response<Body> {
    if error.is_client_error() {
        text_response(StatusCode::BAD_REQUEST, &error.to_string())
    } else {
        tracing::error!("Request failed: {}", error);
        text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}

fn text_response(status: StatusCode, body: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(json) => {
            let mut response = Response::new(Body::from(json));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!("Failed to encode response: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

//! WebSocket transport server using Axum.
//!
//! Resolves every upgrade request against the service registry, then runs
//! three pieces per connection: the read loop (owns the `ConnectionState`
//! and feeds it frames), a writer task, and a handler task draining the
//! dispatch stream.

use std::error::Error as _;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use bytes::Bytes;
use futures_util::{
    SinkExt, Stream, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, error::CapacityError};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use wsd_dispatch::{ConnectionState, FrameOutcome, ServiceDescriptor, ServiceRegistry};
use wsd_protocol::{
    CloseCode, DispatchError, DispatchMode, DispatchResult, Frame, FrameKind, InboundMessage,
    OutboundMessage,
};

use crate::endpoint::{ConnectionHandle, Endpoint, Session};

/// Application side of the transport: receives each logical message of a
/// connection, in order, one at a time.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one message. A returned message is sent back to the peer.
    fn on_message(
        &self,
        session: &Session,
        message: InboundMessage,
    ) -> impl Future<Output = Option<OutboundMessage>> + Send;

    fn on_open(&self, _session: &Session) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_close(
        &self,
        _session: &Session,
        _code: Option<CloseCode>,
        _reason: &str,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Called before accepting an upgrade, only for services that declare an
    /// `onUpgrade` remote function. `Err` rejects the upgrade with 403.
    fn on_upgrade(
        &self,
        _service: &ServiceDescriptor,
        _request: &UpgradeRequest,
    ) -> impl Future<Output = Result<(), String>> + Send {
        async { Ok(()) }
    }
}

/// The parts of an upgrade request an upgrade hook can inspect.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Subprotocols offered by the client, in the client's order
    pub subprotocols: Vec<String>,
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Enable permissive CORS on the HTTP routes
    pub enable_cors: bool,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Log every frame at info level
    pub verbose_logging: bool,
    /// Cap on a reassembled message (tungstenite's default when `None`)
    pub max_message_size: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 7070,
            hostname: "127.0.0.1".into(),
            enable_cors: false,
            max_connections: Some(32),
            verbose_logging: false,
            max_message_size: None,
        }
    }
}

/// Shared state for the transport server.
struct AppState<H: MessageHandler> {
    handler: Arc<H>,
    registry: Arc<ServiceRegistry>,
    config: TransportConfig,
    /// Connected client count (for health check and the connection limit)
    client_count: Arc<AtomicUsize>,
    /// Cancelled on server stop; every connection closes with 1001
    shutdown: CancellationToken,
}

/// The transport server. Accepts upgrades and runs connections.
pub struct TransportServer {
    shutdown: CancellationToken,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
    client_count: Arc<AtomicUsize>,
}

impl TransportServer {
    /// Start serving the registry's services with the given handler.
    pub async fn start<H: MessageHandler>(
        config: TransportConfig,
        registry: Arc<ServiceRegistry>,
        handler: H,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_shared(config, registry, Arc::new(handler)).await
    }

    /// Like [`start`](Self::start) with a handler that is shared with other
    /// parts of the application.
    pub async fn start_shared<H: MessageHandler>(
        config: TransportConfig,
        registry: Arc<ServiceRegistry>,
        handler: Arc<H>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let shutdown = CancellationToken::new();
        let client_count = Arc::new(AtomicUsize::new(0));

        let state = Arc::new(AppState {
            handler,
            registry,
            config: config.clone(),
            client_count: client_count.clone(),
            shutdown: shutdown.clone(),
        });

        let mut app = Router::new()
            .route("/health", get(health_handler::<H>))
            .fallback(ws_upgrade_handler::<H>)
            .with_state(state);
        if config.enable_cors {
            app = app.layer(CorsLayer::permissive());
        }

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        info!("Websocket transport listening on ws://{}:{}", config.hostname, actual_port);

        let server_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
            {
                error!("Websocket transport failed: {e}");
            }
        });

        Ok(Self {
            shutdown,
            handle: Some(handle),
            port: actual_port,
            client_count,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Gracefully stop the server. Open connections are closed with 1001.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Websocket transport stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler<H: MessageHandler>(
    State(state): State<Arc<AppState<H>>>,
    uri: Uri,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let requested = requested_subprotocols(&headers);

    let service = match state.registry.resolve_service(uri.path(), requested.as_slice()) {
        Ok(service) => service,
        Err(e) => {
            debug!("Upgrade rejected: {e}");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    // Check connection limit
    if let Some(max) = state.config.max_connections {
        let current = state.client_count.load(Ordering::Relaxed);
        if current >= max {
            warn!("Connection rejected: max connections reached ({max})");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    if service.has_upgrade_hook() {
        let request = UpgradeRequest {
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers: headers.clone(),
            subprotocols: requested.clone(),
        };
        if let Err(reason) = state.handler.on_upgrade(&service, &request).await {
            warn!("Upgrade to {} refused by handler: {reason}", service.base_path());
            return (StatusCode::FORBIDDEN, reason).into_response();
        }
    }

    let subprotocol = service.negotiate_subprotocol(requested.as_slice());
    // tungstenite enforces the per-frame limit; whole messages may be larger
    let mut ws = ws.max_frame_size(service.max_frame_size());
    if let Some(max) = state.config.max_message_size {
        ws = ws.max_message_size(max);
    }
    if let Some(protocol) = subprotocol.clone() {
        ws = ws.protocols([protocol]);
    }

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, service, subprotocol))
        .into_response()
}

async fn health_handler<H: MessageHandler>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.client_count.load(Ordering::Relaxed),
        "services": state.registry.len(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

type Connection = ConnectionState<ConnectionHandle, Endpoint>;
type HandOff = Pin<Box<dyn Future<Output = DispatchResult<()>> + Send>>;

/// Why a connection's read loop ended.
struct Disconnect {
    code: Option<CloseCode>,
    reason: String,
}

impl Disconnect {
    fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    fn peer(code: Option<CloseCode>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    fn from_error(e: &DispatchError) -> Self {
        Self::new(e.close_code(), e.to_string())
    }

    fn shutting_down() -> Self {
        Self::new(CloseCode::GoingAway, "server shutting down")
    }
}

async fn handle_ws_connection<H: MessageHandler>(
    socket: WebSocket,
    state: Arc<AppState<H>>,
    service: Arc<ServiceDescriptor>,
    subprotocol: Option<String>,
) {
    state.client_count.fetch_add(1, Ordering::Relaxed);

    let (ws_tx, mut ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(out_tx);

    let endpoint = Endpoint::new(service.base_path(), subprotocol);
    let mut conn: Connection = ConnectionState::new(service.clone(), endpoint, service.dispatch_mode());
    let client_id = conn.id().to_string();
    if let Err(e) = conn.bind(handle.clone()) {
        error!("Failed to bind connection {client_id}: {e}");
        state.client_count.fetch_sub(1, Ordering::Relaxed);
        return;
    }
    conn.on_open();

    let writer = tokio::spawn(write_loop(ws_tx, out_rx, client_id.clone()));

    let session = Session::new(&client_id, conn.endpoint().clone(), handle.clone());
    state.handler.on_open(&session).await;
    let handler_task = tokio::spawn(handler_loop(
        state.handler.clone(),
        session.clone(),
        conn.dispatch(),
    ));

    let disconnect = read_loop(&mut conn, &mut ws_rx, &state).await;

    // Releases the handler task if it is waiting for a message
    conn.on_close(disconnect.code, &disconnect.reason);
    if let Err(e) = handler_task.await {
        error!("Handler task for {client_id} failed: {e}");
    }
    state
        .handler
        .on_close(&session, disconnect.code, &disconnect.reason)
        .await;

    // Answering a peer close is a no-op for the socket, so always send one
    let code = disconnect.code.unwrap_or(CloseCode::Normal);
    let _ = handle.close(code, disconnect.reason);
    drop(session);
    drop(handle);
    drop(conn);
    let _ = writer.await;

    state.client_count.fetch_sub(1, Ordering::Relaxed);
    info!(
        "Client disconnected: {client_id} (total: {})",
        state.client_count.load(Ordering::Relaxed)
    );
}

/// Feed inbound frames to the connection state until the connection ends.
///
/// In synchronous mode each completed message is handed off inline. In
/// asynchronous mode the hand-off is parked in `pending` and control frames
/// keep being answered meanwhile; the next data message waits for it.
async fn read_loop<H: MessageHandler>(
    conn: &mut Connection,
    ws_rx: &mut SplitStream<WebSocket>,
    state: &AppState<H>,
) -> Disconnect {
    let shutdown = &state.shutdown;
    let idle_timeout = conn.service().idle_timeout();
    let mut deadline = idle_timeout.map(|d| Instant::now() + d);
    let mut pending: Option<HandOff> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Disconnect::shutting_down(),

            _ = sleep_until(deadline) => {
                info!("Idle timeout for client {}", conn.id());
                return Disconnect::new(CloseCode::GoingAway, "idle timeout");
            }

            result = wait_hand_off(&mut pending), if pending.is_some() => {
                pending = None;
                if let Err(e) = result {
                    return Disconnect::from_error(&e);
                }
            }

            msg = ws_rx.next() => {
                let frame = match msg {
                    Some(Ok(message)) => frame_from_message(message),
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {e}", conn.id());
                        return read_error_disconnect(&e);
                    }
                    None => {
                        debug!("Client {} dropped the connection", conn.id());
                        return Disconnect::peer(None, "connection dropped");
                    }
                };

                deadline = idle_timeout.map(|d| Instant::now() + d);
                conn.endpoint_mut().touch();
                if state.config.verbose_logging {
                    info!("{} frame from {} ({} bytes, final: {})",
                        frame.kind.as_str(), conn.id(), frame.len(), frame.is_final);
                }

                match conn.on_reassembled(frame) {
                    Ok(FrameOutcome::Message(message)) => {
                        if let Some(previous) = pending.take() {
                            if let Err(disconnect) = finish_hand_off(previous, shutdown).await {
                                return disconnect;
                            }
                        }
                        match conn.dispatch_mode() {
                            DispatchMode::Synchronous => {
                                let hand_off = conn.enqueue_message(message);
                                if let Err(disconnect) = finish_hand_off(hand_off, shutdown).await {
                                    return disconnect;
                                }
                            }
                            DispatchMode::Asynchronous => {
                                pending = Some(Box::pin(conn.hand_off(message)));
                            }
                        }
                    }
                    Ok(FrameOutcome::Pong(data)) => {
                        if let Ok(handle) = conn.connection() {
                            let _ = handle.send(OutboundMessage::Pong(data));
                        }
                    }
                    Ok(FrameOutcome::Pending | FrameOutcome::Ignored) => {}
                    Ok(FrameOutcome::Close { code, reason }) => {
                        debug!("Client {} closed the connection", conn.id());
                        return Disconnect::peer(code, reason);
                    }
                    Err(e) => {
                        warn!("Rejecting frame from {}: {e}", conn.id());
                        return Disconnect::from_error(&e);
                    }
                }
            }
        }
    }
}

async fn finish_hand_off(
    hand_off: impl Future<Output = DispatchResult<()>>,
    shutdown: &CancellationToken,
) -> Result<(), Disconnect> {
    tokio::select! {
        result = hand_off => result.map_err(|e| Disconnect::from_error(&e)),
        _ = shutdown.cancelled() => Err(Disconnect::shutting_down()),
    }
}

async fn wait_hand_off(pending: &mut Option<HandOff>) -> DispatchResult<()> {
    match pending.as_mut() {
        Some(hand_off) => hand_off.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn handler_loop<H: MessageHandler>(
    handler: Arc<H>,
    session: Session,
    messages: impl Stream<Item = InboundMessage> + Send + 'static,
) {
    let mut messages = std::pin::pin!(messages);
    while let Some(message) = messages.next().await {
        if let Some(reply) = handler.on_message(&session, message).await {
            if session.send(reply).is_err() {
                debug!("Writer for {} is gone, dropping reply", session.id());
                break;
            }
        }
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    client_id: String,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, OutboundMessage::Close { .. });
        if let Err(e) = ws_tx.send(message_from_outbound(message)).await {
            debug!("Failed to write to {client_id}: {e}");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Subprotocols from all `Sec-WebSocket-Protocol` headers, in client order.
fn requested_subprotocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|protocol| protocol.trim().to_string())
        .filter(|protocol| !protocol.is_empty())
        .collect()
}

/// Frames over the service limit are refused by tungstenite while reading.
fn read_error_disconnect(e: &axum::Error) -> Disconnect {
    match e.source().and_then(|source| source.downcast_ref::<WsError>()) {
        Some(WsError::Capacity(CapacityError::MessageTooLong { size, max_size })) => {
            Disconnect::from_error(&DispatchError::FrameTooLarge {
                size: *size,
                max: *max_size,
            })
        }
        Some(WsError::Utf8(reason)) => {
            Disconnect::from_error(&DispatchError::InvalidPayload(reason.clone()))
        }
        _ => Disconnect::new(CloseCode::ProtocolError, e.to_string()),
    }
}

/// tungstenite hands over whole messages, so every frame is final.
/// Routed with `on_reassembled`, since the frame limit was already applied.
fn frame_from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::text(text.as_str()),
        Message::Binary(data) => Frame::binary(data),
        Message::Ping(data) => Frame::ping(data),
        Message::Pong(data) => Frame::pong(data),
        Message::Close(Some(close)) => Frame::close(CloseCode::from_code(close.code), &close.reason),
        Message::Close(None) => Frame::new(FrameKind::Close, Bytes::new(), true),
    }
}

fn message_from_outbound(message: OutboundMessage) -> Message {
    match message {
        OutboundMessage::Text(text) => Message::Text(text.into()),
        OutboundMessage::Binary(data) => Message::Binary(data),
        OutboundMessage::Pong(data) => Message::Pong(data),
        OutboundMessage::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: code.code(),
            reason: reason.into(),
        })),
    }
}

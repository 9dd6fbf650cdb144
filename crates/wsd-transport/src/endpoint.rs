//! Connection-side objects: the endpoint record, the outbound handle, and
//! the session handed to message handlers.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use wsd_protocol::{CloseCode, DispatchError, DispatchResult, OutboundMessage};

/// Application-visible record of a connected peer.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Base path of the service the peer connected to
    pub path: String,
    /// Negotiated subprotocol, if any
    pub subprotocol: Option<String>,
    /// When the upgrade completed
    pub connected_at: Instant,
    /// Last time we received any frame from this peer
    pub last_activity: Instant,
}

impl Endpoint {
    pub fn new(path: impl Into<String>, subprotocol: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            path: path.into(),
            subprotocol,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Live handle to a connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// Queue a message for the peer. Fails with `QueueClosed` once the
    /// writer has shut down.
    pub fn send(&self, message: OutboundMessage) -> DispatchResult<()> {
        self.tx.send(message).map_err(|_| DispatchError::QueueClosed)
    }

    pub fn send_text(&self, text: impl Into<String>) -> DispatchResult<()> {
        self.send(OutboundMessage::Text(text.into()))
    }

    pub fn close(&self, code: CloseCode, reason: impl Into<String>) -> DispatchResult<()> {
        self.send(OutboundMessage::close(code, reason))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What a [`MessageHandler`](crate::MessageHandler) sees of a connection.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    endpoint: Endpoint,
    handle: ConnectionHandle,
}

impl Session {
    pub fn new(id: impl Into<String>, endpoint: Endpoint, handle: ConnectionHandle) -> Self {
        Self {
            id: id.into(),
            endpoint,
            handle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.endpoint.path
    }

    pub fn subprotocol(&self) -> Option<&str> {
        self.endpoint.subprotocol.as_deref()
    }

    pub fn connected_at(&self) -> Instant {
        self.endpoint.connected_at
    }

    pub fn send(&self, message: OutboundMessage) -> DispatchResult<()> {
        self.handle.send(message)
    }

    pub fn send_text(&self, text: impl Into<String>) -> DispatchResult<()> {
        self.handle.send_text(text)
    }

    pub fn close(&self, code: CloseCode, reason: impl Into<String>) -> DispatchResult<()> {
        self.handle.close(code, reason)
    }
}

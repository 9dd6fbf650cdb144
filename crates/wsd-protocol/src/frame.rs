//! Frames as delivered by the transport, and the logical messages built from them.

use bytes::Bytes;

use crate::close::CloseCode;

/// Opcode class of an inbound frame. Text continuation frames arrive as
/// `Text` with `is_final == false` on every fragment but the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

impl FrameKind {
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping | Self::Pong | Self::Close)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Close => "close",
        }
    }
}

/// One frame handed over by the transport's frame callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
    /// FIN bit. Always true for control frames.
    pub is_final: bool,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>, is_final: bool) -> Self {
        Self {
            kind,
            payload: payload.into(),
            is_final,
        }
    }

    /// A complete, unfragmented text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(FrameKind::Text, Bytes::from(text.into()), true)
    }

    /// One fragment of a text message; `is_final` marks the last one.
    pub fn text_fragment(text: impl Into<String>, is_final: bool) -> Self {
        Self::new(FrameKind::Text, Bytes::from(text.into()), is_final)
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Binary, data, true)
    }

    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Ping, data, true)
    }

    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Pong, data, true)
    }

    /// A close frame carrying `code` followed by the UTF-8 `reason`.
    pub fn close(code: CloseCode, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.code().to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::new(FrameKind::Close, payload, true)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A complete application-level message, possibly assembled from several
/// wire fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Binary(Bytes),
}

impl InboundMessage {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a handler sends back on its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Binary(Bytes),
    Pong(Bytes),
    Close { code: CloseCode, reason: String },
}

impl OutboundMessage {
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::Close {
            code,
            reason: reason.into(),
        }
    }
}

impl From<InboundMessage> for OutboundMessage {
    fn from(message: InboundMessage) -> Self {
        match message {
            InboundMessage::Text(text) => Self::Text(text),
            InboundMessage::Binary(data) => Self::Binary(data),
        }
    }
}

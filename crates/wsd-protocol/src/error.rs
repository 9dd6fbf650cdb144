//! Dispatch error taxonomy.
//!
//! Structural errors (`NotConnected`, `AlreadyBound`) abort only the
//! offending call. `QueueClosed` means the connection is tearing down and the
//! caller must stop. `Cancelled` is the only error worth retrying.

use crate::close::CloseCode;

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The connection handle was read before `bind`.
    #[error("the websocket connection has not been made")]
    NotConnected,

    /// `bind` was called on a connection state that already holds a handle.
    #[error("a websocket connection is already bound to this state")]
    AlreadyBound,

    /// The dispatch queue was closed; stop, do not retry.
    #[error("dispatch queue is closed")]
    QueueClosed,

    /// A pending hand-off was cancelled before a consumer took it.
    #[error("message hand-off was cancelled")]
    Cancelled,

    /// Invalid service configuration, raised when a service is attached.
    #[error("invalid service configuration: {0}")]
    Configuration(String),

    /// No attached service matches the upgrade request.
    #[error("no websocket service matches path '{path}'")]
    NoMatch { path: String },

    /// A frame exceeded the service's `max_frame_size`.
    #[error("frame of {size} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// A text frame carried bytes that are not valid UTF-8.
    #[error("invalid frame payload: {0}")]
    InvalidPayload(String),
}

impl DispatchError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn no_match(path: impl Into<String>) -> Self {
        Self::NoMatch { path: path.into() }
    }

    /// Close code to send when this error ends a connection.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::QueueClosed | Self::Cancelled => CloseCode::GoingAway,
            Self::FrameTooLarge { .. } => CloseCode::MessageTooBig,
            Self::InvalidPayload(_) => CloseCode::InvalidPayload,
            Self::NoMatch { .. } => CloseCode::PolicyViolation,
            Self::NotConnected | Self::AlreadyBound | Self::Configuration(_) => {
                CloseCode::InternalError
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

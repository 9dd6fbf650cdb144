//! ws-dispatch protocol types
//!
//! Types shared by the dispatch core and the transport adapter: the error
//! taxonomy, WebSocket close codes, frame kinds, logical messages and the
//! service configuration schema. The wire framing itself (RFC 6455) is owned
//! by the transport; nothing here encodes or decodes frames.

pub mod close;
pub mod config;
pub mod error;
pub mod frame;

pub use close::CloseCode;
pub use config::{
    ANONYMOUS_NAME_PREFIX, BasePath, DEFAULT_MAX_FRAME_SIZE, DispatchMode, ServiceConfig, ServicesFile,
    UPGRADE_HOOK,
};
pub use error::{DispatchError, DispatchResult};
pub use frame::{Frame, FrameKind, InboundMessage, OutboundMessage};

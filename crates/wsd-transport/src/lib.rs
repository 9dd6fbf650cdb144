//! ws-dispatch transport layer
//!
//! Serves attached WebSocket services over axum. The transport handles:
//! - Upgrade requests: service resolution by path, subprotocol selection,
//!   the optional upgrade hook, connection limits
//! - Frame I/O: every inbound message goes through the connection's
//!   `ConnectionState`, outbound messages go through a writer task
//! - Limits: max frame size and idle timeout from the service descriptor
//! - Handler delivery: one handler task per connection drains the dispatch
//!   stream
//!
//! Application code plugs in through the `MessageHandler` trait.

pub mod endpoint;
pub mod server;

pub use endpoint::{ConnectionHandle, Endpoint, Session};
pub use server::{MessageHandler, TransportConfig, TransportServer, UpgradeRequest};

//! ws-dispatch core — per-connection dispatch state and service resolution.
//!
//! - [`ServiceDescriptor`]: a service's resolved, immutable dispatch
//!   configuration (subprotocols, limits, base path, upgrade hook).
//! - [`ServiceRegistry`]: attached services, resolved per upgrade request.
//! - [`ConnectionState`]: everything one connection needs to turn inbound
//!   frames into in-order logical messages.
//! - [`FragmentAggregator`]: text fragment reassembly for one connection.
//! - [`DispatchQueue`]: the single-slot rendezvous between the frame-reading
//!   path and the handler path.

pub mod aggregator;
pub mod connection;
pub mod path;
pub mod queue;
pub mod registry;
pub mod service;

pub use aggregator::FragmentAggregator;
pub use connection::{ConnectionState, FrameOutcome};
pub use queue::DispatchQueue;
pub use registry::ServiceRegistry;
pub use service::ServiceDescriptor;

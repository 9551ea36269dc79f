//! Agent Client Protocol (ACP) engine.
//!
//! Shared by both roles; only the registration data differs.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based NDJSON framing.
//! - `envelope`: request / response / notification classification.
//! - `registry`: pending outbound requests keyed by id.
//! - `handler`: polymorphic method handlers and notification subscribers.
//! - `dispatcher`: the inbound router and its gating.
//! - `handshake`: capability negotiation.
//! - `reader` / `writer`: the connection's read loop and single writer task.
//! - `connection`: the handle tying the above together.
//! - `methods`: method names and capability gates.
//! - `spawner`: agent subprocess host.

pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod handler;
pub mod handshake;
pub mod methods;
pub mod reader;
pub mod registry;
pub mod spawner;
pub mod writer;

pub use connection::{Connection, ConnectionOptions};
pub use dispatcher::Dispatcher;
pub use envelope::{Message, RequestId};

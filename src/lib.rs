//! Core connection engine for an HTTP/2 client multiplexer.
//!
//! This crate owns everything below "here is a request, here is a
//! response" on a single already-established transport: frame
//! encode/decode, HPACK glue, per-stream and connection flow control, the
//! reader/writer task pair, the stream registry, keep-alive/RTT, and a
//! lock-free idle-connection pool a higher-level connection pool can sit
//! on top of. It does not dial connections, resolve DNS, or implement
//! TLS/ALPN negotiation — see [`client`] for the thin layer that does.

pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow;
pub mod frame;
pub mod hpack;
pub mod idle_stack;
pub mod keepalive;
pub mod reader;
pub mod registry;
pub mod stream;
pub mod writer;

pub use config::Config;
pub use connection::{Connection, ResponseStream};
pub use error::{ClientError, ConnectionError, OperationError, ProtocolError, StreamError};
pub use frame::{PseudoHeaders, Reason, StreamId};
pub use stream::coordinator::WriteCoordinator;
pub use stream::{StreamAttributes, StreamEvent};

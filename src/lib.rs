//! RFC 6455 WebSocket protocol engine: frame codec, opening/closing
//! handshake, message assembler, and the connection coordinator that ties
//! them to an `AsyncRead + AsyncWrite` transport.
//!
//! This crate is deliberately generic over the transport and does not open
//! sockets, parse URIs, or provide a permessage-deflate implementation —
//! see [`server::accept`] and [`client::connect`] for where a caller plugs
//! an already-accepted/already-dialed stream in.

pub mod assembler;
pub mod client;
pub mod close;
pub mod config;
pub mod connection;
pub mod error;
mod event;
pub mod extension;
pub mod frame;
pub mod handshake;
pub mod http;
mod mask;
pub mod server;
pub mod state;

pub use assembler::Message;
pub use config::{Side, WebSocketConfig};
pub use connection::Connection;
pub use error::{HandshakeError, Result, WsError};
pub use state::ConnectionState;

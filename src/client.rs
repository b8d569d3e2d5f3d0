//! Client-side glue (component H): run the opening handshake over an
//! already-dialed transport and hand back a live [`Connection`].
//!
//! URI parsing is explicitly out of scope (§1): callers supply a
//! [`RequestTarget`] with host/port/path already split out, matching how
//! `ClientProtocol.connect` in the source library takes a parsed `URI`
//! rather than owning the dial itself.

use crate::config::{Side, WebSocketConfig};
use crate::connection::Connection;
use crate::error::Result;
use crate::handshake::{self, ClientHandshakeOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Host, port, path, and scheme of a WebSocket URL, pre-split by the
/// caller. `secure` only affects the default port a caller might choose
/// when dialing; this crate never opens the socket itself.
#[derive(Debug, Clone)]
pub struct RequestTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
}

impl RequestTarget {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            secure,
        }
    }

    /// The `Host` header value: omits the port when it's the scheme's
    /// default, matching what browsers and `reqwest` send.
    fn host_header(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Run the client side of the opening handshake on `stream` (already
/// connected, and already TLS-wrapped if `target.secure`), then spawn the
/// coordinator tasks.
pub async fn connect<S>(
    mut stream: S,
    target: &RequestTarget,
    config: &WebSocketConfig,
    mut options: ClientHandshakeOptions,
) -> Result<Connection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    options.host = target.host_header();
    options.path = target.path.clone();

    let outcome = handshake::client_handshake(&mut stream, &options).await?;
    info!(host = %target.host, path = %target.path, subprotocol = ?outcome.subprotocol, "websocket handshake completed");

    Ok(Connection::spawn(
        stream,
        Side::Client,
        config,
        outcome.extensions,
    ))
}

//! Server-side glue (component H): run the opening handshake over an
//! already-accepted transport and hand back a live [`Connection`].
//!
//! Grounded on the teacher's `protocol::mod::handle_connection`, which
//! detects the upgrade and dispatches to `websocket::handle_websocket`; here
//! the detection is gone (the caller already decided this socket is a
//! WebSocket, having read the request itself or accepted on a
//! dedicated listener) and what remains is handshake-then-spawn.

use crate::config::{Side, WebSocketConfig};
use crate::connection::Connection;
use crate::error::Result;
use crate::handshake::{self, ServerHandshakeOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Run the server side of the opening handshake on `stream`, then spawn the
/// coordinator tasks. Returns the connection handle plus the request path
/// the client asked to upgrade on (e.g. `/chat`), so the caller can route
/// to different handlers per path.
pub async fn accept<S>(
    mut stream: S,
    config: &WebSocketConfig,
    options: &ServerHandshakeOptions,
) -> Result<(Connection<S>, String)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let outcome = handshake::server_handshake(&mut stream, options).await?;
    info!(path = %outcome.path, subprotocol = ?outcome.subprotocol, "websocket handshake accepted");

    let connection = Connection::spawn(stream, Side::Server, config, outcome.extensions);
    Ok((connection, outcome.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Message;
    use crate::handshake::ClientHandshakeOptions;
    use tokio::io::duplex;

    #[tokio::test]
    async fn accept_completes_handshake_and_serves_messages() {
        let (client_io, server_io) = duplex(8192);
        let config = WebSocketConfig::default();

        let client_fut = async move {
            let options = ClientHandshakeOptions::new("example.com", "/chat");
            let mut client_io = client_io;
            let outcome = handshake::client_handshake(&mut client_io, &options)
                .await
                .unwrap();
            let connection =
                Connection::spawn(client_io, Side::Client, &WebSocketConfig::default(), outcome.extensions);
            connection.send(Message::Text("hi".into())).await.unwrap();
            connection
        };

        let server_fut = accept(server_io, &config, &ServerHandshakeOptions::default());

        let (_client, server_result) = tokio::join!(client_fut, server_fut);
        let (server, path) = server_result.unwrap();
        assert_eq!(path, "/chat");
        assert_eq!(server.recv().await.unwrap(), Message::Text("hi".into()));
    }
}

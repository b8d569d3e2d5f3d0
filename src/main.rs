//! A minimal echo server, exercising the public surface end to end: accept
//! a TCP connection, run the opening handshake, then echo every message
//! back until the peer closes.

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use wsendpoint::{config::Config, handshake::ServerHandshakeOptions, server, WebSocketConfig, WsError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::default();
    let listener = TcpListener::bind(&config.address).await?;
    info!(address = %config.address, "echo server listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let websocket_config = config.websocket.clone();
        tokio::spawn(async move {
            info!(%peer, "accepted connection");
            if let Err(err) = serve_echo(socket, websocket_config).await {
                warn!(%peer, error = %err, "connection ended with an error");
            }
        });
    }
}

async fn serve_echo(socket: tokio::net::TcpStream, config: WebSocketConfig) -> Result<(), WsError> {
    let options = ServerHandshakeOptions::default();
    let (connection, path) = server::accept(socket, &config, &options).await?;
    info!(%path, "handshake complete, echoing messages");

    loop {
        match connection.recv().await {
            Ok(message) => connection.send(message).await?,
            Err(WsError::ConnectionClosedOk { code, .. }) => {
                info!(code, "peer closed normally");
                return Ok(());
            }
            Err(err) => {
                error!(error = %err, "connection failed");
                return Err(err);
            }
        }
    }
}

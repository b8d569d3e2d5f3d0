use std::time::Duration;

/// Which side of the connection this endpoint plays. Determines masking
/// direction: clients mask outbound frames, servers require masked inbound
/// frames and reject masked outbound ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn is_client(self) -> bool {
        matches!(self, Side::Client)
    }

    pub fn is_server(self) -> bool {
        matches!(self, Side::Server)
    }
}

/// Per-connection tuning knobs. Mirrors the keyword arguments `serve()` and
/// `connect()` accept upstream: `ping_interval`/`ping_timeout` drive the
/// keepalive, `close_timeout` bounds the closing handshake, `max_size` caps
/// a single frame's payload, `max_queue` caps the number of fully assembled
/// messages buffered ahead of `recv()`.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_size: Option<u64>,
    pub max_queue: Option<usize>,
    pub ping_interval: Option<Duration>,
    pub ping_timeout: Option<Duration>,
    pub close_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_size: Some(1 << 20),
            max_queue: Some(32),
            ping_interval: Some(Duration::from_secs(20)),
            ping_timeout: Some(Duration::from_secs(20)),
            close_timeout: Duration::from_secs(10),
        }
    }
}

/// Listen address and static configuration for the example echo binary.
#[derive(Debug)]
pub struct Config {
    pub address: String,
    pub websocket: WebSocketConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
            websocket: WebSocketConfig::default(),
        }
    }
}

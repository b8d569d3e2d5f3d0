use thiserror::Error;

/// Specializations of a failed opening handshake. Only ever produced while
/// a connection is in [`crate::state::ConnectionState::Connecting`]; these
/// terminate with an HTTP error response, never a WebSocket close frame.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid upgrade: {0}")]
    InvalidUpgrade(String),

    #[error("origin not allowed: {0:?}")]
    InvalidOrigin(Option<String>),

    #[error("extension negotiation failed: {0}")]
    NegotiationError(String),

    #[error("malformed HTTP message: {0}")]
    InvalidMessage(String),

    #[error("handshake aborted with status {status}: {body}")]
    AbortHandshake { status: u16, body: String },
}

#[derive(Error, Debug)]
pub enum WsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket protocol error: {0}")]
    ProtocolError(String),

    #[error("payload of {size} bytes exceeds max_size of {max} bytes")]
    PayloadTooBig { size: u64, max: u64 },

    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    #[error(transparent)]
    InvalidHandshake(#[from] HandshakeError),

    #[error("connection closed normally (code {code})")]
    ConnectionClosedOk { code: u16, reason: String },

    #[error("connection closed with error (code {code:?})")]
    ConnectionClosedError { code: Option<u16>, reason: String },

    #[error("operation timed out")]
    Timeout,

    #[error("end of frame stream")]
    Eof,

    #[error("invalid API usage: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, WsError>;

impl WsError {
    /// The close code this error implies, if the connection must be failed.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            WsError::ProtocolError(_) => Some(1002),
            WsError::PayloadTooBig { .. } => Some(1009),
            WsError::InvalidUtf8 => Some(1007),
            WsError::Io(_) => Some(1006),
            WsError::Timeout => Some(1011),
            WsError::ConnectionClosedOk { code, .. } => Some(*code),
            WsError::ConnectionClosedError { code, .. } => *code,
            WsError::InvalidHandshake(_) => None,
            WsError::Eof => None,
            WsError::InvalidState(_) => None,
        }
    }
}

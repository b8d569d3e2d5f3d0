//! Parse/build the 2-byte code + UTF-8 reason carried inside a CLOSE frame's
//! payload (RFC 6455 §7.4).

use crate::error::WsError;

/// Codes that must never appear on the wire. They're reserved for local use
/// (1005: no code was sent, 1006: abnormal closure, 1015: TLS failure) and
/// only ever synthesized by an endpoint that observed the condition itself.
const RESERVED_CODES: [u16; 3] = [1005, 1006, 1015];

fn is_valid_wire_code(code: u16) -> bool {
    matches!(code, 1000..=4999) && !RESERVED_CODES.contains(&code)
}

/// Parse a CLOSE frame's payload into `(code, reason)`.
///
/// An empty payload decodes to the sentinel `(1005, "")`, matching the
/// convention that "no status code was actually present" is itself
/// observable information to the caller, even though 1005 can't be sent.
pub fn parse(data: &[u8]) -> Result<(u16, String), WsError> {
    if data.is_empty() {
        return Ok((1005, String::new()));
    }
    if data.len() < 2 {
        return Err(WsError::ProtocolError(
            "close frame payload shorter than 2 bytes".into(),
        ));
    }

    let code = u16::from_be_bytes([data[0], data[1]]);
    if !is_valid_wire_code(code) {
        return Err(WsError::ProtocolError(format!(
            "invalid close code {code} on the wire"
        )));
    }

    let reason = std::str::from_utf8(&data[2..])
        .map_err(|_| WsError::InvalidUtf8)?
        .to_string();

    Ok((code, reason))
}

/// Build a CLOSE frame payload from a code and reason. The inverse of
/// [`parse`].
pub fn serialize(code: u16, reason: &str) -> Result<Vec<u8>, WsError> {
    if !is_valid_wire_code(code) {
        return Err(WsError::ProtocolError(format!(
            "cannot serialize close code {code}"
        )));
    }
    let reason_bytes = reason.as_bytes();
    if reason_bytes.len() > 123 {
        return Err(WsError::ProtocolError(
            "close reason exceeds 123 bytes of UTF-8".into(),
        ));
    }

    let mut out = Vec::with_capacity(2 + reason_bytes.len());
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(reason_bytes);
    Ok(out)
}

//! Server side of the WebSocket opening handshake (RFC 6455 §4.2).

use crate::http::request::Request;
use crate::http::response::Status;
use base64::prelude::*;
use bytes::BytesMut;
use sha1::{Digest, Sha1};

/// GUID appended to the client key before hashing.
const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Reasons an upgrade request is refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// `Upgrade` header absent or not `websocket`
    NotUpgrade,
    /// `Sec-WebSocket-Key` header absent or empty
    MissingKey,
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::NotUpgrade => write!(f, "Not a websocket upgrade request"),
            HandshakeError::MissingKey => write!(f, "Missing Sec-WebSocket-Key header"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// `base64(SHA-1(key + GUID))`
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Validate the upgrade headers and return the accept token.
pub fn negotiate(request: &Request) -> Result<String, HandshakeError> {
    let upgrade = request
        .header("upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    if !upgrade {
        return Err(HandshakeError::NotUpgrade);
    }

    match request.header("sec-websocket-key") {
        Some(key) if !key.is_empty() => Ok(accept_key(key)),
        _ => Err(HandshakeError::MissingKey),
    }
}

/// The `101 Switching Protocols` response carrying `accept`.
pub fn switching_protocols(accept: &str) -> BytesMut {
    let status = Status::SwitchingProtocols;
    let text = format!(
        "HTTP/1.1 {} {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
        status.code(),
        status.reason(),
        accept
    );
    BytesMut::from(text.as_bytes())
}

//! Opening handshake: HTTP upgrade request in, `101 Switching Protocols` out.

use std::io;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const KEY_HEADER: &str = "sec-websocket-key";
const REQUEST_END: &[u8] = b"\r\n\r\n";

/// Handshake failures. The session closes without replying.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The request carries no `Sec-WebSocket-Key` header.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    /// The request was not terminated within the read window.
    #[error("handshake timed out")]
    Timeout,

    /// The request grew past the size limit before it was terminated.
    #[error("handshake request too large")]
    Oversized,

    /// The peer closed the stream before finishing the request.
    #[error("peer closed during handshake")]
    PeerClosed,

    /// Transport failure.
    #[error("handshake i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Computes the `Sec-WebSocket-Accept` token for a client key.
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Length of the request including its blank-line terminator, if complete.
#[must_use]
pub fn request_len(buf: &[u8]) -> Option<usize> {
    buf.windows(REQUEST_END.len())
        .position(|w| w == REQUEST_END)
        .map(|at| at + REQUEST_END.len())
}

/// Extracts the client key from a complete request. Header names match
/// case-insensitively.
///
/// # Errors
///
/// Returns [`HandshakeError::MissingKey`] if no non-empty key header exists.
pub fn client_key(request: &str) -> Result<&str, HandshakeError> {
    request
        .split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(KEY_HEADER))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or(HandshakeError::MissingKey)
}

/// Builds the upgrade response for an accept token.
#[must_use]
pub fn upgrade_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Validates a complete request and returns the response bytes to send.
///
/// # Errors
///
/// Returns [`HandshakeError::MissingKey`] if the key header is absent or the
/// request is not text.
pub fn negotiate(request: &[u8]) -> Result<Vec<u8>, HandshakeError> {
    let text = std::str::from_utf8(request).map_err(|_| HandshakeError::MissingKey)?;
    let key = client_key(text)?;
    Ok(upgrade_response(&accept_key(key)).into_bytes())
}

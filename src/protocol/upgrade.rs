//! HTTP 101 upgrade response formatting (RFC 6455 section 4.2.2).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};

/// The GUID concatenated with the client key for the accept digest.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Identification line appended to every upgrade response.
const SERVER_STAMP: &str = "WebSocket-Server: wshive";

/// Echo lines for extensions and subprotocol are dropped beyond this size.
const MAX_ECHO_LEN: usize = 200;

/// Compute the `Sec-WebSocket-Accept` value for a client's
/// `Sec-WebSocket-Key`: base64(SHA1(key + GUID)).
///
/// # Example
///
/// ```
/// use wshive::protocol::upgrade::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(sec_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(sec_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Format the complete 101 Switching Protocols response.
///
/// `extensions_response` is echoed verbatim in a
/// `Sec-WebSocket-Extensions` line when non-empty and shorter than 200
/// bytes. From `subprotocols` (the client's offer list) only the first
/// comma-separated token is echoed.
#[must_use]
pub fn format_upgrade_response(
    sec_key: &str,
    extensions_response: Option<&str>,
    subprotocols: Option<&str>,
) -> Vec<u8> {
    let mut response = Vec::with_capacity(256);
    response.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    response.extend_from_slice(b"Upgrade: websocket\r\n");
    response.extend_from_slice(b"Connection: Upgrade\r\n");
    response.extend_from_slice(b"Sec-WebSocket-Accept: ");
    response.extend_from_slice(compute_accept_key(sec_key).as_bytes());
    response.extend_from_slice(b"\r\n");

    if let Some(extensions) = extensions_response {
        if !extensions.is_empty() && extensions.len() < MAX_ECHO_LEN {
            response.extend_from_slice(b"Sec-WebSocket-Extensions: ");
            response.extend_from_slice(extensions.as_bytes());
            response.extend_from_slice(b"\r\n");
        }
    }

    if let Some(offered) = subprotocols {
        let first = offered.split(',').next().unwrap_or("");
        if !first.is_empty() && first.len() < MAX_ECHO_LEN {
            response.extend_from_slice(b"Sec-WebSocket-Protocol: ");
            response.extend_from_slice(first.as_bytes());
            response.extend_from_slice(b"\r\n");
        }
    }

    response.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
    response.extend_from_slice(SERVER_STAMP.as_bytes());
    response.extend_from_slice(b"\r\n\r\n");
    response
}

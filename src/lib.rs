//! # wshive - WebSocket endpoint engine
//!
//! `wshive` is the protocol core of a WebSocket endpoint: a sans-IO,
//! RFC 6455 conformant per-connection engine with permessage-deflate
//! (RFC 7692), connection groups and live transfer between them.
//!
//! The embedder owns the sockets and the event loop; the crate owns
//! everything between raw bytes and application callbacks:
//!
//! - streaming frame parsing under arbitrary chunk boundaries
//! - fragment reassembly with interleaved control frames
//! - UTF-8 enforcement for text messages
//! - shared-context and sliding-window permessage-deflate
//! - an ordered write queue with per-message completion callbacks
//! - the close handshake and abrupt teardown paths
//! - the HTTP 101 upgrade response
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use wshive::{Connection, Group, GroupConfig, LoopId, OpCode, Role};
//!
//! let group: Group<MyTransport> = Group::new(LoopId(0), GroupConfig::new());
//! group.on_message(|group, conn, data, opcode| {
//!     // echo
//!     conn.send(group, data, opcode);
//! });
//!
//! let mut conn = Connection::open(transport, Role::Server, false, &group);
//! conn.upgrade(sec_key, None, None);
//!
//! // from the event loop:
//! conn.on_data(&group, &mut buf[..n])?;
//! ```

pub mod config;
pub mod connection;
pub mod deflate;
pub mod error;
pub mod group;
pub mod protocol;
pub mod queue;
pub mod transport;

pub use config::{CompressionMode, GroupConfig};
pub use connection::{
    CompressionStatus, Connection, ConnectionId, Role, SendOptions, CLOSE_CODE_ABNORMAL,
};
pub use deflate::{Hub, SlidingDeflateWindow};
pub use error::{Error, Result};
pub use group::{Group, LoopId};
pub use protocol::OpCode;
pub use queue::SendCallback;
pub use transport::Transport;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_public_types_are_send() {
        assert_send::<Error>();
        assert_send::<GroupConfig>();
        assert_send::<CompressionMode>();
        assert_send::<Role>();
        assert_send::<OpCode>();
        assert_send::<ConnectionId>();
    }
}

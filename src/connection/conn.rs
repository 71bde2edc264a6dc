//! The per-connection protocol engine.
//!
//! A [`Connection`] owns its transport, the streaming frame decoder, the
//! fragment buffer and the outbound write queue. Inbound bytes enter
//! through [`on_data`](Connection::on_data); everything observable comes
//! back out through the owning [`Group`](crate::Group)'s handlers and the
//! transport. All methods must be invoked on the connection's owning loop:
//! `&mut self` is the thread-safety story.

use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;

use crate::config::CompressionMode;
use crate::connection::Role;
use crate::deflate::SlidingDeflateWindow;
use crate::error::{Error, Result};
use crate::group::Group;
use crate::protocol::decoder::{FrameDecoder, FrameSlice};
use crate::protocol::frame::{
    format_close_payload, format_message, parse_close_payload, CLOSE_CODE_NO_STATUS,
    MAX_CLOSE_REASON, MAX_CONTROL_PAYLOAD,
};
use crate::protocol::upgrade::format_upgrade_response;
use crate::protocol::utf8::{validate_utf8, Utf8Validator};
use crate::protocol::OpCode;
use crate::queue::{PendingMessage, SendCallback, WriteQueue};
use crate::transport::Transport;

/// Close code reported when a connection is torn down without a close
/// handshake (RFC 6455 section 7.4.1).
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;

/// Identifier of a live connection, unique per process.
///
/// The identifier is reassigned when a connection is adopted by a new
/// group; across a transfer only user data identifies a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ConnectionId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// permessage-deflate state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStatus {
    /// Extension not negotiated.
    Disabled,
    /// Negotiated; the next data message is expected uncompressed unless
    /// its first frame carries RSV1.
    Enabled,
    /// Inside a message whose first frame carried RSV1; the reassembled
    /// payload must be inflated.
    CompressedFrame,
}

/// Options for [`Connection::send_with`].
pub struct SendOptions<T> {
    /// Request compression. Applied only when permessage-deflate is
    /// negotiated and the opcode is a data opcode.
    pub compress: bool,
    /// Completion callback, fired exactly once (see [`SendCallback`]).
    pub callback: Option<SendCallback<T>>,
}

impl<T> Default for SendOptions<T> {
    fn default() -> Self {
        Self {
            compress: false,
            callback: None,
        }
    }
}

fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x6d5a_56b1)
    }
}

/// A WebSocket connection bound to a [`Group`](crate::Group).
pub struct Connection<T> {
    transport: T,
    role: Role,
    id: ConnectionId,
    decoder: FrameDecoder,
    /// Accumulated data fragments; a control frame arriving in pieces
    /// occupies the trailing `control_tip_len` bytes.
    fragment_buffer: BytesMut,
    control_tip_len: usize,
    compression_status: CompressionStatus,
    sliding_window: Option<SlidingDeflateWindow>,
    /// Incremental validator for an uncompressed text message being
    /// reassembled.
    text_validator: Option<Utf8Validator>,
    has_outstanding_pong: bool,
    shutting_down: bool,
    closed: bool,
    queue: WriteQueue<T>,
    mask_seed: u32,
    user_data: Option<Box<dyn Any + Send>>,
}

impl<T> Connection<T> {
    /// Create a connection over an upgraded transport and register it
    /// with `group`.
    ///
    /// `permessage_deflate` is the per-connection negotiation result from
    /// the HTTP layer; it only takes effect when the group's compression
    /// mode allows it. In sliding-window mode the per-connection deflate
    /// context is allocated here and released at teardown.
    pub fn open(transport: T, role: Role, permessage_deflate: bool, group: &Group<T>) -> Self {
        let config = group.config();
        let negotiated = permessage_deflate && config.compression.is_enabled();
        let sliding_window = if negotiated && config.compression == CompressionMode::SlidingWindow {
            Some(SlidingDeflateWindow::new(config.compression_level))
        } else {
            None
        };

        let id = ConnectionId::next();
        group.add(id);

        Self {
            transport,
            role,
            id,
            decoder: FrameDecoder::new(role, negotiated),
            fragment_buffer: BytesMut::new(),
            control_tip_len: 0,
            compression_status: if negotiated {
                CompressionStatus::Enabled
            } else {
                CompressionStatus::Disabled
            },
            sliding_window,
            text_validator: None,
            has_outstanding_pong: false,
            shutting_down: false,
            closed: false,
            queue: WriteQueue::new(),
            mask_seed: random_mask_seed(),
            user_data: None,
        }
    }

    /// This connection's current identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The endpoint role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the connection has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether this side has started the close handshake.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Current compression state.
    #[must_use]
    pub fn compression_status(&self) -> CompressionStatus {
        self.compression_status
    }

    /// Whether a ping sent via [`ping`](Connection::ping) is still
    /// unanswered by any inbound traffic.
    #[must_use]
    pub fn has_outstanding_pong(&self) -> bool {
        self.has_outstanding_pong
    }

    /// Whether data fragments are buffered for an unfinished message.
    #[must_use]
    pub fn has_pending_fragments(&self) -> bool {
        !self.fragment_buffer.is_empty()
    }

    /// Number of outbound buffers not yet fully drained.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.queue.len()
    }

    /// Access the underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Attach user data. This is the only identity that survives a
    /// transfer between groups.
    pub fn set_user_data(&mut self, data: Box<dyn Any + Send>) {
        self.user_data = Some(data);
    }

    /// Borrow the attached user data.
    #[must_use]
    pub fn user_data(&self) -> Option<&(dyn Any + Send)> {
        self.user_data.as_deref()
    }

    /// Mutably borrow the attached user data.
    pub fn user_data_mut(&mut self) -> Option<&mut (dyn Any + Send)> {
        self.user_data.as_deref_mut()
    }

    /// Remove and return the attached user data.
    pub fn take_user_data(&mut self) -> Option<Box<dyn Any + Send>> {
        self.user_data.take()
    }

    fn next_mask_key(&mut self) -> [u8; 4] {
        self.mask_seed = self.mask_seed.wrapping_add(0x9E37_79B9);
        let mut key = self.mask_seed;
        key = (key ^ (key >> 16)).wrapping_mul(0x85EB_CA6B);
        key = (key ^ (key >> 13)).wrapping_mul(0xC2B2_AE35);
        (key ^ (key >> 16)).to_le_bytes()
    }

    /// Rebind state for adoption by `group`: fresh identifier, and the
    /// sliding window adjusted to the destination's compression mode.
    pub(crate) fn rebind_to(&mut self, group: &Group<T>) {
        self.id = ConnectionId::next();
        let config = group.config();
        if self.compression_status == CompressionStatus::Disabled
            || !config.compression.is_enabled()
        {
            self.sliding_window = None;
        } else if config.compression == CompressionMode::SlidingWindow {
            if self.sliding_window.is_none() {
                self.sliding_window = Some(SlidingDeflateWindow::new(config.compression_level));
            }
        } else {
            self.sliding_window = None;
        }
    }
}

impl<T: Transport> Connection<T> {
    /// Send the HTTP 101 upgrade response through the write queue.
    ///
    /// `sec_key` is the client's `Sec-WebSocket-Key` header value;
    /// `extensions_response` and `subprotocols` are echoed per the rules
    /// of [`format_upgrade_response`].
    pub fn upgrade(
        &mut self,
        sec_key: &str,
        extensions_response: Option<&str>,
        subprotocols: Option<&str>,
    ) {
        let response = format_upgrade_response(sec_key, extensions_response, subprotocols);
        self.enqueue(response, None);
    }

    /// Frame and send a message.
    pub fn send(&mut self, group: &Group<T>, payload: &[u8], opcode: OpCode) {
        self.send_with(group, payload, opcode, SendOptions::default());
    }

    /// Frame and send a message with compression and completion options.
    ///
    /// On a closed connection nothing is enqueued and the callback fires
    /// immediately with `cancelled = true`. If the transport drains the
    /// frame synchronously the callback fires before this returns.
    pub fn send_with(
        &mut self,
        group: &Group<T>,
        payload: &[u8],
        opcode: OpCode,
        options: SendOptions<T>,
    ) {
        if self.closed {
            if let Some(callback) = options.callback {
                callback(Some(self), true);
            }
            return;
        }

        let compress = options.compress
            && self.compression_status == CompressionStatus::Enabled
            && opcode.is_data();
        let mask = if self.role.must_mask() {
            Some(self.next_mask_key())
        } else {
            None
        };

        let mut wire = Vec::with_capacity(payload.len() + 14);
        if compress {
            match group.deflate(payload, self.sliding_window.as_mut()) {
                Ok(deflated) => {
                    format_message(&mut wire, &deflated, opcode, true, mask);
                }
                Err(error) => {
                    tracing::debug!(%error, "deflate failed, sending uncompressed");
                    format_message(&mut wire, payload, opcode, false, mask);
                }
            }
        } else {
            format_message(&mut wire, payload, opcode, false, mask);
        }

        self.enqueue(wire, options.callback);
    }

    /// Send a ping and mark the pong as outstanding until any inbound
    /// byte arrives.
    pub fn ping(&mut self, group: &Group<T>, payload: &[u8]) {
        self.send(group, payload, OpCode::Ping);
        self.has_outstanding_pong = true;
    }

    fn enqueue(&mut self, data: Vec<u8>, callback: Option<SendCallback<T>>) {
        self.queue.push(PendingMessage::new(data, callback));
        self.flush_queue();
    }

    /// Drive the write queue from the socket's writability signal.
    /// Returns `true` when every pending buffer has drained.
    pub fn on_writable(&mut self) -> bool {
        self.flush_queue()
    }

    fn flush_queue(&mut self) -> bool {
        loop {
            if self.closed {
                return self.queue.is_empty();
            }
            let Some(front) = self.queue.front_mut() else {
                return true;
            };
            let pending = &front.data[front.written..];
            match self.transport.write(pending) {
                Ok(0) => return false,
                Ok(n) => {
                    front.written += n;
                    if front.written < front.data.len() {
                        return false;
                    }
                    let message = self.queue.pop().expect("front was present");
                    if let Some(callback) = message.callback {
                        callback(Some(self), false);
                    }
                }
                Err(error)
                    if error.kind() == io::ErrorKind::WouldBlock
                        || error.kind() == io::ErrorKind::Interrupted =>
                {
                    return false;
                }
                Err(error) => {
                    tracing::debug!(id = ?self.id, %error, "transport write failed");
                    let message = self.queue.pop().expect("front was present");
                    if let Some(callback) = message.callback {
                        callback(Some(self), true);
                    }
                    return false;
                }
            }
        }
    }

    /// Begin the close handshake and tear the connection down.
    ///
    /// The close frame (reason clamped to 123 bytes) goes out through the
    /// write queue; its completion half-closes the transport. Teardown
    /// does not wait for the peer's close echo: the disconnection handler
    /// runs before this returns. Idempotent on a closed connection.
    pub fn close(&mut self, group: &Group<T>, code: u16, reason: &[u8]) {
        if self.closed {
            return;
        }
        let reason = &reason[..reason.len().min(MAX_CLOSE_REASON)];
        self.shutting_down = true;

        // 1005 means "no code on the wire": send an empty close payload.
        let wire_code = if code == CLOSE_CODE_NO_STATUS { 0 } else { code };
        let mut payload = [0u8; MAX_CONTROL_PAYLOAD];
        let payload_len = format_close_payload(&mut payload, wire_code, reason);

        self.send_with(
            group,
            &payload[..payload_len],
            OpCode::Close,
            SendOptions {
                compress: false,
                callback: Some(Box::new(|conn, cancelled| {
                    if !cancelled {
                        if let Some(conn) = conn {
                            conn.transport.shutdown();
                        }
                    }
                })),
            },
        );

        self.on_end(group, code, reason);
    }

    /// Tear the connection down immediately without a close frame. The
    /// peer observes a bare TCP close; the application sees code 1006.
    /// Idempotent on a closed connection.
    pub fn terminate(&mut self, group: &Group<T>) {
        self.on_end(group, CLOSE_CODE_ABNORMAL, &[]);
    }

    pub(crate) fn force_close(&mut self, group: &Group<T>) {
        tracing::debug!(id = ?self.id, "force-closing connection");
        self.on_end(group, CLOSE_CODE_ABNORMAL, &[]);
    }

    /// Common teardown: runs at most once per connection lifetime.
    fn on_end(&mut self, group: &Group<T>, code: u16, reason: &[u8]) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::debug!(id = ?self.id, code, "connection closed");

        group.remove(self.id);
        group.dispatch_disconnection(self, code, reason);
        self.transport.close();

        while let Some(message) = self.queue.pop() {
            if let Some(callback) = message.callback {
                callback(None, true);
            }
        }

        self.sliding_window = None;
    }

    /// Feed raw bytes from the transport. Masked payloads are unmasked in
    /// place, which is why the buffer is taken mutably.
    ///
    /// Handlers fire from inside this call, in frame order. The sequence
    /// of handler invocations is independent of how the byte stream is
    /// chunked across calls.
    ///
    /// # Errors
    ///
    /// A protocol violation (framing, UTF-8, compression, size) has
    /// already force-closed the connection when this returns `Err`; the
    /// value is purely informational.
    pub fn on_data(&mut self, group: &Group<T>, data: &mut [u8]) -> Result<()> {
        self.has_outstanding_pong = false;
        if self.closed || self.shutting_down {
            return Ok(());
        }

        let mut input: &mut [u8] = data;
        loop {
            let slice = match self.decoder.next_slice(&mut input) {
                Ok(Some(slice)) => slice,
                Ok(None) => return Ok(()),
                Err(error) => {
                    tracing::debug!(id = ?self.id, %error, "protocol violation");
                    self.force_close(group);
                    return Err(error);
                }
            };
            match self.handle_fragment(group, slice) {
                Ok(false) => {}
                Ok(true) => return Ok(()),
                Err(error) => {
                    tracing::debug!(id = ?self.id, %error, "message rejected");
                    self.force_close(group);
                    return Err(error);
                }
            }
        }
    }

    /// Process one frame slice. Returns `true` when consumption must stop
    /// (the connection closed or began shutting down).
    fn handle_fragment(&mut self, group: &Group<T>, slice: FrameSlice<'_>) -> Result<bool> {
        if slice.opcode.is_data() {
            self.handle_data_slice(group, slice)
        } else {
            self.handle_control_slice(group, slice)
        }
    }

    fn handle_data_slice(&mut self, group: &Group<T>, slice: FrameSlice<'_>) -> Result<bool> {
        if slice.compressed {
            self.compression_status = CompressionStatus::CompressedFrame;
        }

        // Fast path: a complete unfragmented message in a single slice is
        // delivered straight from the input buffer.
        if slice.remaining == 0 && slice.fin && self.fragment_buffer.is_empty() {
            if self.compression_status == CompressionStatus::CompressedFrame {
                self.compression_status = CompressionStatus::Enabled;
                let inflated = group.inflate(slice.payload)?;
                if slice.opcode == OpCode::Text {
                    validate_utf8(&inflated)?;
                }
                group.dispatch_message(self, &inflated, slice.opcode);
            } else {
                if slice.opcode == OpCode::Text {
                    validate_utf8(slice.payload)?;
                }
                group.dispatch_message(self, slice.payload, slice.opcode);
            }
            return Ok(self.closed || self.shutting_down);
        }

        debug_assert_eq!(self.control_tip_len, 0);
        let accumulated = self.fragment_buffer.len() + slice.payload.len();
        if accumulated > group.config().max_payload {
            return Err(Error::MessageTooLarge {
                size: accumulated,
                max: group.config().max_payload,
            });
        }

        let last = slice.fin && slice.remaining == 0;
        if slice.opcode == OpCode::Text
            && self.compression_status != CompressionStatus::CompressedFrame
        {
            self.text_validator
                .get_or_insert_with(Utf8Validator::new)
                .feed(slice.payload, last)?;
        }
        self.fragment_buffer.extend_from_slice(slice.payload);

        if last {
            self.text_validator = None;
            let buffer = std::mem::take(&mut self.fragment_buffer);

            if self.compression_status == CompressionStatus::CompressedFrame {
                self.compression_status = CompressionStatus::Enabled;
                let inflated = group.inflate(&buffer)?;
                if slice.opcode == OpCode::Text {
                    validate_utf8(&inflated)?;
                }
                group.dispatch_message(self, &inflated, slice.opcode);
            } else {
                group.dispatch_message(self, &buffer, slice.opcode);
            }

            // Hand the allocation back for the next message.
            let mut buffer = buffer;
            buffer.clear();
            self.fragment_buffer = buffer;
            return Ok(self.closed || self.shutting_down);
        }

        Ok(false)
    }

    fn handle_control_slice(&mut self, group: &Group<T>, slice: FrameSlice<'_>) -> Result<bool> {
        // A control frame complete in one slice, with no partial control
        // accumulation, is acted on directly.
        if slice.remaining == 0 && slice.fin && self.control_tip_len == 0 {
            return Ok(self.act_on_control(group, slice.opcode, slice.payload));
        }

        // Otherwise it accumulates at the tail of the fragment buffer,
        // after any data fragments of the message it interleaves with.
        self.fragment_buffer.extend_from_slice(slice.payload);
        self.control_tip_len += slice.payload.len();

        if slice.remaining == 0 && slice.fin {
            let start = self.fragment_buffer.len() - self.control_tip_len;
            let control = self.fragment_buffer[start..].to_vec();
            self.fragment_buffer.truncate(start);
            self.control_tip_len = 0;
            return Ok(self.act_on_control(group, slice.opcode, &control));
        }

        Ok(false)
    }

    fn act_on_control(&mut self, group: &Group<T>, opcode: OpCode, payload: &[u8]) -> bool {
        match opcode {
            OpCode::Close => {
                let close = parse_close_payload(payload);
                let reason = close.reason.to_vec();
                self.close(group, close.code, &reason);
                true
            }
            OpCode::Ping => {
                self.send(group, payload, OpCode::Pong);
                group.dispatch_ping(self, payload);
                self.closed || self.shutting_down
            }
            OpCode::Pong => {
                group.dispatch_pong(self, payload);
                self.closed || self.shutting_down
            }
            _ => unreachable!("data opcode routed to control handling"),
        }
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("compression_status", &self.compression_status)
            .field("shutting_down", &self.shutting_down)
            .field("closed", &self.closed)
            .field("pending_writes", &self.queue.len())
            .finish_non_exhaustive()
    }
}

//! Outbound frame and close-payload formatting (RFC 6455 section 5).
//!
//! These are pure functions over byte buffers; all I/O and queueing lives
//! in the connection layer.

use crate::protocol::mask::apply_mask;
use crate::protocol::OpCode;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Maximum close reason length: control payload minus the 2-byte code.
pub const MAX_CLOSE_REASON: usize = 123;

/// Status code reported when a close payload carries no code.
pub const CLOSE_CODE_NO_STATUS: u16 = 1005;

/// Append a single frame to `dst` and return the number of bytes written.
///
/// The header is 2-14 bytes: FIN is always set (the engine does not emit
/// outbound fragments), RSV1 is set when `compressed` holds and the opcode
/// is a data opcode. When `mask` is provided (client role) the key is
/// appended and the payload masked while copying.
pub fn format_message(
    dst: &mut Vec<u8>,
    payload: &[u8],
    opcode: OpCode,
    compressed: bool,
    mask: Option<[u8; 4]>,
) -> usize {
    debug_assert!(
        !opcode.is_control() || payload.len() <= MAX_CONTROL_PAYLOAD,
        "control payload exceeds 125 bytes"
    );

    let start = dst.len();

    let mut byte0 = 0x80 | opcode.as_u8();
    if compressed && opcode.is_data() {
        byte0 |= 0x40;
    }
    dst.push(byte0);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if payload.len() <= 125 {
        dst.push(mask_bit | payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        dst.push(mask_bit | 0x7E);
        dst.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        dst.push(mask_bit | 0x7F);
        dst.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }

    if let Some(key) = mask {
        dst.extend_from_slice(&key);
        let payload_start = dst.len();
        dst.extend_from_slice(payload);
        apply_mask(&mut dst[payload_start..], key);
    } else {
        dst.extend_from_slice(payload);
    }

    dst.len() - start
}

/// Write a close payload (big-endian code followed by the reason) into
/// `dst` and return the number of bytes written.
///
/// A code of zero produces an empty payload. The reason is clamped to
/// [`MAX_CLOSE_REASON`] bytes.
pub fn format_close_payload(dst: &mut [u8], code: u16, reason: &[u8]) -> usize {
    if code == 0 {
        return 0;
    }
    let reason = &reason[..reason.len().min(MAX_CLOSE_REASON)];
    dst[..2].copy_from_slice(&code.to_be_bytes());
    dst[2..2 + reason.len()].copy_from_slice(reason);
    2 + reason.len()
}

/// A parsed close payload. The reason borrows the frame payload and is not
/// required to be valid UTF-8 here; the code is handed to the application
/// as the peer sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosePayload<'a> {
    /// Close status code, or [`CLOSE_CODE_NO_STATUS`] when absent.
    pub code: u16,
    /// Close reason bytes (empty when absent).
    pub reason: &'a [u8],
}

/// Parse a close frame payload.
///
/// Payloads shorter than two bytes yield [`CLOSE_CODE_NO_STATUS`] with an
/// empty reason.
#[must_use]
pub fn parse_close_payload(data: &[u8]) -> ClosePayload<'_> {
    if data.len() < 2 {
        return ClosePayload {
            code: CLOSE_CODE_NO_STATUS,
            reason: &[],
        };
    }
    ClosePayload {
        code: u16::from_be_bytes([data[0], data[1]]),
        reason: &data[2..],
    }
}

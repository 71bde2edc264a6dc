//! Streaming frame parser (RFC 6455 section 5.2).
//!
//! [`FrameDecoder`] consumes raw bytes in whatever chunk boundaries the
//! transport delivers and yields [`FrameSlice`]s: pieces of frame payload,
//! already unmasked in place, tagged with the frame's opcode, FIN bit and
//! the count of payload bytes still outstanding. A slice with
//! `remaining == 0` completes its frame. The decoder owns all header-level
//! protocol enforcement; any error it returns is fatal to the connection.

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::mask::apply_mask_offset;
use crate::protocol::OpCode;

/// Largest possible header: 2 fixed + 8 extended length + 4 mask key.
const MAX_HEADER: usize = 14;

/// A piece of frame payload produced by [`FrameDecoder::next_slice`].
#[derive(Debug)]
pub struct FrameSlice<'a> {
    /// Effective opcode: continuation slices carry the opcode of the frame
    /// that opened the message.
    pub opcode: OpCode,
    /// FIN bit of the frame this slice belongs to.
    pub fin: bool,
    /// RSV1 bit of the frame this slice belongs to (set only on the first
    /// frame of a compressed message).
    pub compressed: bool,
    /// Payload bytes, unmasked.
    pub payload: &'a mut [u8],
    /// Payload bytes of this frame still to arrive. Zero means the frame
    /// is complete.
    pub remaining: u64,
}

enum DecodeState {
    Header,
    Payload {
        opcode: OpCode,
        fin: bool,
        compressed: bool,
        remaining: u64,
        mask: Option<[u8; 4]>,
        mask_pos: usize,
    },
}

/// Incremental frame parser. One per connection; state persists across
/// [`next_slice`](FrameDecoder::next_slice) calls and input chunks.
pub struct FrameDecoder {
    role: Role,
    /// Whether permessage-deflate was negotiated, i.e. whether RSV1 is
    /// legal on a message-opening data frame.
    compression: bool,
    header: [u8; MAX_HEADER],
    header_len: usize,
    state: DecodeState,
    /// Opcode of the fragmented message in progress, if any.
    message_opcode: Option<OpCode>,
}

impl FrameDecoder {
    /// Create a decoder for the given role.
    #[must_use]
    pub fn new(role: Role, compression: bool) -> Self {
        Self {
            role,
            compression,
            header: [0; MAX_HEADER],
            header_len: 0,
            state: DecodeState::Header,
            message_opcode: None,
        }
    }

    /// Whether a fragmented message is currently open.
    #[must_use]
    pub fn mid_message(&self) -> bool {
        self.message_opcode.is_some()
    }

    /// Pull the next payload slice out of `input`, advancing it past the
    /// consumed bytes. Returns `Ok(None)` when `input` is exhausted before
    /// the next slice is complete; call again with more data.
    ///
    /// # Errors
    ///
    /// Any protocol violation detectable at the frame level: reserved
    /// bits, reserved opcodes, fragmented or oversized control frames,
    /// continuation misuse, and mask-direction violations.
    pub fn next_slice<'a>(&mut self, input: &mut &'a mut [u8]) -> Result<Option<FrameSlice<'a>>> {
        loop {
            match &mut self.state {
                DecodeState::Header => {
                    if !self.fill_header(input) {
                        return Ok(None);
                    }
                    self.begin_frame()?;
                }
                DecodeState::Payload {
                    opcode,
                    fin,
                    compressed,
                    remaining,
                    mask,
                    mask_pos,
                } => {
                    if *remaining == 0 {
                        let slice = FrameSlice {
                            opcode: *opcode,
                            fin: *fin,
                            compressed: *compressed,
                            payload: &mut [],
                            remaining: 0,
                        };
                        self.state = DecodeState::Header;
                        return Ok(Some(slice));
                    }
                    if input.is_empty() {
                        return Ok(None);
                    }

                    let take = (*remaining).min(input.len() as u64) as usize;
                    let buf = std::mem::take(input);
                    let (chunk, rest) = buf.split_at_mut(take);
                    *input = rest;

                    if let Some(key) = mask {
                        apply_mask_offset(chunk, *key, *mask_pos);
                        *mask_pos = (*mask_pos + take) % 4;
                    }
                    *remaining -= take as u64;

                    let slice = FrameSlice {
                        opcode: *opcode,
                        fin: *fin,
                        compressed: *compressed,
                        payload: chunk,
                        remaining: *remaining,
                    };
                    if slice.remaining == 0 {
                        self.state = DecodeState::Header;
                    }
                    return Ok(Some(slice));
                }
            }
        }
    }

    /// Copy header bytes out of `input` until the full header (whose size
    /// is only known progressively) is buffered. Returns `false` when more
    /// input is needed.
    fn fill_header(&mut self, input: &mut &mut [u8]) -> bool {
        loop {
            let needed = match self.header_len {
                0 | 1 => 2,
                n => {
                    let byte1 = self.header[1];
                    let ext = match byte1 & 0x7F {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let mask = if byte1 & 0x80 != 0 { 4 } else { 0 };
                    let total = 2 + ext + mask;
                    if n >= total {
                        return true;
                    }
                    total
                }
            };

            if input.is_empty() {
                return false;
            }
            let take = (needed - self.header_len).min(input.len());
            let buf = std::mem::take(input);
            let (chunk, rest) = buf.split_at_mut(take);
            *input = rest;
            self.header[self.header_len..self.header_len + take].copy_from_slice(chunk);
            self.header_len += take;
        }
    }

    /// Validate the buffered header and enter the payload state.
    fn begin_frame(&mut self) -> Result<()> {
        let byte0 = self.header[0];
        let byte1 = self.header[1];

        let fin = byte0 & 0x80 != 0;
        let rsv1 = byte0 & 0x40 != 0;
        if byte0 & 0x30 != 0 {
            return Err(Error::ReservedBitsSet);
        }
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;

        let masked = byte1 & 0x80 != 0;
        if self.role.expects_masked() && !masked {
            return Err(Error::UnmaskedFrame);
        }
        if !self.role.expects_masked() && masked {
            return Err(Error::MaskedFrame);
        }

        let (length, mask_offset) = match byte1 & 0x7F {
            126 => (
                u16::from_be_bytes([self.header[2], self.header[3]]) as u64,
                4,
            ),
            127 => {
                let len = u64::from_be_bytes([
                    self.header[2],
                    self.header[3],
                    self.header[4],
                    self.header[5],
                    self.header[6],
                    self.header[7],
                    self.header[8],
                    self.header[9],
                ]);
                if len & (1 << 63) != 0 {
                    return Err(Error::PayloadTooLarge(len));
                }
                (len, 10)
            }
            n => (n as u64, 2),
        };

        if rsv1 && !(self.compression && matches!(opcode, OpCode::Text | OpCode::Binary)) {
            return Err(Error::UnexpectedCompressionBit);
        }

        if opcode.is_control() {
            if !fin {
                return Err(Error::FragmentedControlFrame);
            }
            if length > crate::protocol::frame::MAX_CONTROL_PAYLOAD as u64 {
                return Err(Error::ControlFrameTooLarge(length as usize));
            }
        } else {
            match opcode {
                OpCode::Continuation => {
                    if self.message_opcode.is_none() {
                        return Err(Error::UnexpectedContinuation);
                    }
                }
                _ => {
                    if self.message_opcode.is_some() {
                        return Err(Error::ExpectedContinuation);
                    }
                }
            }
        }

        let effective = match opcode {
            OpCode::Continuation => self.message_opcode.unwrap_or(OpCode::Binary),
            other => other,
        };
        if opcode.is_data() {
            if fin {
                self.message_opcode = None;
            } else if opcode != OpCode::Continuation {
                self.message_opcode = Some(opcode);
            }
        }

        let mask = if masked {
            Some([
                self.header[mask_offset],
                self.header[mask_offset + 1],
                self.header[mask_offset + 2],
                self.header[mask_offset + 3],
            ])
        } else {
            None
        };

        self.header_len = 0;
        self.state = DecodeState::Payload {
            opcode: effective,
            fin,
            compressed: rsv1,
            remaining: length,
            mask,
            mask_pos: 0,
        };
        Ok(())
    }
}

//! WebSocket frame opcodes as defined in RFC 6455.

use crate::error::{Error, Result};

/// WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum OpCode {
    /// Continuation frame (0x0), carries a further fragment of the
    /// message opened by a preceding Text or Binary frame.
    Continuation = 0x0,
    /// Text frame (0x1). The complete message payload must be valid UTF-8.
    Text = 0x1,
    /// Binary frame (0x2).
    Binary = 0x2,
    /// Close frame (0x8).
    Close = 0x8,
    /// Ping frame (0x9). The receiver must answer with a Pong echoing the
    /// payload.
    Ping = 0x9,
    /// Pong frame (0xA).
    Pong = 0xA,
}

impl OpCode {
    /// Decode an opcode from its wire nibble.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReservedOpcode`] for reserved values
    /// (0x3-0x7, 0xB-0xF).
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Error::ReservedOpcode(other)),
        }
    }

    /// The wire nibble for this opcode.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this is a control opcode (Close, Ping, Pong).
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Whether this is a data opcode (Continuation, Text, Binary).
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, OpCode::Continuation | OpCode::Text | OpCode::Binary)
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OpCode::Continuation => "Continuation",
            OpCode::Text => "Text",
            OpCode::Binary => "Binary",
            OpCode::Close => "Close",
            OpCode::Ping => "Ping",
            OpCode::Pong => "Pong",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_valid() {
        assert_eq!(OpCode::from_u8(0x0).unwrap(), OpCode::Continuation);
        assert_eq!(OpCode::from_u8(0x1).unwrap(), OpCode::Text);
        assert_eq!(OpCode::from_u8(0x2).unwrap(), OpCode::Binary);
        assert_eq!(OpCode::from_u8(0x8).unwrap(), OpCode::Close);
        assert_eq!(OpCode::from_u8(0x9).unwrap(), OpCode::Ping);
        assert_eq!(OpCode::from_u8(0xA).unwrap(), OpCode::Pong);
    }

    #[test]
    fn test_from_u8_reserved() {
        for reserved in [0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert!(matches!(
                OpCode::from_u8(reserved),
                Err(Error::ReservedOpcode(b)) if b == reserved
            ));
        }
    }

    #[test]
    fn test_predicates() {
        assert!(OpCode::Continuation.is_data());
        assert!(OpCode::Text.is_data());
        assert!(OpCode::Binary.is_data());
        assert!(!OpCode::Close.is_data());

        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Text.is_control());
    }

    #[test]
    fn test_display() {
        assert_eq!(OpCode::Text.to_string(), "Text");
        assert_eq!(OpCode::Pong.to_string(), "Pong");
    }
}

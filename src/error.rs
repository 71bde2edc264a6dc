//! Error types for the WebSocket endpoint engine.
//!
//! Every variant here is fatal to its connection: the engine force-closes
//! the transport (no CLOSE frame is sent) before the error is surfaced to
//! the embedder.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the protocol engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Reserved bits set without a negotiated extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// RSV1 set on a frame that cannot carry compression (control or
    /// continuation frame, or compression not negotiated).
    #[error("RSV1 set on non-compressible frame")]
    UnexpectedCompressionBit,

    /// Reserved opcode used (0x3-0x7, 0xB-0xF).
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame with the FIN bit clear.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload longer than 125 bytes.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Continuation frame received with no message in progress.
    #[error("Continuation frame without a preceding data frame")]
    UnexpectedContinuation,

    /// New data frame received while a fragmented message is unfinished.
    #[error("Expected continuation frame")]
    ExpectedContinuation,

    /// Server received an unmasked frame.
    #[error("Client frame must be masked")]
    UnmaskedFrame,

    /// Client received a masked frame.
    #[error("Server frame must not be masked")]
    MaskedFrame,

    /// Declared payload length uses the reserved most significant bit.
    #[error("Payload length {0} exceeds protocol limits")]
    PayloadTooLarge(u64),

    /// Invalid UTF-8 in a text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Reassembled message exceeds the group's payload cap.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Accumulated message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Decompression failed or exceeded the payload cap.
    #[error("Inflate failed: {0}")]
    Inflate(String),

    /// Compression failed.
    #[error("Deflate failed: {0}")]
    Deflate(String),
}

//! Wire-level protocol primitives (RFC 6455, RFC 7692).

pub mod decoder;
pub mod frame;
pub mod mask;
pub mod opcode;
pub mod upgrade;
pub mod utf8;

pub use decoder::{FrameDecoder, FrameSlice};
pub use frame::{format_close_payload, format_message, parse_close_payload, ClosePayload};
pub use opcode::OpCode;
pub use upgrade::{compute_accept_key, format_upgrade_response, WS_GUID};
pub use utf8::{validate_utf8, Utf8Validator};

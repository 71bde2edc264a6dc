//! Connection state machine and role.

mod conn;
mod role;

pub use conn::{CompressionStatus, Connection, ConnectionId, SendOptions, CLOSE_CODE_ABNORMAL};
pub use role::Role;

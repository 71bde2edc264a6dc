//! The boundary to the socket layer.

use std::io;

/// Non-blocking byte sink the engine writes frames into.
///
/// Implementations wrap whatever the embedder's event loop hands out (a
/// TCP socket, a TLS session, a test buffer). All methods are invoked on
/// the connection's owning loop.
pub trait Transport {
    /// Attempt to write as much of `buf` as the socket will take without
    /// blocking. Returns the number of bytes accepted; zero (or
    /// [`io::ErrorKind::WouldBlock`]) means the socket is saturated and
    /// the engine should retry from its writability signal.
    ///
    /// # Errors
    ///
    /// Any other error marks the socket as failed; the affected buffer's
    /// completion callback is cancelled.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Half-close the write side after the final frame has drained.
    fn shutdown(&mut self);

    /// Close the socket entirely. Called once during connection teardown.
    fn close(&mut self);
}

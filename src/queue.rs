//! Ordered outbound buffer queue.
//!
//! Buffers stay queued until the transport reports them fully drained;
//! each carries an optional completion callback. Cancellation semantics
//! live in the connection: on teardown every pending callback fires once
//! with `cancelled = true`.

use std::collections::VecDeque;

use crate::connection::Connection;

/// Completion callback for a queued buffer.
///
/// Invoked exactly once: with the connection and `cancelled = false` when
/// the buffer has fully drained, or with `cancelled = true` when it was
/// dropped (send on a closed connection, write failure, or teardown). The
/// connection reference is `None` only while a closed connection's queue
/// is drained.
pub type SendCallback<T> = Box<dyn FnOnce(Option<&mut Connection<T>>, bool)>;

/// One queued outbound buffer.
pub(crate) struct PendingMessage<T> {
    pub(crate) data: Vec<u8>,
    /// Bytes of `data` already accepted by the transport.
    pub(crate) written: usize,
    pub(crate) callback: Option<SendCallback<T>>,
}

impl<T> PendingMessage<T> {
    pub(crate) fn new(data: Vec<u8>, callback: Option<SendCallback<T>>) -> Self {
        Self {
            data,
            written: 0,
            callback,
        }
    }
}

/// FIFO of pending outbound buffers for one connection.
pub(crate) struct WriteQueue<T> {
    messages: VecDeque<PendingMessage<T>>,
}

impl<T> WriteQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            messages: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, message: PendingMessage<T>) {
        self.messages.push_back(message);
    }

    pub(crate) fn pop(&mut self) -> Option<PendingMessage<T>> {
        self.messages.pop_front()
    }

    pub(crate) fn front_mut(&mut self) -> Option<&mut PendingMessage<T>> {
        self.messages.front_mut()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }
}

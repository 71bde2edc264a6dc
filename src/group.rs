//! Connection groups.
//!
//! A [`Group`] is a cohort of connections affinitised to one event loop,
//! sharing a configuration, a compression [`Hub`] and a set of handler
//! callbacks. Groups do not own their connections — the embedder's loop
//! does — they track membership and supply the callbacks the engine
//! dispatches into.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::config::GroupConfig;
use crate::connection::{Connection, ConnectionId};
use crate::deflate::{Hub, SlidingDeflateWindow};
use crate::error::Result;
use crate::protocol::OpCode;

/// Identifier of an event loop. Supplied by the embedder; two groups with
/// equal loop ids run on the same loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(pub u64);

type MessageHandler<T> = Box<dyn FnMut(&Group<T>, &mut Connection<T>, &[u8], OpCode)>;
type ControlHandler<T> = Box<dyn FnMut(&Group<T>, &mut Connection<T>, &[u8])>;
type DisconnectionHandler<T> = Box<dyn FnMut(&Group<T>, &mut Connection<T>, u16, &[u8])>;
type TransferHandler<T> = Box<dyn FnMut(&Group<T>, &mut Connection<T>)>;

/// A cohort of connections sharing a loop, a configuration and handlers.
///
/// Handler slots are taken out while they run, so a handler may freely
/// call back into the connection (send, close, even set a different
/// handler); re-entering the *same* slot from inside itself is not
/// supported and the nested dispatch is silently skipped.
pub struct Group<T> {
    loop_id: LoopId,
    config: GroupConfig,
    hub: RefCell<Hub>,
    members: RefCell<HashSet<ConnectionId>>,
    message_handler: RefCell<Option<MessageHandler<T>>>,
    ping_handler: RefCell<Option<ControlHandler<T>>>,
    pong_handler: RefCell<Option<ControlHandler<T>>>,
    disconnection_handler: RefCell<Option<DisconnectionHandler<T>>>,
    transfer_handler: RefCell<Option<TransferHandler<T>>>,
}

impl<T> Group<T> {
    /// Create a group bound to the given loop.
    #[must_use]
    pub fn new(loop_id: LoopId, config: GroupConfig) -> Self {
        let hub = Hub::new(config.compression_level);
        Self {
            loop_id,
            config,
            hub: RefCell::new(hub),
            members: RefCell::new(HashSet::new()),
            message_handler: RefCell::new(None),
            ping_handler: RefCell::new(None),
            pong_handler: RefCell::new(None),
            disconnection_handler: RefCell::new(None),
            transfer_handler: RefCell::new(None),
        }
    }

    /// The loop this group is bound to.
    #[must_use]
    pub fn loop_id(&self) -> LoopId {
        self.loop_id
    }

    /// The group's configuration.
    #[must_use]
    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Number of member connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.borrow().len()
    }

    /// Whether the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.borrow().is_empty()
    }

    /// Whether `id` is a member of this group.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.borrow().contains(&id)
    }

    /// Install the message handler: `(group, connection, payload, opcode)`.
    pub fn on_message(
        &self,
        handler: impl FnMut(&Group<T>, &mut Connection<T>, &[u8], OpCode) + 'static,
    ) {
        *self.message_handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Install the ping handler: `(group, connection, payload)`. The
    /// engine has already sent the answering pong when this runs.
    pub fn on_ping(&self, handler: impl FnMut(&Group<T>, &mut Connection<T>, &[u8]) + 'static) {
        *self.ping_handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Install the pong handler: `(group, connection, payload)`.
    pub fn on_pong(&self, handler: impl FnMut(&Group<T>, &mut Connection<T>, &[u8]) + 'static) {
        *self.pong_handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Install the disconnection handler: `(group, connection, code,
    /// reason)`. Invoked exactly once per connection lifetime; the
    /// connection is already closed for sending when it runs.
    pub fn on_disconnection(
        &self,
        handler: impl FnMut(&Group<T>, &mut Connection<T>, u16, &[u8]) + 'static,
    ) {
        *self.disconnection_handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Install the transfer handler: `(group, connection)`. Invoked on
    /// the destination group once an adopted connection is valid again.
    pub fn on_transfer(&self, handler: impl FnMut(&Group<T>, &mut Connection<T>) + 'static) {
        *self.transfer_handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Move `conn` to `dest` on the same loop. The destination's transfer
    /// handler fires before this returns.
    ///
    /// For a cross-loop move, use [`detach`](Group::detach), ship the
    /// connection value to the destination loop, and call
    /// [`adopt`](Group::adopt) there.
    pub fn transfer(&self, conn: &mut Connection<T>, dest: &Group<T>) {
        debug_assert_eq!(
            self.loop_id, dest.loop_id,
            "cross-loop transfer requires detach + adopt on the destination loop"
        );
        self.detach(conn);
        dest.adopt(conn);
    }

    /// Detach `conn` from this group. Until a destination group adopts
    /// it, the connection is invalid: its identifier is about to change
    /// and only user data correlates it across the move.
    pub fn detach(&self, conn: &mut Connection<T>) {
        tracing::trace!(id = ?conn.id(), "detaching connection");
        self.remove(conn.id());
    }

    /// Adopt a detached connection into this group, rebinding its
    /// compression state to this group's mode and invoking the transfer
    /// handler.
    pub fn adopt(&self, conn: &mut Connection<T>) {
        conn.rebind_to(self);
        self.add(conn.id());
        tracing::trace!(id = ?conn.id(), "adopted connection");
        self.dispatch_transfer(conn);
    }

    pub(crate) fn add(&self, id: ConnectionId) {
        self.members.borrow_mut().insert(id);
    }

    pub(crate) fn remove(&self, id: ConnectionId) {
        self.members.borrow_mut().remove(&id);
    }

    pub(crate) fn deflate(
        &self,
        data: &[u8],
        window: Option<&mut SlidingDeflateWindow>,
    ) -> Result<Vec<u8>> {
        self.hub.borrow_mut().deflate(data, window)
    }

    pub(crate) fn inflate(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.hub.borrow_mut().inflate(data, self.config.max_payload)
    }

    pub(crate) fn dispatch_message(&self, conn: &mut Connection<T>, data: &[u8], opcode: OpCode) {
        let taken = self.message_handler.borrow_mut().take();
        if let Some(mut handler) = taken {
            handler(self, conn, data, opcode);
            self.restore(&self.message_handler, handler);
        }
    }

    pub(crate) fn dispatch_ping(&self, conn: &mut Connection<T>, data: &[u8]) {
        let taken = self.ping_handler.borrow_mut().take();
        if let Some(mut handler) = taken {
            handler(self, conn, data);
            self.restore(&self.ping_handler, handler);
        }
    }

    pub(crate) fn dispatch_pong(&self, conn: &mut Connection<T>, data: &[u8]) {
        let taken = self.pong_handler.borrow_mut().take();
        if let Some(mut handler) = taken {
            handler(self, conn, data);
            self.restore(&self.pong_handler, handler);
        }
    }

    pub(crate) fn dispatch_disconnection(
        &self,
        conn: &mut Connection<T>,
        code: u16,
        reason: &[u8],
    ) {
        let taken = self.disconnection_handler.borrow_mut().take();
        if let Some(mut handler) = taken {
            handler(self, conn, code, reason);
            self.restore(&self.disconnection_handler, handler);
        }
    }

    pub(crate) fn dispatch_transfer(&self, conn: &mut Connection<T>) {
        let taken = self.transfer_handler.borrow_mut().take();
        if let Some(mut handler) = taken {
            handler(self, conn);
            self.restore(&self.transfer_handler, handler);
        }
    }

    /// Put a handler back into its slot unless the handler replaced
    /// itself while running.
    fn restore<H>(&self, slot: &RefCell<Option<H>>, handler: H) {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(handler);
        }
    }
}

impl<T> std::fmt::Debug for Group<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("loop_id", &self.loop_id)
            .field("config", &self.config)
            .field("members", &self.members.borrow().len())
            .finish_non_exhaustive()
    }
}

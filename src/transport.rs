//! The byte channel beneath a connection.
//!
//! A [`Transport`] moves opaque frames between two endpoints. It delivers
//! inbound frames on its own thread through the callback registered by
//! [`Transport::open`] and reports peer loss with [`TransportEvent::Closed`].

use std::io;

use bytes::Bytes;

pub mod memory;

pub use memory::MemoryTransport;

/// Something the transport observed on its receive side.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete frame from the peer.
    Bytes(Bytes),
    /// The peer went away; no further events follow.
    Closed,
}

/// Callback invoked on the transport's own thread for every event.
pub type ReceiveCallback = Box<dyn FnMut(TransportEvent) + Send + 'static>;

/// Platform channel used by a [`Connection`](crate::Connection).
pub trait Transport: Send + Sync + 'static {
    /// Start delivering inbound frames to `on_receive`.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be set up. A transport may only
    /// be opened once.
    fn open(&self, on_receive: ReceiveCallback) -> io::Result<()>;

    /// Transmit one frame. Returns `false` if the channel can no longer send.
    fn send_bytes(&self, bytes: Bytes) -> bool;

    /// Tear the channel down. Idempotent.
    fn invalidate(&self);
}

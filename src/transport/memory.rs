//! In-process transport connecting two endpoints with channels.

use std::{
    io,
    sync::{Mutex, PoisonError},
    thread,
};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ReceiveCallback, Transport, TransportEvent};

/// One end of an in-memory channel pair.
///
/// Frames sent on one end are delivered, in order, to the other end's
/// receive callback on a dedicated reader thread. Invalidating either end
/// closes the pair; the surviving end observes [`TransportEvent::Closed`].
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    /// The peer's sender into our receiver, held weakly so the reader still
    /// sees the peer hang up. Used to wake the reader on local invalidation.
    wake: mpsc::WeakUnboundedSender<Bytes>,
    closed: CancellationToken,
}

impl MemoryTransport {
    /// Create two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a_wake = b_tx.downgrade();
        let b_wake = a_tx.downgrade();
        (Self::new(a_tx, a_rx, a_wake), Self::new(b_tx, b_rx, b_wake))
    }

    fn new(
        tx: mpsc::UnboundedSender<Bytes>,
        rx: mpsc::UnboundedReceiver<Bytes>,
        wake: mpsc::WeakUnboundedSender<Bytes>,
    ) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            wake,
            closed: CancellationToken::new(),
        }
    }
}

impl Transport for MemoryTransport {
    fn open(&self, mut on_receive: ReceiveCallback) -> io::Result<()> {
        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "transport already open"))?;
        let closed = self.closed.clone();
        thread::Builder::new()
            .name("wirelink.memory-transport".into())
            .spawn(move || {
                while let Some(bytes) = rx.blocking_recv() {
                    if closed.is_cancelled() {
                        return;
                    }
                    on_receive(TransportEvent::Bytes(bytes));
                }
                if !closed.is_cancelled() {
                    on_receive(TransportEvent::Closed);
                }
            })?;
        Ok(())
    }

    fn send_bytes(&self, bytes: Bytes) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.send(bytes).is_ok())
    }

    fn invalidate(&self) {
        self.closed.cancel();
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        // Unpark the reader; it sees the cancellation and exits.
        if let Some(wake) = self.wake.upgrade() {
            let _ = wake.send(Bytes::new());
        }
    }
}

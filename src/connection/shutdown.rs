//! Invalidation and peer-close handling.

use std::sync::{Weak, atomic::Ordering};

use log::info;

use super::{Connection, lock};
use crate::dispatcher::SerialDispatcher;

impl Connection {
    /// Close the connection for good.
    ///
    /// Idempotent. Pending async reply handlers complete with `None` before
    /// this returns, blocked `send_sync` and `wait_for_message` calls fail
    /// with [`Error::InvalidConnection`](crate::Error::InvalidConnection),
    /// the client receives [`did_close`](super::MessageSink::did_close) once
    /// on its dispatcher and the transport is torn down asynchronously.
    pub fn invalidate(&self) {
        self.0.invalidated.cancel();
        let Some(client) = lock(&self.0.client).take() else {
            return;
        };

        lock(&self.0.overflow_callback).take();
        let sync_state = {
            let mut incoming = self.0.incoming.lock();
            incoming.receive_queues.clear();
            incoming.sync_state.take()
        };
        self.0.sync_replies.close();
        self.0.wait_for_message.close();
        if let Some(state) = sync_state.as_ref() {
            state.wake_up();
        }
        let cancelled = self.0.async_replies.cancel_all();

        if let Some(state) = sync_state {
            let dropped = state.forget_connection(self.0.id);
            if dropped > 0 {
                tracing::debug!(connection = %self.0.id, dropped, "discarded deferred messages");
            }
            let connection = self.clone();
            state
                .dispatcher()
                .dispatch(Box::new(move || notify_closed(&connection, &client)));
        }
        let connection = self.clone();
        self.0
            .connection_queue
            .dispatch(Box::new(move || connection.0.transport.invalidate()));

        info!(
            "connection invalidated: id={}, cancelled_async_replies={cancelled}",
            self.0.id
        );
    }

    /// The transport reported that the peer went away.
    pub(super) fn connection_did_close(&self) {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("connection closed by peer: id={}", self.0.id);
        self.0.invalidated.cancel();
        self.0.transport.invalidate();
        self.0.sync_replies.close();
        self.0.wait_for_message.close();
        self.0.outgoing.clear();
        if let Some(state) = self.sync_state() {
            state.wake_up();
        }

        let connection = self.clone();
        self.dispatch_to_client(move || connection.invalidate());
    }
}

fn notify_closed(connection: &Connection, client: &Weak<dyn super::MessageSink>) {
    if let Some(client) = client.upgrade() {
        client.did_close(connection);
    }
}

//! Delivery of received messages on the client's dispatcher.

use std::sync::atomic::Ordering;

use log::debug;

use super::{Connection, SyncReply, counter::ScopedCount};
use crate::{
    incoming::IncomingState,
    message::{AsyncReplyId, DispatchWhileWaiting, Message, MessageName},
    receive_queue::MessageReceiver,
};

impl Connection {
    /// Run `task` on the client's dispatcher, if the connection is open.
    pub(super) fn dispatch_to_client(&self, task: impl FnOnce() + Send + 'static) {
        let incoming = self.0.incoming.lock();
        self.dispatch_to_client_locked(&incoming, task);
    }

    pub(super) fn dispatch_to_client_locked(
        &self,
        incoming: &IncomingState,
        task: impl FnOnce() + Send + 'static,
    ) {
        if let Some(sync_state) = incoming.sync_state.as_ref() {
            sync_state.dispatcher().dispatch(Box::new(task));
        }
    }

    /// Deliver one batch of buffered messages, rescheduling if more remain.
    pub(super) fn dispatch_incoming_messages(&self) {
        if !self.is_valid() {
            return;
        }
        let (first, batch) = {
            let mut incoming = self.0.incoming.lock();
            let Some(first) = incoming.pop_front() else {
                return;
            };
            let remaining = incoming.len() + 1;
            let batch = incoming
                .throttle
                .as_mut()
                .map_or(remaining, |throttle| throttle.next_batch(remaining));
            if !incoming.is_empty() {
                let connection = self.clone();
                self.dispatch_to_client_locked(&incoming, move || connection.dispatch_incoming_messages());
            }
            (first, batch)
        };

        self.dispatch_message(first);
        for _ in 1..batch {
            let next = self.0.incoming.lock().pop_front();
            let Some(message) = next else { break };
            self.dispatch_message(message);
        }
    }

    pub(super) fn dispatch_one_incoming_message(&self) {
        let next = self.0.incoming.lock().pop_front();
        if let Some(message) = next {
            self.dispatch_message(message);
        }
    }

    /// Deliver this connection's deferred messages from a scheduled task.
    pub(crate) fn dispatch_sync_state_messages(&self) {
        if let Some(sync_state) = self.sync_state() {
            sync_state.dispatch_for_connection(self);
        }
    }

    /// Deliver `message` to its receive queue or to the client.
    pub(crate) fn dispatch_message(&self, mut message: Message) {
        let queue = {
            let incoming = self.0.incoming.lock();
            if incoming.sync_state.is_none() {
                return;
            }
            incoming.receive_queues.get(&message)
        };
        if let Some(queue) = queue {
            queue.enqueue_message(self, message);
            return;
        }
        let Some(client) = self.client() else {
            return;
        };

        let _while_waiting = (message.dispatch_while_waiting() != DispatchWhileWaiting::No)
            .then(|| ScopedCount::enter(&self.0.in_dispatch_while_waiting_count));

        if message.is_sync() {
            self.dispatch_sync_message(&mut message, |connection, message, reply| {
                client.did_receive_sync_message(connection, message, reply);
            });
        } else if message.is_async_reply() {
            let id = AsyncReplyId::from(message.destination_id());
            match self.0.async_replies.take(id) {
                Some(handler) => {
                    handler.complete(Some(message));
                    return;
                }
                None => message.mark_invalid(),
            }
        } else {
            client.did_receive_message(self, &mut message);
        }

        if !message.is_valid() && self.is_valid() {
            client.did_receive_invalid_message(self, message.name());
        }
    }

    /// Deliver `message` to a [`MessageReceiver`] registered through a
    /// [`DispatcherQueue`](crate::DispatcherQueue).
    pub fn dispatch_to_receiver(&self, receiver: &dyn MessageReceiver, mut message: Message) {
        if !self.is_valid() {
            return;
        }
        let _while_waiting = (message.dispatch_while_waiting() != DispatchWhileWaiting::No)
            .then(|| ScopedCount::enter(&self.0.in_dispatch_while_waiting_count));
        if message.is_sync() {
            self.dispatch_sync_message(&mut message, |connection, message, reply| {
                receiver.did_receive_sync_message(connection, message, reply);
            });
        } else {
            receiver.did_receive_message(self, &mut message);
        }
        if !message.is_valid() {
            self.dispatch_did_receive_invalid_message(message.name().clone());
        }
    }

    fn dispatch_sync_message(
        &self,
        message: &mut Message,
        handle: impl FnOnce(&Connection, &mut Message, SyncReply),
    ) {
        let Some(id) = message.sync_request_id() else {
            return;
        };
        let _in_sync = ScopedCount::enter(&self.0.in_dispatch_sync_count);
        debug!("dispatching sync request: id={}, request={id}, name={}", self.0.id, message.name());
        handle(self, message, SyncReply::new(self.clone(), id));
    }

    /// Tell the client a message could not be decoded or handled.
    pub(super) fn dispatch_did_receive_invalid_message(&self, name: MessageName) {
        let connection = self.clone();
        self.dispatch_to_client(move || {
            if let Some(client) = connection.client() {
                client.did_receive_invalid_message(&connection, &name);
            }
        });
    }

    /// Whether a sync request is being handled on this connection.
    #[must_use]
    pub fn is_handling_sync_message(&self) -> bool {
        self.0.in_dispatch_sync_count.load(Ordering::Acquire) > 0
    }
}

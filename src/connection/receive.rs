//! Inbound path: classification of received messages.
//!
//! Runs on the transport's thread. Nothing here calls into the client
//! directly; deliveries are dispatched onto the connection's dispatcher or a
//! receive queue.

use std::sync::Arc;

use log::{debug, error, warn};

use super::Connection;
use crate::{
    dispatcher::SerialDispatcher,
    error::Error,
    incoming::IncomingState,
    matcher::ReceiverMatcher,
    message::{AsyncReplyId, Message, MessageName},
    metrics::{self, Direction},
    receive_queue::{DispatcherQueue, MessageReceiveQueue, MessageReceiver},
    sync_reply::Resolution,
    throttle::EnqueueAction,
    transport::TransportEvent,
};

impl Connection {
    pub(super) fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Bytes(bytes) => match self.0.codec.decode(&bytes) {
                Ok(message) => {
                    metrics::inc_messages(Direction::Inbound);
                    self.process_incoming_message(message);
                }
                Err(e) => {
                    warn!("failed to decode message: id={}, error={e}", self.0.id);
                    metrics::inc_errors(Error::InvalidMessage);
                    self.dispatch_did_receive_invalid_message(MessageName::INVALID);
                }
            },
            TransportEvent::Closed => self.connection_did_close(),
        }
    }

    /// Route one received message.
    ///
    /// Called by the transport for every decoded frame; exposed for
    /// embedders that decode frames themselves. In order, a message is:
    /// matched to a blocked sync call, reported if invalid, handed to its
    /// async reply handler, claimed by a receive queue, handed to a blocked
    /// `wait_for_message`, parked for deferred dispatch, or queued for the
    /// client.
    pub fn process_incoming_message(&self, message: Message) {
        if message.is_sync_reply_or_cancel() {
            self.process_incoming_sync_reply(message);
            return;
        }
        if !message.is_valid() {
            self.dispatch_did_receive_invalid_message(message.name().clone());
            return;
        }

        let mut slot = self.0.wait_for_message.lock();
        let mut incoming = self.0.incoming.lock();
        let Some(sync_state) = incoming.sync_state.clone() else {
            debug!("dropping message for unopened connection: id={}, name={}", self.0.id, message.name());
            return;
        };

        if message.is_async_reply() {
            let id = AsyncReplyId::from(message.destination_id());
            if let Some(handler) = self.0.async_replies.take(id) {
                sync_state
                    .dispatcher()
                    .dispatch(Box::new(move || handler.complete(Some(message))));
                return;
            }
        }

        if let Some(queue) = incoming.receive_queues.get(&message) {
            queue.enqueue_message(self, message);
            return;
        }

        let mut message = message;
        if let Some(waiter) = slot.active_waiter() {
            if waiter.matches(&message) {
                waiter.message = Some(message);
                self.0.wait_for_message.notify();
                return;
            }
            if message.is_sync() {
                if waiter.options.dispatches_sync_messages() {
                    match sync_state.enqueue_for_deferred_dispatch(self, &mut incoming, message) {
                        Ok(()) => {
                            self.0.wait_for_message.notify();
                            return;
                        }
                        Err(returned) => message = returned,
                    }
                } else if waiter.options.interrupts_on_sync_message() {
                    waiter.interrupted = true;
                    self.0.wait_for_message.notify();
                    self.enqueue_incoming(&mut incoming, message);
                    return;
                }
            }
        }
        let has_waiter = slot.waiter.is_some();
        drop(slot);

        match sync_state.enqueue_for_deferred_dispatch(self, &mut incoming, message) {
            Ok(()) => {
                if has_waiter {
                    self.0.wait_for_message.notify();
                }
            }
            Err(message) => self.enqueue_incoming(&mut incoming, message),
        }
    }

    fn process_incoming_sync_reply(&self, message: Message) {
        let Some(id) = message.sync_request_id() else {
            self.dispatch_did_receive_invalid_message(message.name().clone());
            return;
        };
        let sync_state = self.sync_state();
        let resolution = self.0.sync_replies.resolve(id, message, || {
            sync_state.as_ref().and_then(|state| state.last_deferred_id())
        });
        match (resolution, sync_state) {
            (Resolution::Resolved, Some(state)) => state.wake_up(),
            (Resolution::Resolved, None) => {}
            (Resolution::Stray, _) => debug!("discarding stray sync reply: id={}, request={id}", self.0.id),
        }
    }

    /// Queue `message` for ordinary dispatch to the client.
    fn enqueue_incoming(&self, incoming: &mut IncomingState, message: Message) {
        if incoming.did_request_termination {
            return;
        }
        let depth = incoming.len();
        if let Some(throttle) = incoming.throttle.as_ref() {
            if matches!(throttle.evaluate_enqueue(depth), EnqueueAction::Kill) {
                incoming.did_request_termination = true;
                incoming.clear();
                error!("incoming queue overflowed, requesting peer termination: id={}, depth={depth}", self.0.id);
                let connection = self.clone();
                self.dispatch_to_client_locked(incoming, move || {
                    if let Some(client) = connection.client() {
                        client.request_remote_process_termination(&connection);
                    }
                });
                return;
            }
        }

        incoming.push_back(message);
        let throttled = incoming.throttle.is_some();
        if throttled && incoming.len() != 1 {
            return;
        }
        let connection = self.clone();
        if throttled {
            self.dispatch_to_client_locked(incoming, move || connection.dispatch_incoming_messages());
        } else {
            self.dispatch_to_client_locked(incoming, move || connection.dispatch_one_incoming_message());
        }
    }

    /// Route every message `matcher` selects to `queue` instead of the client.
    ///
    /// Matching messages already buffered or deferred for this connection
    /// move to `queue` immediately, oldest first.
    pub fn add_message_receive_queue(&self, queue: Arc<dyn MessageReceiveQueue>, matcher: ReceiverMatcher) {
        let mut incoming = self.0.incoming.lock();
        if let Some(sync_state) = incoming.sync_state.clone() {
            sync_state.enqueue_matching(self, queue.as_ref(), &matcher);
        }
        for message in incoming.take_matching(&matcher) {
            queue.enqueue_message(self, message);
        }
        if incoming.receive_queues.add(matcher, queue).is_some() {
            debug!("replaced message receive queue: id={}", self.0.id);
        }
    }

    /// Stop routing messages selected by `matcher`. Returns whether a queue
    /// was registered.
    pub fn remove_message_receive_queue(&self, matcher: &ReceiverMatcher) -> bool {
        self.0.incoming.lock().receive_queues.remove(matcher)
    }

    /// Deliver messages for `receiver_name` to `receiver` on `dispatcher`.
    ///
    /// A zero `destination_id` selects every destination.
    pub fn add_message_receiver(
        &self,
        dispatcher: Arc<dyn SerialDispatcher>,
        receiver: Arc<dyn MessageReceiver>,
        receiver_name: &'static str,
        destination_id: u64,
    ) {
        self.add_message_receive_queue(
            Arc::new(DispatcherQueue::new(dispatcher, receiver)),
            ReceiverMatcher::with_zero_as_any(receiver_name, destination_id),
        );
    }

    /// Undo [`add_message_receiver`](Self::add_message_receiver).
    pub fn remove_message_receiver(&self, receiver_name: &'static str, destination_id: u64) -> bool {
        self.remove_message_receive_queue(&ReceiverMatcher::with_zero_as_any(receiver_name, destination_id))
    }
}

//! Routing of selected messages away from the connection's client.
//!
//! A [`MessageReceiveQueue`] claims every message matching a
//! [`ReceiverMatcher`]. Claimed messages bypass the default dispatcher and
//! are handed straight to the queue from whichever thread received them,
//! so an implementation must only forward them to its own executor.

use std::{collections::HashMap, sync::Arc};

use crate::{
    connection::{Connection, SyncReply},
    dispatcher::SerialDispatcher,
    matcher::ReceiverMatcher,
    message::Message,
};

/// Destination for messages claimed by a [`ReceiverMatcher`].
pub trait MessageReceiveQueue: Send + Sync + 'static {
    /// Accept one message. Called with connection locks held; must not block
    /// or call back into `connection`.
    fn enqueue_message(&self, connection: &Connection, message: Message);
}

/// Handler for messages delivered through a [`DispatcherQueue`].
pub trait MessageReceiver: Send + Sync + 'static {
    fn did_receive_message(&self, connection: &Connection, message: &mut Message);

    /// Handle a sync request. Dropping `reply` unanswered cancels it.
    fn did_receive_sync_message(&self, connection: &Connection, message: &mut Message, reply: SyncReply) {
        let _ = (connection, message);
        drop(reply);
    }
}

/// Receive queue running a [`MessageReceiver`] on a chosen dispatcher.
pub struct DispatcherQueue {
    dispatcher: Arc<dyn SerialDispatcher>,
    receiver: Arc<dyn MessageReceiver>,
}

impl DispatcherQueue {
    #[must_use]
    pub fn new(dispatcher: Arc<dyn SerialDispatcher>, receiver: Arc<dyn MessageReceiver>) -> Self {
        Self { dispatcher, receiver }
    }
}

impl MessageReceiveQueue for DispatcherQueue {
    fn enqueue_message(&self, connection: &Connection, message: Message) {
        let connection = connection.clone();
        let receiver = Arc::clone(&self.receiver);
        self.dispatcher.dispatch(Box::new(move || {
            connection.dispatch_to_receiver(receiver.as_ref(), message);
        }));
    }
}

/// Registered receive queues for one connection.
#[derive(Default)]
pub(crate) struct ReceiveQueueMap {
    queues: HashMap<ReceiverMatcher, Arc<dyn MessageReceiveQueue>>,
}

impl ReceiveQueueMap {
    /// Register `queue`, returning any queue it replaced.
    pub(crate) fn add(
        &mut self,
        matcher: ReceiverMatcher,
        queue: Arc<dyn MessageReceiveQueue>,
    ) -> Option<Arc<dyn MessageReceiveQueue>> {
        self.queues.insert(matcher, queue)
    }

    pub(crate) fn remove(&mut self, matcher: &ReceiverMatcher) -> bool {
        self.queues.remove(matcher).is_some()
    }

    /// Find the queue claiming `message`, preferring an exact destination.
    pub(crate) fn get(&self, message: &Message) -> Option<Arc<dyn MessageReceiveQueue>> {
        if self.queues.is_empty() {
            return None;
        }
        let receiver = message.name().receiver().to_owned();
        self.queues
            .get(&ReceiverMatcher::exact(receiver.clone(), message.destination_id()))
            .or_else(|| self.queues.get(&ReceiverMatcher::any(receiver)))
            .cloned()
    }

    pub(crate) fn clear(&mut self) { self.queues.clear(); }
}

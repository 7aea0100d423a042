//! Received messages awaiting dispatch.
//!
//! One lock covers the buffered messages together with the state that must
//! change atomically with them: the receive-queue routes, the handle to the
//! dispatcher's [`SyncMessageState`] and the throttle.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    config::ThrottleConfig,
    matcher::ReceiverMatcher,
    message::{Message, MessageName},
    receive_queue::ReceiveQueueMap,
    sync_state::SyncMessageState,
    throttle::IncomingThrottle,
};

pub(crate) struct IncomingState {
    messages: VecDeque<Message>,
    pub(crate) receive_queues: ReceiveQueueMap,
    /// Present between a successful open and invalidation.
    pub(crate) sync_state: Option<Arc<SyncMessageState>>,
    pub(crate) throttle: Option<IncomingThrottle>,
    pub(crate) did_request_termination: bool,
}

impl IncomingState {
    pub(crate) fn len(&self) -> usize { self.messages.len() }

    pub(crate) fn is_empty(&self) -> bool { self.messages.is_empty() }

    pub(crate) fn push_back(&mut self, message: Message) { self.messages.push_back(message); }

    pub(crate) fn pop_front(&mut self) -> Option<Message> { self.messages.pop_front() }

    pub(crate) fn clear(&mut self) { self.messages.clear(); }

    /// Remove every buffered message, oldest first.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Message> + '_ { self.messages.drain(..) }

    /// Remove and return every message `matcher` selects, keeping the rest in
    /// order.
    pub(crate) fn take_matching(&mut self, matcher: &ReceiverMatcher) -> Vec<Message> {
        let (taken, kept): (VecDeque<_>, VecDeque<_>) =
            self.messages.drain(..).partition(|m| matcher.matches(m));
        self.messages = kept;
        taken.into()
    }

    /// Remove the oldest message named `name` for `destination_id`.
    pub(crate) fn take_first(&mut self, name: &MessageName, destination_id: u64) -> Option<Message> {
        let index = self
            .messages
            .iter()
            .position(|m| m.name() == name && m.destination_id() == destination_id)?;
        self.messages.remove(index)
    }

    pub(crate) fn has_sync_message(&self) -> bool { self.messages.iter().any(Message::is_sync) }
}

pub(crate) struct IncomingQueue {
    state: Mutex<IncomingState>,
}

impl IncomingQueue {
    pub(crate) fn new(throttling: Option<ThrottleConfig>) -> Self {
        Self {
            state: Mutex::new(IncomingState {
                messages: VecDeque::new(),
                receive_queues: ReceiveQueueMap::default(),
                sync_state: None,
                throttle: throttling.map(IncomingThrottle::new),
                did_request_termination: false,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, IncomingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::message::SyncRequestId;

    const LOAD: MessageName = MessageName::new("Page", "Load");
    const DRAW: MessageName = MessageName::new("Canvas", "Draw");

    #[allow(
        unused_braces,
        reason = "rustc false positive for single-line rstest fixtures"
    )]
    #[fixture]
    fn queue() -> IncomingQueue { IncomingQueue::new(None) }

    #[rstest]
    fn take_matching_preserves_order_of_rest(queue: IncomingQueue) {
        let mut state = queue.lock();
        for (name, destination) in [(LOAD, 1), (DRAW, 2), (LOAD, 3), (DRAW, 4)] {
            state.push_back(Message::new(name, destination, Vec::new()));
        }
        let taken = state.take_matching(&ReceiverMatcher::any("Canvas"));
        assert_eq!(taken.iter().map(Message::destination_id).collect::<Vec<_>>(), [2, 4]);
        let rest: Vec<u64> = state.drain().map(|m| m.destination_id()).collect();
        assert_eq!(rest, [1, 3]);
    }

    #[rstest]
    fn take_first_picks_oldest_match(queue: IncomingQueue) {
        let mut state = queue.lock();
        state.push_back(Message::new(LOAD, 1, vec![1_u8]));
        state.push_back(Message::new(LOAD, 1, vec![2_u8]));
        let first = state.take_first(&LOAD, 1).expect("buffered");
        assert_eq!(first.payload().as_ref(), &[1]);
        assert!(state.take_first(&LOAD, 9).is_none());
        assert_eq!(state.len(), 1);
    }

    #[rstest]
    fn detects_buffered_sync_request(queue: IncomingQueue) {
        let mut state = queue.lock();
        state.push_back(Message::new(LOAD, 0, Vec::new()));
        assert!(!state.has_sync_message());
        let mut request = Message::new(DRAW, 0, Vec::new());
        request.set_sync_request_id(SyncRequestId::generate());
        state.push_back(request);
        assert!(state.has_sync_message());
    }
}

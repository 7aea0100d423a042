//! Messages awaiting transmission.
//!
//! The queue is appended to by any sender and drained by one transmit pass
//! at a time on the connection's transport worker.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    deadline::{self, Deadline},
    message::{Message, MessageName},
};

/// Snapshot handed to the overflow callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverflowReport {
    /// Messages waiting to be sent when the report was taken.
    pub queue_length: usize,
    /// The most frequent message name in the queue and its count.
    pub most_common: Option<(MessageName, usize)>,
}

/// Result of appending a message.
#[derive(Debug)]
pub(crate) struct Appended {
    /// The queue was idle, so a transmit pass must be scheduled.
    pub(crate) was_empty: bool,
    pub(crate) overflow: Option<OverflowReport>,
}

#[derive(Default)]
struct OutgoingState {
    messages: VecDeque<Message>,
    transmitting: bool,
    last_warning: Option<Instant>,
}

impl OutgoingState {
    fn is_drained(&self) -> bool { self.messages.is_empty() && !self.transmitting }

    fn most_common(&self) -> Option<(MessageName, usize)> {
        let mut counts: HashMap<&MessageName, usize> = HashMap::new();
        for message in &self.messages {
            *counts.entry(message.name()).or_default() += 1;
        }
        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(name, count)| (name.clone(), count))
    }
}

#[derive(Default)]
pub(crate) struct OutgoingQueue {
    state: Mutex<OutgoingState>,
    drained: Condvar,
}

impl OutgoingQueue {
    fn lock(&self) -> MutexGuard<'_, OutgoingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `message`, reporting overflow at most once per `cooldown`.
    pub(crate) fn push(&self, message: Message, threshold: usize, cooldown: Duration) -> Appended {
        let mut state = self.lock();
        let was_empty = state.messages.is_empty();
        state.messages.push_back(message);
        let length = state.messages.len();
        let overflow = if length > threshold
            && state
                .last_warning
                .is_none_or(|last| last.elapsed() >= cooldown)
        {
            state.last_warning = Some(Instant::now());
            Some(OverflowReport {
                queue_length: length,
                most_common: state.most_common(),
            })
        } else {
            None
        };
        Appended { was_empty, overflow }
    }

    /// Take the next message for the running transmit pass.
    pub(crate) fn pop_for_transmit(&self) -> Option<Message> {
        let mut state = self.lock();
        let message = state.messages.pop_front();
        state.transmitting = message.is_some();
        if message.is_none() {
            self.drained.notify_all();
        }
        message
    }

    /// Mark the pass finished and wake flush waiters if nothing is left.
    pub(crate) fn finish_transmit(&self) {
        let mut state = self.lock();
        state.transmitting = false;
        if state.messages.is_empty() {
            self.drained.notify_all();
        }
    }

    pub(crate) fn clear(&self) {
        let mut state = self.lock();
        state.messages.clear();
        state.transmitting = false;
        self.drained.notify_all();
    }

    pub(crate) fn len(&self) -> usize { self.lock().messages.len() }

    /// Block until every queued message has been handed to the transport.
    ///
    /// Returns `false` if `deadline` passed first.
    pub(crate) fn wait_until_drained(&self, deadline: Deadline) -> bool {
        let state = self.lock();
        let (_state, timed_out) =
            deadline::wait_while(&self.drained, state, deadline, |state| !state.is_drained());
        !timed_out
    }
}

//! A [`MessageSink`] that records every callback.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use bytes::Bytes;
use wirelink::{Connection, Message, MessageName, MessageSink, SyncReply};

/// One observed callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Message {
        name: MessageName,
        destination_id: u64,
        payload: Bytes,
    },
    SyncMessage {
        name: MessageName,
        destination_id: u64,
        payload: Bytes,
    },
    InvalidMessage(MessageName),
    Closed,
    TerminationRequested,
}

impl SinkEvent {
    /// Name of the delivered message, if the event carries one.
    #[must_use]
    pub fn name(&self) -> Option<&MessageName> {
        match self {
            Self::Message { name, .. } | Self::SyncMessage { name, .. } | Self::InvalidMessage(name) => {
                Some(name)
            }
            Self::Closed | Self::TerminationRequested => None,
        }
    }
}

type MessageHook = Arc<dyn Fn(&Connection, &mut Message) + Send + Sync>;
type SyncHook = Arc<dyn Fn(&Connection, &mut Message, SyncReply) + Send + Sync>;

/// Records callbacks in arrival order and lets tests script responses.
///
/// Without a sync hook, sync requests are answered by echoing their payload.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    changed: Condvar,
    message_hook: Mutex<Option<MessageHook>>,
    sync_hook: Mutex<Option<SyncHook>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

impl RecordingSink {
    #[must_use]
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Run `hook` after recording each async message.
    pub fn set_message_hook(&self, hook: impl Fn(&Connection, &mut Message) + Send + Sync + 'static) {
        *lock(&self.message_hook) = Some(Arc::new(hook));
    }

    /// Answer sync requests with `hook` instead of echoing.
    pub fn set_sync_hook(&self, hook: impl Fn(&Connection, &mut Message, SyncReply) + Send + Sync + 'static) {
        *lock(&self.sync_hook) = Some(Arc::new(hook));
    }

    /// Snapshot of the events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<SinkEvent> { lock(&self.events).clone() }

    /// Names of delivered messages, sync and async, in order.
    #[must_use]
    pub fn names(&self) -> Vec<MessageName> {
        lock(&self.events)
            .iter()
            .filter(|e| matches!(e, SinkEvent::Message { .. } | SinkEvent::SyncMessage { .. }))
            .filter_map(SinkEvent::name)
            .cloned()
            .collect()
    }

    /// Number of `did_close` callbacks observed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| matches!(e, SinkEvent::Closed))
            .count()
    }

    /// Block until at least `count` events are recorded or `timeout`
    /// elapses. Returns whether the count was reached.
    pub fn wait_for_events(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = lock(&self.events);
        while events.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            events = self
                .changed
                .wait_timeout(events, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn record(&self, event: SinkEvent) {
        lock(&self.events).push(event);
        self.changed.notify_all();
    }
}

impl MessageSink for RecordingSink {
    fn did_receive_message(&self, connection: &Connection, message: &mut Message) {
        self.record(SinkEvent::Message {
            name: message.name().clone(),
            destination_id: message.destination_id(),
            payload: message.payload().clone(),
        });
        let hook = lock(&self.message_hook).clone();
        if let Some(hook) = hook {
            hook(connection, message);
        }
    }

    fn did_receive_sync_message(&self, connection: &Connection, message: &mut Message, reply: SyncReply) {
        self.record(SinkEvent::SyncMessage {
            name: message.name().clone(),
            destination_id: message.destination_id(),
            payload: message.payload().clone(),
        });
        let hook = lock(&self.sync_hook).clone();
        match hook {
            Some(hook) => hook(connection, message, reply),
            None => {
                let _ = reply.send(message.payload().clone());
            }
        }
    }

    fn did_close(&self, _connection: &Connection) { self.record(SinkEvent::Closed); }

    fn did_receive_invalid_message(&self, _connection: &Connection, name: &MessageName) {
        self.record(SinkEvent::InvalidMessage(name.clone()));
    }

    fn request_remote_process_termination(&self, _connection: &Connection) {
        self.record(SinkEvent::TerminationRequested);
    }
}

//! Deferred dispatch shared by every connection on one dispatcher.
//!
//! While a dispatcher thread is blocked in `send_sync` or
//! `wait_for_message`, messages flagged "dispatch while waiting" on any
//! connection bound to that dispatcher are parked here. The blocked thread
//! pumps them from its wait loop; otherwise a task scheduled on the
//! dispatcher delivers them.
//!
//! One [`SyncMessageState`] exists per live dispatcher. Connections hold it
//! through an `Arc`; a process-wide map of weak handles lets the next
//! connection opened on the same dispatcher find it.

use std::{
    collections::{HashSet, VecDeque},
    fmt,
    sync::{
        Arc, Condvar, LazyLock, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    connection::{Connection, ConnectionId},
    deadline::{self, Deadline},
    dispatcher::{DispatcherId, SerialDispatcher},
    incoming::IncomingState,
    matcher::ReceiverMatcher,
    message::{DispatchWhileWaiting, Message},
    receive_queue::MessageReceiveQueue,
};

static STATES: LazyLock<DashMap<DispatcherId, Weak<SyncMessageState>>> =
    LazyLock::new(DashMap::new);

static UNBOUNDED_SYNC_SCOPES: AtomicUsize = AtomicUsize::new(0);

/// Marks an unbounded synchronous wait in progress on this process.
///
/// Messages flagged [`DispatchWhileWaiting::YesDuringUnboundedSync`] are only
/// deferred while at least one scope is alive.
#[must_use = "the scope ends when dropped"]
pub struct UnboundedSyncScope(());

impl UnboundedSyncScope {
    pub fn new() -> Self {
        UNBOUNDED_SYNC_SCOPES.fetch_add(1, Ordering::AcqRel);
        Self(())
    }

    /// Whether any scope is alive.
    #[must_use]
    pub fn is_active() -> bool { UNBOUNDED_SYNC_SCOPES.load(Ordering::Acquire) > 0 }
}

impl Default for UnboundedSyncScope {
    fn default() -> Self { Self::new() }
}

impl Drop for UnboundedSyncScope {
    fn drop(&mut self) { UNBOUNDED_SYNC_SCOPES.fetch_sub(1, Ordering::AcqRel); }
}

/// Position of a message in the deferred FIFO.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct DeferredId(u64);

impl DeferredId {
    pub(crate) fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct DeferredMessage {
    connection: Connection,
    message: Message,
    id: DeferredId,
}

impl DeferredMessage {
    fn new(connection: &Connection, message: Message) -> Self {
        Self {
            connection: connection.clone(),
            message,
            id: DeferredId::generate(),
        }
    }
}

#[derive(Default)]
struct Pending {
    to_dispatch: VecDeque<DeferredMessage>,
    being_dispatched: VecDeque<DeferredMessage>,
    /// Connections with a dispatch task already queued on the dispatcher.
    scheduled: HashSet<ConnectionId>,
}

/// Binary semaphore shared by every blocked waiter on the dispatcher.
#[derive(Default)]
struct WakeSignal {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    fn signal(&self) {
        *self.signalled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.condvar.notify_all();
    }

    /// Consume a signal, waiting for one until `deadline`.
    fn wait(&self, deadline: Deadline) -> bool {
        let guard = self.signalled.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut guard, timed_out) =
            deadline::wait_while(&self.condvar, guard, deadline, |signalled| !*signalled);
        if timed_out {
            return false;
        }
        *guard = false;
        true
    }
}

pub(crate) struct SyncMessageState {
    dispatcher: Arc<dyn SerialDispatcher>,
    dispatcher_id: DispatcherId,
    pending: Mutex<Pending>,
    wake: WakeSignal,
}

impl SyncMessageState {
    /// Return the state for `dispatcher`, creating it on first use.
    pub(crate) fn for_dispatcher(dispatcher: Arc<dyn SerialDispatcher>) -> Arc<Self> {
        let id = dispatcher.id();
        match STATES.entry(id) {
            Entry::Occupied(mut entry) => {
                if let Some(state) = entry.get().upgrade() {
                    return state;
                }
                let state = Arc::new(Self::new(dispatcher));
                entry.insert(Arc::downgrade(&state));
                state
            }
            Entry::Vacant(entry) => {
                let state = Arc::new(Self::new(dispatcher));
                entry.insert(Arc::downgrade(&state));
                tracing::debug!(dispatcher = %id, "sync message state created");
                state
            }
        }
    }

    fn new(dispatcher: Arc<dyn SerialDispatcher>) -> Self {
        Self {
            dispatcher_id: dispatcher.id(),
            dispatcher,
            pending: Mutex::new(Pending::default()),
            wake: WakeSignal::default(),
        }
    }

    /// Whether a live state exists for `id`.
    #[cfg(test)]
    pub(crate) fn exists(id: DispatcherId) -> bool {
        STATES.get(&id).is_some_and(|weak| weak.strong_count() > 0)
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn dispatcher(&self) -> &Arc<dyn SerialDispatcher> { &self.dispatcher }

    /// Park `message` for dispatch while the dispatcher may be blocked.
    ///
    /// Called with the connection's incoming lock held. Returns the message
    /// unchanged when it is not eligible for deferred dispatch.
    pub(crate) fn enqueue_for_deferred_dispatch(
        &self,
        connection: &Connection,
        incoming: &mut IncomingState,
        message: Message,
    ) -> Result<(), Message> {
        match message.dispatch_while_waiting() {
            DispatchWhileWaiting::No => return Err(message),
            DispatchWhileWaiting::YesDuringUnboundedSync if !UnboundedSyncScope::is_active() => {
                return Err(message);
            }
            _ => {}
        }

        let newly_scheduled = {
            let mut pending = self.lock();
            let newly_scheduled = pending.scheduled.insert(connection.id());
            if message.maintains_ordering_with_async() {
                for earlier in incoming.drain() {
                    pending
                        .to_dispatch
                        .push_back(DeferredMessage::new(connection, earlier));
                }
            }
            tracing::debug!(connection = %connection.id(), name = %message.name(), "message deferred");
            pending
                .to_dispatch
                .push_back(DeferredMessage::new(connection, message));
            newly_scheduled
        };

        if newly_scheduled {
            let connection = connection.clone();
            self.dispatcher
                .dispatch(Box::new(move || connection.dispatch_sync_state_messages()));
        }
        self.wake_up();
        Ok(())
    }

    /// Dispatch every deferred message, oldest first.
    ///
    /// `will_dispatch` observes each message just before delivery.
    pub(crate) fn dispatch_all(&self, will_dispatch: Option<&mut dyn FnMut(&Connection, &Message)>) {
        {
            let mut pending = self.lock();
            let mut moved = std::mem::take(&mut pending.to_dispatch);
            pending.being_dispatched.append(&mut moved);
        }
        self.drain_being_dispatched(will_dispatch);
    }

    /// Dispatch deferred messages up to and including `last`.
    ///
    /// Does nothing if `last` is no longer queued.
    pub(crate) fn dispatch_until(&self, last: DeferredId) {
        {
            let mut pending = self.lock();
            let Some(index) = pending.to_dispatch.iter().position(|d| d.id == last) else {
                return;
            };
            let mut moved: VecDeque<_> = pending.to_dispatch.drain(..=index).collect();
            pending.being_dispatched.append(&mut moved);
        }
        self.drain_being_dispatched(None);
    }

    /// Dispatch only `connection`'s deferred messages and allow a new
    /// dispatch task to be scheduled for it.
    pub(crate) fn dispatch_for_connection(&self, connection: &Connection) {
        {
            let mut pending = self.lock();
            pending.scheduled.remove(&connection.id());
            let (mut mine, rest): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut pending.to_dispatch)
                .into_iter()
                .partition(|d| d.connection.id() == connection.id());
            pending.to_dispatch = rest;
            pending.being_dispatched.append(&mut mine);
        }
        self.drain_being_dispatched(None);
    }

    fn drain_being_dispatched(&self, mut will_dispatch: Option<&mut dyn FnMut(&Connection, &Message)>) {
        loop {
            let next = self.lock().being_dispatched.pop_front();
            let Some(deferred) = next else { break };
            if let Some(callback) = will_dispatch.as_mut() {
                callback(&deferred.connection, &deferred.message);
            }
            deferred.connection.dispatch_message(deferred.message);
        }
    }

    /// Identifier of the newest deferred message, if any.
    pub(crate) fn last_deferred_id(&self) -> Option<DeferredId> {
        self.lock().to_dispatch.back().map(|d| d.id)
    }

    /// Move `connection`'s deferred messages selected by `matcher` to `queue`.
    pub(crate) fn enqueue_matching(
        &self,
        connection: &Connection,
        queue: &dyn MessageReceiveQueue,
        matcher: &ReceiverMatcher,
    ) {
        let mut guard = self.lock();
        let pending = &mut *guard;
        let selected =
            |d: &DeferredMessage| d.connection.id() == connection.id() && matcher.matches(&d.message);
        for list in [&mut pending.to_dispatch, &mut pending.being_dispatched] {
            let (taken, kept): (VecDeque<_>, VecDeque<_>) =
                std::mem::take(list).into_iter().partition(selected);
            *list = kept;
            for deferred in taken {
                queue.enqueue_message(connection, deferred.message);
            }
        }
    }

    /// Discard everything deferred for `connection` once it is invalidated.
    ///
    /// Deferred entries hold the connection strongly; leaving them behind
    /// would keep it alive for as long as the dispatcher's state lives.
    pub(crate) fn forget_connection(&self, connection: ConnectionId) -> usize {
        let forgotten: Vec<DeferredMessage> = {
            let mut guard = self.lock();
            let pending = &mut *guard;
            pending.scheduled.remove(&connection);
            let mut forgotten = Vec::new();
            for list in [&mut pending.to_dispatch, &mut pending.being_dispatched] {
                let (taken, kept): (VecDeque<_>, VecDeque<_>) =
                    std::mem::take(list).into_iter().partition(|d| d.connection.id() == connection);
                *list = kept;
                forgotten.extend(taken);
            }
            forgotten
        };
        forgotten.len()
    }

    /// Whether a deferred sync request from `connection` is waiting.
    pub(crate) fn has_sync_message_for(&self, connection: ConnectionId) -> bool {
        self.lock()
            .to_dispatch
            .iter()
            .any(|d| d.connection.id() == connection && d.message.is_sync())
    }

    /// Block until woken or `deadline`. Returns `false` on timeout.
    pub(crate) fn wait(&self, deadline: Deadline) -> bool { self.wake.wait(deadline) }

    pub(crate) fn wake_up(&self) { self.wake.signal(); }
}

impl Drop for SyncMessageState {
    fn drop(&mut self) {
        STATES.remove_if(&self.dispatcher_id, |_, weak| weak.strong_count() == 0);
        tracing::debug!(dispatcher = %self.dispatcher_id, "sync message state released");
    }
}

impl fmt::Debug for SyncMessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncMessageState")
            .field("dispatcher", &self.dispatcher_id)
            .finish_non_exhaustive()
    }
}

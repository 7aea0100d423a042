//! Bidirectional message connection.
//!
//! A [`Connection`] pairs a [`Transport`] with a client-owned
//! [`SerialDispatcher`]. Bytes arrive on the transport's own thread, are
//! decoded and classified there, and are then either resolved in place
//! (sync replies), handed to a blocked waiter, parked for deferred dispatch
//! or queued for the client. Outbound messages are transmitted in order by a
//! per-connection work queue.
//!
//! Lock order, outermost first: wait-for-message slot, incoming queue,
//! deferred dispatch state. The outgoing queue, reply trackers and the client
//! slot are leaf locks.

mod counter;
mod dispatch;
mod receive;
mod registry;
mod reply;
mod send;
mod shutdown;
mod state;
mod sync;
mod wait;

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

pub use counter::active_connection_count;
use counter::ActiveConnection;
use log::{info, warn};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use reply::SyncReply;
pub use send::{OverflowCallback, SendOptions};
pub use sync::SendSyncOptions;
use tokio_util::sync::CancellationToken;

use crate::{
    async_reply::AsyncReplyRegistry,
    codec::{BincodeCodec, MessageCodec},
    config::ConnectionConfig,
    dispatcher::{SerialDispatcher, WorkQueue},
    error::OpenError,
    incoming::IncomingQueue,
    message::{Message, MessageName},
    outgoing::OutgoingQueue,
    sync_reply::SyncReplyTracker,
    sync_state::SyncMessageState,
    transport::{ReceiveCallback, Transport},
    wait_for_message::WaitForMessageState,
};

/// Callbacks through which a connection delivers traffic to its owner.
///
/// Every method runs on the dispatcher passed to [`Connection::open`].
pub trait MessageSink: Send + Sync + 'static {
    /// Handle an ordinary message, or a message flagged for delivery while
    /// the dispatcher waits on a sync reply.
    fn did_receive_message(&self, connection: &Connection, message: &mut Message);

    /// Handle a sync request. Dropping `reply` unanswered cancels it.
    fn did_receive_sync_message(&self, _connection: &Connection, _message: &mut Message, reply: SyncReply) {
        drop(reply);
    }

    /// The connection closed. Fires at most once, after which the sink
    /// receives nothing further.
    fn did_close(&self, connection: &Connection);

    /// A message could not be decoded or handled.
    fn did_receive_invalid_message(&self, connection: &Connection, name: &MessageName);

    /// The peer flooded the incoming queue past the kill threshold.
    fn request_remote_process_termination(&self, _connection: &Connection) {}
}

struct ConnectionInner {
    id: ConnectionId,
    config: ConnectionConfig,
    transport: Box<dyn Transport>,
    codec: Box<dyn MessageCodec>,
    /// Runs transmit passes and transport teardown off the caller's thread.
    connection_queue: Arc<WorkQueue>,
    client: Mutex<Option<Weak<dyn MessageSink>>>,
    opened: AtomicBool,
    invalidated: CancellationToken,
    /// Set once the peer-close path has run.
    closed: AtomicBool,
    outgoing: OutgoingQueue,
    incoming: IncomingQueue,
    sync_replies: SyncReplyTracker,
    wait_for_message: WaitForMessageState,
    async_replies: AsyncReplyRegistry,
    in_dispatch_sync_count: AtomicUsize,
    in_dispatch_while_waiting_count: AtomicUsize,
    overflow_callback: Mutex<Option<OverflowCallback>>,
    _active: ActiveConnection,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        registry::global().remove(&self.id);
        self.async_replies.cancel_all();
        self.transport.invalidate();
        log::debug!("connection dropped: id={}", self.id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> { mutex.lock().unwrap_or_else(PoisonError::into_inner) }

/// Shared handle to one end of a message channel.
///
/// Cloning is cheap and every clone refers to the same connection.
#[derive(Clone)]
pub struct Connection(Arc<ConnectionInner>);

impl Connection {
    /// Create a connection over `transport` using the default codec.
    ///
    /// The connection is inert until [`open`](Self::open) binds a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection's transmit worker cannot be spawned.
    pub fn new<T: Transport>(transport: T, config: ConnectionConfig) -> std::io::Result<Self> {
        Self::with_codec(transport, BincodeCodec, config)
    }

    /// Create a connection with a custom envelope codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection's transmit worker cannot be spawned.
    pub fn with_codec<T: Transport, C: MessageCodec>(
        transport: T,
        codec: C,
        config: ConnectionConfig,
    ) -> std::io::Result<Self> {
        let id = ConnectionId::generate();
        let connection_queue = WorkQueue::new(format!("wirelink.connection-queue.{}", id.as_u64()))?;
        let inner = Arc::new(ConnectionInner {
            id,
            transport: Box::new(transport),
            codec: Box::new(codec),
            connection_queue,
            client: Mutex::new(None),
            opened: AtomicBool::new(false),
            invalidated: CancellationToken::new(),
            closed: AtomicBool::new(false),
            outgoing: OutgoingQueue::default(),
            incoming: IncomingQueue::new(config.throttling()),
            sync_replies: SyncReplyTracker::default(),
            wait_for_message: WaitForMessageState::default(),
            async_replies: AsyncReplyRegistry::default(),
            in_dispatch_sync_count: AtomicUsize::new(0),
            in_dispatch_while_waiting_count: AtomicUsize::new(0),
            overflow_callback: Mutex::new(None),
            config,
            _active: ActiveConnection::new(),
        });
        registry::global().insert(id, Arc::downgrade(&inner));
        log::debug!("connection created: id={id}");
        Ok(Self(inner))
    }

    /// Bind `client` and `dispatcher` and start receiving.
    ///
    /// The connection holds `client` weakly; callbacks stop once it is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`OpenError::AlreadyOpen`] if a client is already bound or the
    /// connection was invalidated, and [`OpenError::Transport`] if the
    /// transport fails to start. A failed open leaves the connection
    /// unbound so it may be retried.
    pub fn open<S: MessageSink>(
        &self,
        client: &Arc<S>,
        dispatcher: Arc<dyn SerialDispatcher>,
    ) -> Result<(), OpenError> {
        if self.0.invalidated.is_cancelled() {
            return Err(OpenError::AlreadyOpen);
        }
        {
            let mut slot = lock(&self.0.client);
            if slot.is_some() {
                return Err(OpenError::AlreadyOpen);
            }
            let weak = Arc::downgrade(client);
            let weak: Weak<dyn MessageSink> = weak;
            *slot = Some(weak);
        }

        let dispatcher_id = dispatcher.id();
        self.0.incoming.lock().sync_state = Some(SyncMessageState::for_dispatcher(dispatcher));
        self.0.opened.store(true, Ordering::Release);

        let weak = Arc::downgrade(&self.0);
        let on_receive: ReceiveCallback = Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                Connection(inner).handle_transport_event(event);
            }
        });
        if let Err(e) = self.0.transport.open(on_receive) {
            self.0.opened.store(false, Ordering::Release);
            self.0.incoming.lock().sync_state = None;
            lock(&self.0.client).take();
            warn!("transport failed to open: id={}, error={e}", self.0.id);
            return Err(OpenError::Transport(e));
        }

        info!("connection opened: id={}, dispatcher={dispatcher_id}", self.0.id);
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId { self.0.id }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig { &self.0.config }

    /// `true` between a successful [`open`](Self::open) and invalidation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0.opened.load(Ordering::Acquire) && !self.0.invalidated.is_cancelled()
    }

    /// Find a live connection by id.
    #[must_use]
    pub fn lookup(id: ConnectionId) -> Option<Self> { registry::global().get(&id) }

    /// The registry of every live connection in the process.
    #[must_use]
    pub fn registry() -> &'static ConnectionRegistry { registry::global() }

    /// Dispatcher bound by [`open`](Self::open), until invalidation.
    #[must_use]
    pub fn dispatcher(&self) -> Option<Arc<dyn SerialDispatcher>> {
        self.sync_state().map(|state| Arc::clone(state.dispatcher()))
    }

    /// Received messages waiting for the client.
    #[must_use]
    pub fn pending_message_count(&self) -> usize { self.0.incoming.lock().len() }

    /// Whether a sync request from the peer is queued or deferred.
    #[must_use]
    pub fn has_incoming_sync_message(&self) -> bool {
        let incoming = self.0.incoming.lock();
        incoming.has_sync_message()
            || incoming
                .sync_state
                .as_ref()
                .is_some_and(|state| state.has_sync_message_for(self.0.id))
    }

    /// Messages accepted by `send` but not yet handed to the transport.
    #[must_use]
    pub fn outgoing_message_count(&self) -> usize { self.0.outgoing.len() }

    /// Sync calls currently blocked on this connection.
    #[must_use]
    pub fn pending_sync_reply_count(&self) -> usize { self.0.sync_replies.depth() }

    /// Registered async reply handlers.
    #[must_use]
    pub fn pending_async_reply_count(&self) -> usize { self.0.async_replies.len() }

    fn sync_state(&self) -> Option<Arc<SyncMessageState>> { self.0.incoming.lock().sync_state.clone() }

    fn client(&self) -> Option<Arc<dyn MessageSink>> {
        lock(&self.0.client).as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.0.id)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl Eq for Connection {}

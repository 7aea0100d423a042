//! Two connections joined by an in-memory transport.

use std::{
    error::Error,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use rstest::fixture;
use wirelink::{Connection, ConnectionConfig, MemoryTransport, WorkQueue};

use crate::sink::RecordingSink;

/// Error type returned by the helpers.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Both ends of an open connection, each on its own dispatcher.
///
/// Dropping the pair invalidates both connections.
pub struct ConnectedPair {
    pub client: Connection,
    pub server: Connection,
    pub client_sink: Arc<RecordingSink>,
    pub server_sink: Arc<RecordingSink>,
    pub client_queue: Arc<WorkQueue>,
    pub server_queue: Arc<WorkQueue>,
}

impl ConnectedPair {
    /// Open a pair with the same configuration on both ends.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned or either end
    /// fails to open.
    pub fn open(config: ConnectionConfig) -> Result<Self, BoxError> {
        Self::open_with(config, config)
    }

    /// Open a pair with distinct client and server configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned or either end
    /// fails to open.
    pub fn open_with(client_config: ConnectionConfig, server_config: ConnectionConfig) -> Result<Self, BoxError> {
        let client_queue = WorkQueue::new("wirelink.test.client")?;
        Self::open_on(client_queue, client_config, server_config)
    }

    /// Open a pair whose client end is bound to an existing dispatcher.
    ///
    /// Pairs opened on the same `client_queue` share its deferred dispatch
    /// state, as connections of one process sharing a run loop do.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned or either end
    /// fails to open.
    pub fn sharing(client_queue: &Arc<WorkQueue>, config: ConnectionConfig) -> Result<Self, BoxError> {
        Self::open_on(Arc::clone(client_queue), config, config)
    }

    fn open_on(
        client_queue: Arc<WorkQueue>,
        client_config: ConnectionConfig,
        server_config: ConnectionConfig,
    ) -> Result<Self, BoxError> {
        let (client_end, server_end) = MemoryTransport::pair();
        let client = Connection::new(client_end, client_config)?;
        let server = Connection::new(server_end, server_config)?;
        let server_queue = WorkQueue::new("wirelink.test.server")?;
        let client_sink = RecordingSink::new();
        let server_sink = RecordingSink::new();
        server.open(&server_sink, server_queue.clone())?;
        client.open(&client_sink, client_queue.clone())?;
        Ok(Self {
            client,
            server,
            client_sink,
            server_sink,
            client_queue,
            server_queue,
        })
    }
}

impl Drop for ConnectedPair {
    fn drop(&mut self) {
        self.client.invalidate();
        self.server.invalidate();
    }
}

/// A pair using the default configuration.
///
/// # Panics
///
/// Panics if the pair cannot be opened.
#[fixture]
pub fn pair() -> ConnectedPair {
    ConnectedPair::open(ConnectionConfig::default()).unwrap_or_else(|e| panic!("failed to open pair: {e}"))
}

/// Run `task` on `queue` and wait for its result.
///
/// # Panics
///
/// Panics if the task panics.
pub fn run_on<R, F>(queue: &WorkQueue, task: F) -> R
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    queue
        .run_blocking(task)
        .unwrap_or_else(|| panic!("task on {} panicked", queue.name()))
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

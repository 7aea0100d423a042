//! Serial execution contexts.
//!
//! Every application-visible callback runs on a [`SerialDispatcher`]. The
//! connection also keeps a private [`WorkQueue`] as its transport worker.
//! Several connections may share one dispatcher; per-dispatcher state is
//! keyed by [`DispatcherId`].

use std::{
    any::Any,
    fmt, io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
};

use log::error;
use tokio::sync::mpsc;

/// A unit of work submitted to a dispatcher.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identity of a dispatcher, stable for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DispatcherId(u64);

impl DispatcherId {
    /// Mint a fresh identifier for a new dispatcher implementation.
    #[must_use]
    pub fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn as_u64(self) -> u64 { self.0 }
}

impl fmt::Display for DispatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DispatcherId({})", self.0)
    }
}

/// An execution context that runs submitted tasks one at a time, in order.
pub trait SerialDispatcher: Send + Sync + 'static {
    /// Identity used to share per-dispatcher state between connections.
    fn id(&self) -> DispatcherId;

    /// Queue `task` to run after every previously dispatched task.
    fn dispatch(&self, task: Task);

    /// `true` when called from inside one of this dispatcher's tasks.
    fn is_current(&self) -> bool;
}

/// A dispatcher backed by a dedicated, named thread.
///
/// Tasks are fed through an unbounded channel. The thread exits once the
/// queue is dropped and every pending task has run. A panicking task is
/// logged and the thread carries on with the next one.
pub struct WorkQueue {
    id: DispatcherId,
    name: String,
    thread: ThreadId,
    tx: mpsc::UnboundedSender<Task>,
}

impl WorkQueue {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses to create a thread.
    pub fn new(name: impl Into<String>) -> io::Result<Arc<Self>> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            while let Some(task) = rx.blocking_recv() {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                    let panic_msg = panic_message(panic.as_ref());
                    error!("work queue task panicked: queue={thread_name}, panic={panic_msg}");
                    crate::metrics::inc_task_panics();
                }
            }
        })?;
        Ok(Arc::new(Self {
            id: DispatcherId::generate(),
            name,
            thread: handle.thread().id(),
            tx,
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Run `task` on this queue and block until it finishes.
    ///
    /// Returns `None` if the task panicked or the queue stopped first.
    /// Must not be called from the queue's own thread.
    pub fn run_blocking<R, F>(&self, task: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        debug_assert!(!self.is_current(), "run_blocking would deadlock");
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.dispatch(Box::new(move || {
            let _ = tx.send(task());
        }));
        rx.blocking_recv().ok()
    }
}

impl SerialDispatcher for WorkQueue {
    fn id(&self) -> DispatcherId { self.id }

    fn dispatch(&self, task: Task) {
        if self.tx.send(task).is_err() {
            error!("work queue stopped, dropping task: queue={}", self.name);
        }
    }

    fn is_current(&self) -> bool { thread::current().id() == self.thread }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&'static str>().copied())
        .unwrap_or("<non-string panic payload>")
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn tasks_run_in_submission_order() {
        let queue = WorkQueue::new("test.order").expect("spawn");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            queue.dispatch(Box::new(move || seen.lock().expect("lock").push(i)));
        }
        queue.run_blocking(|| ()).expect("drain");
        assert_eq!(*seen.lock().expect("lock"), vec![0, 1, 2, 3, 4]);
    }

    #[rstest]
    fn is_current_only_on_worker_thread() {
        let queue = WorkQueue::new("test.current").expect("spawn");
        assert!(!queue.is_current());
        let inner = Arc::clone(&queue);
        assert_eq!(queue.run_blocking(move || inner.is_current()), Some(true));
    }

    #[rstest]
    fn panicking_task_does_not_stop_queue() {
        let queue = WorkQueue::new("test.panic").expect("spawn");
        queue.dispatch(Box::new(|| panic!("boom")));
        assert_eq!(queue.run_blocking(|| 7), Some(7));
    }

    #[rstest]
    #[case::str(Box::new("boom"), "boom")]
    #[case::string(Box::new(String::from("boom")), "boom")]
    #[case::other(Box::new(5_u32), "<non-string panic payload>")]
    fn panic_payloads_are_described(#[case] payload: Box<dyn Any + Send>, #[case] expected: &str) {
        assert_eq!(panic_message(payload.as_ref()), expected);
    }
}

//! Completion handlers for asynchronous requests.
//!
//! Each handler is invoked exactly once: with the reply, or with `None` when
//! the request is cancelled, the connection is invalidated, or the handler
//! is dropped unused. Taking a handler out of the registry is the only way
//! to complete it, so a reply racing a cancellation resolves to whichever
//! side removes the entry first.

use std::{
    collections::HashMap,
    fmt, mem,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::message::{AsyncReplyId, Message};

/// Callback receiving an async reply, or `None` if none will arrive.
pub type AsyncReplyCompletion = Box<dyn FnOnce(Option<Message>) + Send + 'static>;

/// A registered completion that fires at most once and never zero times.
pub(crate) struct AsyncReplyHandler {
    completion: Option<AsyncReplyCompletion>,
}

impl AsyncReplyHandler {
    pub(crate) fn new(completion: impl FnOnce(Option<Message>) + Send + 'static) -> Self {
        Self {
            completion: Some(Box::new(completion)),
        }
    }

    pub(crate) fn complete(mut self, reply: Option<Message>) {
        if let Some(completion) = self.completion.take() {
            completion(reply);
        }
    }
}

impl Drop for AsyncReplyHandler {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion(None);
        }
    }
}

impl fmt::Debug for AsyncReplyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncReplyHandler")
            .field("pending", &self.completion.is_some())
            .finish()
    }
}

#[derive(Default)]
pub(crate) struct AsyncReplyRegistry {
    handlers: Mutex<HashMap<AsyncReplyId, AsyncReplyHandler>>,
}

impl AsyncReplyRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<AsyncReplyId, AsyncReplyHandler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, id: AsyncReplyId, handler: AsyncReplyHandler) {
        let replaced = self.lock().insert(id, handler);
        debug_assert!(replaced.is_none(), "async reply id {id} registered twice");
        if let Some(old) = replaced {
            old.complete(None);
        }
    }

    pub(crate) fn take(&self, id: AsyncReplyId) -> Option<AsyncReplyHandler> { self.lock().remove(&id) }

    /// Complete every registered handler with `None`.
    ///
    /// Handlers run after the registry lock is released so they may send.
    pub(crate) fn cancel_all(&self) -> usize {
        let drained = mem::take(&mut *self.lock());
        let count = drained.len();
        for handler in drained.into_values() {
            handler.complete(None);
        }
        count
    }

    pub(crate) fn len(&self) -> usize { self.lock().len() }
}

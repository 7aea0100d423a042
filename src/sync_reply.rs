//! Outstanding synchronous requests for one connection.
//!
//! Pending calls form a stack: a sync call made while dispatching during
//! another call's wait must complete first. Popping out of order is a
//! programming error and panics.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{
    error::Error,
    message::{Message, SyncRequestId},
    sync_state::DeferredId,
};

#[derive(Debug)]
struct PendingSyncReply {
    id: SyncRequestId,
    reply: Option<Message>,
    /// Last deferred message queued before the reply arrived.
    last_deferred: Option<DeferredId>,
}

/// State of the pending call polled by its waiter.
#[derive(Debug)]
pub(crate) enum ReplyPoll {
    Pending,
    Ready {
        reply: Message,
        last_deferred: Option<DeferredId>,
    },
    /// The connection stopped waiting for replies.
    Closed,
}

/// Outcome of routing an incoming reply.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    Resolved,
    /// No pending call has this id, typically because it already timed out.
    Stray,
}

struct TrackerState {
    stack: Vec<PendingSyncReply>,
    accepting: bool,
}

pub(crate) struct SyncReplyTracker {
    state: Mutex<TrackerState>,
}

impl Default for SyncReplyTracker {
    fn default() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                stack: Vec::new(),
                accepting: true,
            }),
        }
    }
}

impl SyncReplyTracker {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin tracking a call.
    pub(crate) fn push(&self, id: SyncRequestId) -> Result<(), Error> {
        let mut state = self.lock();
        if !state.accepting {
            return Err(Error::CantWaitForSyncReplies);
        }
        state.stack.push(PendingSyncReply {
            id,
            reply: None,
            last_deferred: None,
        });
        Ok(())
    }

    /// Stop tracking the innermost call, which must be `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not on top of the stack.
    pub(crate) fn pop(&self, id: SyncRequestId) {
        let mut state = self.lock();
        let top = state.stack.pop();
        assert_eq!(
            top.as_ref().map(|pending| pending.id),
            Some(id),
            "sync replies must complete innermost first"
        );
    }

    /// Take the reply for `id` if it has arrived.
    pub(crate) fn poll(&self, id: SyncRequestId) -> ReplyPoll {
        let mut state = self.lock();
        let accepting = state.accepting;
        let Some(pending) = state.stack.iter_mut().rev().find(|p| p.id == id) else {
            return ReplyPoll::Closed;
        };
        if let Some(reply) = pending.reply.take() {
            return ReplyPoll::Ready {
                reply,
                last_deferred: pending.last_deferred.take(),
            };
        }
        if accepting {
            ReplyPoll::Pending
        } else {
            ReplyPoll::Closed
        }
    }

    /// Store `reply` for its pending call.
    ///
    /// `last_deferred` is evaluated with the tracker locked so no reply can
    /// overtake a deferred message observed before it.
    pub(crate) fn resolve(
        &self,
        id: SyncRequestId,
        reply: Message,
        last_deferred: impl FnOnce() -> Option<DeferredId>,
    ) -> Resolution {
        let mut state = self.lock();
        let Some(pending) = state
            .stack
            .iter_mut()
            .rev()
            .find(|p| p.id == id && p.reply.is_none())
        else {
            return Resolution::Stray;
        };
        pending.reply = Some(reply);
        pending.last_deferred = last_deferred();
        Resolution::Resolved
    }

    /// Refuse new calls and fail pending ones. Returns whether any call was
    /// pending.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.lock();
        state.accepting = false;
        !state.stack.is_empty()
    }

    pub(crate) fn depth(&self) -> usize { self.lock().stack.len() }
}

//! Blocking request/reply calls.

use std::sync::Arc;

use log::{error, warn};

use super::{
    Connection,
    state::{self, WaitOutcome, WaitPhase},
};
use crate::{
    deadline::Deadline,
    error::{Error, Result},
    message::{DispatchWhileWaiting, Message, SyncRequestId},
    metrics,
    sync_reply::ReplyPoll,
    sync_state::SyncMessageState,
};

/// Options for [`Connection::send_sync_with_options`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendSyncOptions {
    maintain_ordering_with_async: bool,
    dispatch_while_waiting_for_unbounded_sync: bool,
}

impl SendSyncOptions {
    /// Make the peer deliver its earlier async messages before this request,
    /// even when it dispatches the request while blocked.
    #[must_use]
    pub fn maintain_ordering_with_async(mut self, value: bool) -> Self {
        self.maintain_ordering_with_async = value;
        self
    }

    /// Only dispatch this request early on the peer while it has an
    /// [`UnboundedSyncScope`](crate::UnboundedSyncScope) open.
    #[must_use]
    pub fn dispatch_while_waiting_for_unbounded_sync(mut self, value: bool) -> Self {
        self.dispatch_while_waiting_for_unbounded_sync = value;
        self
    }
}

impl Connection {
    /// Send `message` and block the calling dispatcher until the reply.
    ///
    /// While blocked, messages that the peer marked as safe to handle during
    /// a sync call are dispatched from inside this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if `deadline` passes,
    /// [`Error::InvalidConnection`] if the connection is or becomes invalid
    /// and [`Error::SyncMessageCancelled`] if the peer dropped the request.
    pub fn send_sync(&self, message: Message, deadline: impl Into<Deadline>) -> Result<Message> {
        self.send_sync_with_options(message, deadline, SendSyncOptions::default())
    }

    /// [`send_sync`](Self::send_sync) with explicit options.
    ///
    /// # Errors
    ///
    /// As for [`send_sync`](Self::send_sync), plus
    /// [`Error::CantWaitForSyncReplies`] when the peer has closed but the
    /// connection has not been invalidated yet.
    pub fn send_sync_with_options(
        &self,
        mut message: Message,
        deadline: impl Into<Deadline>,
        options: SendSyncOptions,
    ) -> Result<Message> {
        let deadline = deadline.into();
        // The state is only released by `invalidate`; a peer close leaves it
        // bound and is caught by the reply tracker instead.
        let Some(sync_state) = self.sync_state() else {
            self.did_fail_to_send_sync_message();
            return Err(Error::InvalidConnection);
        };
        debug_assert!(
            sync_state.dispatcher().is_current(),
            "send_sync must be called on the connection's dispatcher"
        );

        let id = SyncRequestId::generate();
        if let Err(e) = self.0.sync_replies.push(id) {
            warn!("sync request refused, connection is closing: id={}", self.0.id);
            self.did_fail_to_send_sync_message();
            metrics::inc_errors(e);
            return Err(e);
        }
        message.set_sync_request_id(id);
        message.set_maintain_ordering_with_async(options.maintain_ordering_with_async);
        message.set_dispatch_while_waiting(if options.dispatch_while_waiting_for_unbounded_sync {
            DispatchWhileWaiting::YesDuringUnboundedSync
        } else {
            DispatchWhileWaiting::Yes
        });
        tracing::debug!(connection = %self.0.id, request = %id, name = %message.name(), "sync request sent");

        let result = {
            let _pending = PendingCall { connection: self, id };
            self.enqueue_outgoing(message)
                .and_then(|()| self.wait_for_sync_reply(&sync_state, id, deadline))
        };

        match result {
            Ok(reply) if reply.is_sync_cancel() => Err(Error::SyncMessageCancelled),
            Ok(reply) => Ok(reply),
            Err(e) => {
                if e == Error::Timeout {
                    warn!("sync request timed out: id={}, request={id}", self.0.id);
                    metrics::inc_sync_timeouts();
                }
                if e == Error::InvalidConnection {
                    self.did_fail_to_send_sync_message();
                }
                metrics::inc_errors(e);
                Err(e)
            }
        }
    }

    fn wait_for_sync_reply(
        &self,
        sync_state: &Arc<SyncMessageState>,
        id: SyncRequestId,
        deadline: Deadline,
    ) -> Result<Message> {
        state::drive(|| {
            pump_deferred(sync_state);
            match self.0.sync_replies.poll(id) {
                ReplyPoll::Ready { reply, last_deferred } => {
                    if let Some(last) = last_deferred {
                        sync_state.dispatch_until(last);
                    }
                    WaitPhase::Done(WaitOutcome::Resolved(reply))
                }
                ReplyPoll::Closed => WaitPhase::Done(WaitOutcome::Invalidated),
                ReplyPoll::Pending if !self.is_valid() => WaitPhase::Done(WaitOutcome::Invalidated),
                ReplyPoll::Pending if sync_state.wait(deadline) => WaitPhase::Blocked,
                ReplyPoll::Pending => WaitPhase::Done(WaitOutcome::TimedOut),
            }
        })
        .into_result()
    }

    fn did_fail_to_send_sync_message(&self) {
        if self.0.config.exit_on_sync_send_failure() {
            error!("sync message failed on an invalid connection, exiting: id={}", self.0.id);
            std::process::exit(0);
        }
    }
}

/// Pops the tracked call on every exit path, unwinding included.
struct PendingCall<'a> {
    connection: &'a Connection,
    id: SyncRequestId,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) { self.connection.0.sync_replies.pop(self.id); }
}

/// Deliver every message deferred on the blocked dispatcher.
fn pump_deferred(sync_state: &SyncMessageState) { sync_state.dispatch_all(None); }

//! Outbound path: queueing, transmit passes and async replies.

use std::{
    future::Future,
    sync::{Arc, atomic::Ordering},
};

use log::warn;
use tokio::sync::oneshot;

use super::{Connection, lock};
use crate::{
    async_reply::AsyncReplyHandler,
    deadline::Deadline,
    dispatcher::SerialDispatcher,
    error::{Error, Result},
    message::{AsyncReplyId, DispatchWhileWaiting, Message},
    metrics::{self, Direction},
    outgoing::OverflowReport,
};

/// Invoked when the outgoing queue stays above its warning threshold.
pub type OverflowCallback = Arc<dyn Fn(&Connection, &OverflowReport) + Send + Sync + 'static>;

/// Delivery hints for [`Connection::send`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    dispatch_while_waiting_for_sync_reply: bool,
    dispatch_while_waiting_for_unbounded_sync: bool,
}

impl SendOptions {
    /// Let the peer dispatch this message while it is blocked in a sync call.
    #[must_use]
    pub fn dispatch_while_waiting_for_sync_reply(mut self, value: bool) -> Self {
        self.dispatch_while_waiting_for_sync_reply = value;
        self
    }

    /// Let the peer dispatch this message only while an
    /// [`UnboundedSyncScope`](crate::UnboundedSyncScope) is active there.
    #[must_use]
    pub fn dispatch_while_waiting_for_unbounded_sync(mut self, value: bool) -> Self {
        self.dispatch_while_waiting_for_unbounded_sync = value;
        self
    }
}

impl Connection {
    /// Queue `message` for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConnection`] before [`open`](Self::open) or
    /// after invalidation; the message is discarded.
    pub fn send(&self, mut message: Message, options: SendOptions) -> Result<()> {
        message.set_dispatch_while_waiting(self.dispatch_flag_for(options));
        self.enqueue_outgoing(message)
    }

    fn dispatch_flag_for(&self, options: SendOptions) -> DispatchWhileWaiting {
        let inside_such_message = self.0.in_dispatch_while_waiting_count.load(Ordering::Acquire) > 0;
        if options.dispatch_while_waiting_for_sync_reply
            && (!self.0.config.only_dispatch_while_waiting_inside_such_message() || inside_such_message)
        {
            DispatchWhileWaiting::Yes
        } else if options.dispatch_while_waiting_for_unbounded_sync {
            DispatchWhileWaiting::YesDuringUnboundedSync
        } else {
            DispatchWhileWaiting::No
        }
    }

    pub(super) fn enqueue_outgoing(&self, message: Message) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::InvalidConnection);
        }
        let appended = self.0.outgoing.push(
            message,
            self.0.config.outgoing_warning_threshold(),
            self.0.config.outgoing_warning_cooldown(),
        );
        if let Some(report) = appended.overflow {
            self.report_overflow(&report);
        }
        if appended.was_empty {
            let connection = self.clone();
            self.0
                .connection_queue
                .dispatch(Box::new(move || connection.send_outgoing_messages()));
        }
        Ok(())
    }

    fn report_overflow(&self, report: &OverflowReport) {
        match &report.most_common {
            Some((name, count)) => warn!(
                "outgoing queue is backing up: id={}, length={}, most_common={name}, count={count}",
                self.0.id, report.queue_length
            ),
            None => warn!(
                "outgoing queue is backing up: id={}, length={}",
                self.0.id, report.queue_length
            ),
        }
        let callback = lock(&self.0.overflow_callback).clone();
        if let Some(callback) = callback {
            callback(self, report);
        }
    }

    /// Transmit pass run on the connection queue.
    fn send_outgoing_messages(&self) {
        while let Some(message) = self.0.outgoing.pop_for_transmit() {
            let bytes = match self.0.codec.encode(&message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("failed to encode message: id={}, name={}, error={e}", self.0.id, message.name());
                    metrics::inc_errors(Error::InvalidMessage);
                    continue;
                }
            };
            if !self.0.transport.send_bytes(bytes) {
                warn!("transport refused message, dropping queue: id={}", self.0.id);
                self.0.outgoing.clear();
                break;
            }
            metrics::inc_messages(Direction::Outbound);
        }
        self.0.outgoing.finish_transmit();
    }

    /// Send `message` and register `completion` for its reply.
    ///
    /// `completion` runs exactly once. A reply is delivered on the
    /// connection's dispatcher; if no reply can arrive, `completion` receives
    /// `None` on whichever thread gave up on it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConnection`] if the message could not be
    /// queued. `completion` has already been called with `None` by then.
    pub fn send_with_async_reply(
        &self,
        mut message: Message,
        options: SendOptions,
        completion: impl FnOnce(Option<Message>) + Send + 'static,
    ) -> Result<AsyncReplyId> {
        let id = AsyncReplyId::generate();
        message.set_async_reply_id(id);
        self.0.async_replies.add(id, AsyncReplyHandler::new(completion));
        if let Err(e) = self.send(message, options) {
            if let Some(handler) = self.0.async_replies.take(id) {
                handler.complete(None);
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Send `message` and resolve with its reply.
    ///
    /// The returned future fails with [`Error::AsyncReplyCancelled`] when no
    /// reply will arrive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConnection`] if the message could not be
    /// queued.
    pub fn send_with_promised_reply(
        &self,
        message: Message,
        options: SendOptions,
    ) -> Result<impl Future<Output = Result<Message>> + Send + 'static> {
        let (tx, rx) = oneshot::channel();
        self.send_with_async_reply(message, options, move |reply| {
            let _ = tx.send(reply);
        })?;
        Ok(async move {
            match rx.await {
                Ok(Some(reply)) => Ok(reply),
                Ok(None) | Err(_) => Err(Error::AsyncReplyCancelled),
            }
        })
    }

    /// Cancel a pending async reply, completing its handler with `None`.
    ///
    /// Returns `false` if the handler already ran.
    pub fn cancel_async_reply(&self, id: AsyncReplyId) -> bool {
        let Some(handler) = self.0.async_replies.take(id) else {
            return false;
        };
        handler.complete(None);
        true
    }

    /// Block until every queued message has been handed to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if `deadline` passes first.
    pub fn flush_sent_messages(&self, deadline: impl Into<Deadline>) -> Result<()> {
        if self.0.outgoing.wait_until_drained(deadline.into()) {
            Ok(())
        } else {
            Err(Error::Timeout)
        }
    }

    /// Install the callback run when the outgoing queue backs up.
    pub fn set_outgoing_overflow_callback(
        &self,
        callback: impl Fn(&Connection, &OverflowReport) + Send + Sync + 'static,
    ) {
        *lock(&self.0.overflow_callback) = Some(Arc::new(callback));
    }
}

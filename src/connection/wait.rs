//! Blocking until one specific message arrives.

use std::sync::{Arc, atomic::Ordering};

use super::{
    Connection,
    state::{self, WaitOutcome, WaitPhase},
};
use crate::{
    deadline::Deadline,
    error::{Error, Result},
    message::{Message, MessageName},
    sync_state::SyncMessageState,
    wait_for_message::{WaitForMessageState, WaitForOptions},
};

/// Vacates the wait slot however the wait ends.
struct SlotGuard<'a>(&'a WaitForMessageState);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) { self.0.lock().waiter = None; }
}

impl Connection {
    /// Block until a message named `name` for `destination_id` arrives and
    /// return it instead of dispatching it to the client.
    ///
    /// A matching message already queued for the client is taken
    /// immediately. Only one wait may be in progress per connection.
    ///
    /// # Errors
    ///
    /// - [`Error::MultipleWaitingClients`] if another wait is in progress.
    /// - [`Error::AttemptingToWaitOnClosedConnection`] once the peer closed.
    /// - [`Error::SyncMessageInterruptedWait`] if `options` ask to stop when
    ///   a sync request arrives and one does.
    /// - [`Error::WaitingOnAlreadyDispatchedMessage`] if the awaited message
    ///   went through deferred dispatch while waiting.
    /// - [`Error::AttemptingToWaitInsideSyncMessageHandling`] for a finite
    ///   wait made while handling a sync request.
    /// - [`Error::Timeout`] or [`Error::InvalidConnection`].
    pub fn wait_for_message(
        &self,
        name: &MessageName,
        destination_id: u64,
        deadline: impl Into<Deadline>,
        options: WaitForOptions,
    ) -> Result<Message> {
        let deadline = deadline.into();
        let Some(sync_state) = self.sync_state().filter(|_| self.is_valid()) else {
            return Err(Error::InvalidConnection);
        };

        {
            let mut slot = self.0.wait_for_message.lock();
            if slot.waiter.is_some() {
                return Err(Error::MultipleWaitingClients);
            }
            if !slot.is_accepting() {
                return Err(Error::AttemptingToWaitOnClosedConnection);
            }
            let mut incoming = self.0.incoming.lock();
            if let Some(message) = incoming.take_first(name, destination_id) {
                return Ok(message);
            }
            if options.interrupts_on_sync_message() && incoming.has_sync_message() {
                return Err(Error::SyncMessageInterruptedWait);
            }
            drop(incoming);
            slot.install(name.clone(), destination_id, options)?;
        }
        let _slot = SlotGuard(&self.0.wait_for_message);
        tracing::debug!(connection = %self.0.id, %name, destination_id, "waiting for message");

        state::drive(|| self.wait_for_message_step(&sync_state, name, destination_id, deadline))
            .into_result()
    }

    fn wait_for_message_step(
        &self,
        sync_state: &Arc<SyncMessageState>,
        name: &MessageName,
        destination_id: u64,
        deadline: Deadline,
    ) -> WaitPhase<Message> {
        let mut already_dispatched = false;
        let observe: &mut dyn FnMut(&Connection, &Message) = &mut |connection, message| {
            if connection == self && message.name() == name && message.destination_id() == destination_id {
                already_dispatched = true;
            }
        };
        sync_state.dispatch_all(Some(observe));
        if already_dispatched {
            return WaitPhase::Done(WaitOutcome::Rejected(Error::WaitingOnAlreadyDispatchedMessage));
        }
        if self.0.in_dispatch_sync_count.load(Ordering::Acquire) > 0 && !deadline.is_infinite() {
            return WaitPhase::Done(WaitOutcome::Rejected(
                Error::AttemptingToWaitInsideSyncMessageHandling,
            ));
        }

        let mut slot = self.0.wait_for_message.lock();
        let accepting = slot.is_accepting();
        let Some(waiter) = slot.waiter.as_mut() else {
            return WaitPhase::Done(WaitOutcome::Invalidated);
        };
        if let Some(message) = waiter.message.take() {
            return WaitPhase::Done(WaitOutcome::Resolved(message));
        }
        if !self.is_valid() {
            return WaitPhase::Done(WaitOutcome::Invalidated);
        }
        if waiter.interrupted {
            return WaitPhase::Done(if accepting {
                WaitOutcome::Interrupted
            } else {
                WaitOutcome::Rejected(Error::AttemptingToWaitOnClosedConnection)
            });
        }
        if deadline.has_passed() {
            return WaitPhase::Done(WaitOutcome::TimedOut);
        }
        drop(self.0.wait_for_message.wait(slot, deadline));
        WaitPhase::Blocked
    }
}

//! Single-slot rendezvous for `wait_for_message`.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::{
    deadline::Deadline,
    error::Error,
    message::{Message, MessageName},
};

/// Behaviour of a [`Connection::wait_for_message`](crate::Connection::wait_for_message)
/// call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WaitForOptions {
    interrupt_if_sync_message_arrives: bool,
    dispatch_incoming_sync_messages: bool,
}

impl WaitForOptions {
    /// Give up with [`Error::SyncMessageInterruptedWait`] when a sync request
    /// is received during the wait.
    #[must_use]
    pub fn interrupt_if_sync_message_arrives(mut self, value: bool) -> Self {
        self.interrupt_if_sync_message_arrives = value;
        self
    }

    /// Dispatch incoming sync requests while waiting.
    #[must_use]
    pub fn dispatch_incoming_sync_messages(mut self, value: bool) -> Self {
        self.dispatch_incoming_sync_messages = value;
        self
    }

    #[must_use]
    pub fn interrupts_on_sync_message(&self) -> bool { self.interrupt_if_sync_message_arrives }

    #[must_use]
    pub fn dispatches_sync_messages(&self) -> bool { self.dispatch_incoming_sync_messages }
}

#[derive(Debug)]
pub(crate) struct Waiter {
    name: MessageName,
    destination_id: u64,
    pub(crate) options: WaitForOptions,
    pub(crate) message: Option<Message>,
    pub(crate) interrupted: bool,
}

impl Waiter {
    pub(crate) fn matches(&self, message: &Message) -> bool {
        message.name() == &self.name && message.destination_id() == self.destination_id
    }
}

pub(crate) struct SlotState {
    accepting: bool,
    pub(crate) waiter: Option<Waiter>,
}

impl SlotState {
    pub(crate) fn is_accepting(&self) -> bool { self.accepting }

    /// Occupy the slot.
    pub(crate) fn install(
        &mut self,
        name: MessageName,
        destination_id: u64,
        options: WaitForOptions,
    ) -> Result<(), Error> {
        if self.waiter.is_some() {
            return Err(Error::MultipleWaitingClients);
        }
        if !self.accepting {
            return Err(Error::AttemptingToWaitOnClosedConnection);
        }
        self.waiter = Some(Waiter {
            name,
            destination_id,
            options,
            message: None,
            interrupted: false,
        });
        Ok(())
    }

    /// Waiter that may still take a message.
    pub(crate) fn active_waiter(&mut self) -> Option<&mut Waiter> {
        self.waiter.as_mut().filter(|w| w.message.is_none())
    }
}

pub(crate) struct WaitForMessageState {
    state: Mutex<SlotState>,
    condvar: Condvar,
}

impl Default for WaitForMessageState {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState {
                accepting: true,
                waiter: None,
            }),
            condvar: Condvar::new(),
        }
    }
}

impl WaitForMessageState {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self) { self.condvar.notify_all(); }

    /// Sleep until notified, a spurious wake-up, or `deadline`.
    ///
    /// Callers re-check the slot and the deadline after every return.
    pub(crate) fn wait<'a>(
        &self,
        guard: MutexGuard<'a, SlotState>,
        deadline: Deadline,
    ) -> MutexGuard<'a, SlotState> {
        match deadline.remaining() {
            None => self.condvar.wait(guard).unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.condvar
                    .wait_timeout(guard, timeout)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        }
    }

    /// Refuse new waits and interrupt the current one.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.accepting = false;
        if let Some(waiter) = state.waiter.as_mut() {
            waiter.interrupted = true;
        }
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    const READY: MessageName = MessageName::new("Page", "Ready");

    #[allow(
        unused_braces,
        reason = "rustc false positive for single-line rstest fixtures"
    )]
    #[fixture]
    fn slot() -> WaitForMessageState { WaitForMessageState::default() }

    #[rstest]
    fn second_waiter_is_rejected(slot: WaitForMessageState) {
        let mut state = slot.lock();
        state.install(READY, 1, WaitForOptions::default()).expect("first");
        assert_eq!(
            state.install(READY, 1, WaitForOptions::default()),
            Err(Error::MultipleWaitingClients)
        );
    }

    #[rstest]
    fn closed_slot_rejects_waiters(slot: WaitForMessageState) {
        slot.close();
        assert_eq!(
            slot.lock().install(READY, 1, WaitForOptions::default()),
            Err(Error::AttemptingToWaitOnClosedConnection)
        );
    }

    #[rstest]
    fn close_interrupts_installed_waiter(slot: WaitForMessageState) {
        slot.lock()
            .install(READY, 1, WaitForOptions::default())
            .expect("install");
        slot.close();
        let state = slot.lock();
        assert!(state.waiter.as_ref().is_some_and(|w| w.interrupted));
        assert!(!state.is_accepting());
    }

    #[rstest]
    fn matches_name_and_destination(slot: WaitForMessageState) {
        let mut state = slot.lock();
        state.install(READY, 4, WaitForOptions::default()).expect("install");
        let waiter = state.active_waiter().expect("waiter");
        assert!(waiter.matches(&Message::new(READY, 4, Vec::new())));
        assert!(!waiter.matches(&Message::new(READY, 5, Vec::new())));
    }
}

//! Shared utilities for integration tests.
//!
//! Provides message names used across test binaries and a few helpers for
//! blocking a dispatcher while traffic piles up behind it.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{
    sync::mpsc,
    time::Duration,
};

use wirelink::{Message, MessageName, SerialDispatcher};

pub const PING: MessageName = MessageName::new("Test", "Ping");
pub const ECHO: MessageName = MessageName::new("Test", "Echo");
pub const READY: MessageName = MessageName::new("Test", "Ready");
pub const INNER: MessageName = MessageName::new("Test", "Inner");
pub const ROUTED_A: MessageName = MessageName::new("Routed", "A");
pub const ROUTED_B: MessageName = MessageName::new("Routed", "B");
pub const ROUTED_C: MessageName = MessageName::new("Routed", "C");

/// Generous upper bound for anything that should happen promptly.
pub const SETTLE: Duration = Duration::from_secs(5);

/// Shared result type for test functions.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub fn message(name: MessageName, payload: &[u8]) -> Message { Message::new(name, 0, payload.to_vec()) }

/// Keeps a dispatcher busy until dropped.
pub struct BlockedDispatcher(mpsc::Sender<()>);

impl BlockedDispatcher {
    /// Queue a task that parks `dispatcher` until the guard drops.
    pub fn block(dispatcher: &dyn SerialDispatcher) -> Self {
        let (tx, rx) = mpsc::channel::<()>();
        dispatcher.dispatch(Box::new(move || {
            let _ = rx.recv();
        }));
        Self(tx)
    }

    pub fn release(self) { drop(self); }
}

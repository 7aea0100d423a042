//! Progress of a blocking wait.

use crate::error::{Error, Result};

/// Where a blocking wait currently stands.
///
/// Both `send_sync` and `wait_for_message` drive the same loop: start
/// [`Idle`](Self::Idle), step while [`Blocked`](Self::Blocked) and stop once
/// a step reports [`Done`](Self::Done).
pub(super) enum WaitPhase<T> {
    /// The wait has not checked for its result yet.
    Idle,
    /// Woken or timed out on the condition; check again.
    Blocked,
    Done(WaitOutcome<T>),
}

/// Terminal result of a blocking wait.
pub(super) enum WaitOutcome<T> {
    Resolved(T),
    TimedOut,
    /// An incoming sync request cut the wait short.
    Interrupted,
    Invalidated,
    /// The wait cannot proceed for a reason specific to the caller.
    Rejected(Error),
}

impl<T> WaitOutcome<T> {
    pub(super) fn into_result(self) -> Result<T> {
        match self {
            Self::Resolved(value) => Ok(value),
            Self::TimedOut => Err(Error::Timeout),
            Self::Interrupted => Err(Error::SyncMessageInterruptedWait),
            Self::Invalidated => Err(Error::InvalidConnection),
            Self::Rejected(error) => Err(error),
        }
    }
}

/// Run `step` until it reports an outcome.
pub(super) fn drive<T>(mut step: impl FnMut() -> WaitPhase<T>) -> WaitOutcome<T> {
    let mut phase = WaitPhase::Idle;
    loop {
        phase = match phase {
            WaitPhase::Done(outcome) => return outcome,
            WaitPhase::Idle | WaitPhase::Blocked => step(),
        };
    }
}

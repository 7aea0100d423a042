//! Absolute deadlines for blocking waits.

use std::{
    sync::{Condvar, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Point in time after which a blocking wait gives up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never passes.
    #[must_use]
    pub const fn never() -> Self { Self(None) }

    /// A deadline `timeout` from now. Overflowing durations never pass.
    #[must_use]
    pub fn after(timeout: Duration) -> Self { Self(Instant::now().checked_add(timeout)) }

    #[must_use]
    pub const fn at(instant: Instant) -> Self { Self(Some(instant)) }

    #[must_use]
    pub fn is_infinite(&self) -> bool { self.0.is_none() }

    #[must_use]
    pub fn has_passed(&self) -> bool { self.0.is_some_and(|at| Instant::now() >= at) }

    /// Time left before the deadline, or `None` if it never passes.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl From<Duration> for Deadline {
    fn from(timeout: Duration) -> Self { Self::after(timeout) }
}

impl From<Instant> for Deadline {
    fn from(instant: Instant) -> Self { Self::at(instant) }
}

/// Block on `condvar` while `condition` holds or until `deadline`.
///
/// Returns the reacquired guard and `true` if the deadline passed with the
/// condition still holding.
pub(crate) fn wait_while<'a, T, F>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    deadline: Deadline,
    condition: F,
) -> (MutexGuard<'a, T>, bool)
where
    F: FnMut(&mut T) -> bool,
{
    match deadline.remaining() {
        None => {
            let guard = condvar
                .wait_while(guard, condition)
                .unwrap_or_else(PoisonError::into_inner);
            (guard, false)
        }
        Some(timeout) => {
            let (guard, result) = condvar
                .wait_timeout_while(guard, timeout, condition)
                .unwrap_or_else(PoisonError::into_inner);
            (guard, result.timed_out())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        thread,
    };

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn never_has_no_remaining_time() {
        assert!(Deadline::never().is_infinite());
        assert_eq!(Deadline::never().remaining(), None);
        assert!(!Deadline::never().has_passed());
    }

    #[rstest]
    fn huge_timeout_is_infinite() {
        assert!(Deadline::after(Duration::MAX).is_infinite());
    }

    #[rstest]
    fn wait_times_out_when_condition_holds() {
        let lock = Mutex::new(());
        let condvar = Condvar::new();
        let start = Instant::now();
        let guard = lock.lock().expect("lock");
        let (_guard, timed_out) = wait_while(
            &condvar,
            guard,
            Deadline::after(Duration::from_millis(30)),
            |()| true,
        );
        assert!(timed_out);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[rstest]
    fn wait_returns_once_condition_clears() {
        let shared = Arc::new((Mutex::new(false), Condvar::new()));
        let signaller = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            *signaller.0.lock().expect("lock") = true;
            signaller.1.notify_all();
        });
        let guard = shared.0.lock().expect("lock");
        let (guard, timed_out) =
            wait_while(&shared.1, guard, Deadline::after(Duration::from_secs(5)), |done| !*done);
        assert!(!timed_out);
        assert!(*guard);
        drop(guard);
        handle.join().expect("join");
    }
}

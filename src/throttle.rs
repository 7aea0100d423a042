//! Adaptive batch sizing for incoming dispatch.
//!
//! Each connection with throttling enabled owns an [`IncomingThrottle`]. It
//! decides how many buffered messages one dispatch pass may deliver and
//! whether the queue has grown past the point where the peer must be cut
//! off.

use crate::config::ThrottleConfig;

/// What to do with a newly received message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EnqueueAction {
    /// Buffer the message.
    Accept,
    /// Depth reached the kill threshold; drop input and report the peer.
    Kill,
}

#[derive(Debug)]
pub(crate) struct IncomingThrottle {
    config: ThrottleConfig,
    level: u8,
}

impl IncomingThrottle {
    pub(crate) fn new(config: ThrottleConfig) -> Self { Self { config, level: 0 } }

    #[cfg(test)]
    pub(crate) fn level(&self) -> u8 { self.level }

    /// Decide whether a queue already holding `depth` messages accepts more.
    pub(crate) fn evaluate_enqueue(&self, depth: usize) -> EnqueueAction {
        match self.config.kill_threshold {
            Some(limit) if depth >= limit => EnqueueAction::Kill,
            _ => EnqueueAction::Accept,
        }
    }

    /// Number of messages the next pass may dispatch from `depth` buffered.
    ///
    /// The batch is sized from the current level; the level is then raised
    /// when more than one full batch is waiting and lowered otherwise.
    pub(crate) fn next_batch(&mut self, depth: usize) -> usize {
        let batch = self.config.max_batch_size / (usize::from(self.level) + 1);
        if depth > self.config.max_batch_size {
            if self.level < self.config.max_level {
                self.level += 1;
                tracing::debug!(level = self.level, depth, "incoming throttle raised");
            }
        } else if self.level > 0 {
            self.level -= 1;
        }
        depth.min(batch.max(1))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::{fixture, rstest};

    use super::*;

    #[allow(
        unused_braces,
        reason = "rustc false positive for single-line rstest fixtures"
    )]
    #[fixture]
    fn throttle() -> IncomingThrottle { IncomingThrottle::new(ThrottleConfig::default()) }

    #[rstest]
    fn shallow_queue_dispatches_everything(mut throttle: IncomingThrottle) {
        assert_eq!(throttle.next_batch(10), 10);
        assert_eq!(throttle.level(), 0);
    }

    #[rstest]
    fn sustained_pressure_shrinks_batch_to_floor(mut throttle: IncomingThrottle) {
        let batches: Vec<usize> = (0..12).map(|_| throttle.next_batch(10_000)).collect();
        assert_eq!(batches[0], 600);
        assert_eq!(batches[1], 300);
        assert_eq!(batches[2], 200);
        assert_eq!(*batches.last().expect("batches"), 60);
        assert_eq!(throttle.level(), 9);
    }

    #[rstest]
    fn relief_grows_batch_back(mut throttle: IncomingThrottle) {
        for _ in 0..3 {
            throttle.next_batch(10_000);
        }
        assert_eq!(throttle.level(), 3);
        assert_eq!(throttle.next_batch(5), 5);
        assert_eq!(throttle.level(), 2);
        assert_eq!(throttle.next_batch(500), 200);
        assert_eq!(throttle.level(), 1);
    }

    #[rstest]
    #[case::below(49_999, EnqueueAction::Accept)]
    #[case::at(50_000, EnqueueAction::Kill)]
    fn kill_threshold_is_inclusive(
        throttle: IncomingThrottle,
        #[case] depth: usize,
        #[case] expected: EnqueueAction,
    ) {
        assert_eq!(throttle.evaluate_enqueue(depth), expected);
    }

    #[rstest]
    fn no_kill_threshold_always_accepts() {
        let throttle = IncomingThrottle::new(ThrottleConfig {
            kill_threshold: None,
            ..ThrottleConfig::default()
        });
        assert_eq!(throttle.evaluate_enqueue(usize::MAX), EnqueueAction::Accept);
    }

    proptest! {
        #[test]
        fn batch_is_bounded(depths in proptest::collection::vec(1_usize..5_000, 1..64)) {
            let mut throttle = IncomingThrottle::new(ThrottleConfig::default());
            for depth in depths {
                let batch = throttle.next_batch(depth);
                prop_assert!(batch >= 1);
                prop_assert!(batch <= depth);
                prop_assert!(batch <= 600);
                prop_assert!(batch >= depth.min(60));
            }
        }
    }
}

//! Metric helpers for `wirelink`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled the helpers compile to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::error::Error;

/// Name of the gauge tracking live connections.
pub const CONNECTIONS_ACTIVE: &str = "wirelink_connections_active";
/// Name of the counter tracking messages handed to or taken from a transport.
pub const MESSAGES_TOTAL: &str = "wirelink_messages_total";
/// Name of the counter tracking error occurrences, labelled by kind.
pub const ERRORS_TOTAL: &str = "wirelink_errors_total";
/// Name of the counter tracking sync calls that hit their deadline.
pub const SYNC_TIMEOUTS_TOTAL: &str = "wirelink_sync_timeouts_total";
/// Name of the counter tracking panics caught on work queues.
pub const TASK_PANICS_TOTAL: &str = "wirelink_task_panics_total";

/// Direction of message flow.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Messages decoded from the transport.
    Inbound,
    /// Messages written to the transport.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message for the given direction.
pub fn inc_messages(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record an error occurrence.
pub fn inc_errors(error: Error) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => error.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = error;
}

/// Record a sync call that timed out.
pub fn inc_sync_timeouts() {
    #[cfg(feature = "metrics")]
    counter!(SYNC_TIMEOUTS_TOTAL).increment(1);
}

/// Record a panic caught while running a dispatched task.
pub fn inc_task_panics() {
    #[cfg(feature = "metrics")]
    counter!(TASK_PANICS_TOTAL).increment(1);
}

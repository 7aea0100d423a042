//! Connection configuration.
//!
//! Tuning constants for incoming backpressure and the outgoing overflow
//! hint, plus process policies for sync-send failures. Construct with
//! [`ConnectionConfig::builder`] or use [`ConnectionConfig::default`].

use std::time::Duration;

use thiserror::Error;

/// Default number of messages dispatched per pass with no pressure.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 600;
/// Default number of throttling levels above zero.
pub const DEFAULT_MAX_THROTTLE_LEVEL: u8 = 9;
/// Default incoming depth at which the peer is considered misbehaving.
pub const DEFAULT_KILL_THRESHOLD: usize = 50_000;
/// Default outgoing depth that triggers the overflow hint.
pub const DEFAULT_OUTGOING_WARNING_THRESHOLD: usize = 1024;
/// Default minimum spacing between two overflow hints.
pub const DEFAULT_OUTGOING_WARNING_COOLDOWN: Duration = Duration::from_secs(20);

/// Errors returned by [`ConnectionConfigBuilder::build`].
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The throttling batch size was zero.
    #[error("throttling batch size must be >= 1")]
    ZeroBatchSize,
    /// The kill threshold was zero.
    #[error("kill threshold must be >= 1")]
    ZeroKillThreshold,
    /// The outgoing warning threshold was zero.
    #[error("outgoing warning threshold must be >= 1")]
    ZeroOutgoingThreshold,
}

/// Adaptive batching applied to the incoming queue.
///
/// A pass dispatches `max_batch_size / (level + 1)` messages. The level
/// rises by one, up to `max_level`, whenever the queue holds more than
/// `max_batch_size` messages at the start of a pass, and falls by one
/// otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub max_batch_size: usize,
    pub max_level: u8,
    /// Depth at which buffered input is dropped and the peer reported.
    pub kill_threshold: Option<usize>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_level: DEFAULT_MAX_THROTTLE_LEVEL,
            kill_threshold: Some(DEFAULT_KILL_THRESHOLD),
        }
    }
}

/// Settings fixed for the lifetime of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub(crate) throttling: Option<ThrottleConfig>,
    pub(crate) outgoing_warning_threshold: usize,
    pub(crate) outgoing_warning_cooldown: Duration,
    pub(crate) exit_on_sync_send_failure: bool,
    pub(crate) only_dispatch_while_waiting_inside_such_message: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            throttling: None,
            outgoing_warning_threshold: DEFAULT_OUTGOING_WARNING_THRESHOLD,
            outgoing_warning_cooldown: DEFAULT_OUTGOING_WARNING_COOLDOWN,
            exit_on_sync_send_failure: false,
            only_dispatch_while_waiting_inside_such_message: false,
        }
    }
}

impl ConnectionConfig {
    /// Start building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> ConnectionConfigBuilder { ConnectionConfigBuilder::default() }

    #[must_use]
    pub fn throttling(&self) -> Option<ThrottleConfig> { self.throttling }

    #[must_use]
    pub fn outgoing_warning_threshold(&self) -> usize { self.outgoing_warning_threshold }

    #[must_use]
    pub fn outgoing_warning_cooldown(&self) -> Duration { self.outgoing_warning_cooldown }

    #[must_use]
    pub fn exit_on_sync_send_failure(&self) -> bool { self.exit_on_sync_send_failure }

    #[must_use]
    pub fn only_dispatch_while_waiting_inside_such_message(&self) -> bool {
        self.only_dispatch_while_waiting_inside_such_message
    }
}

/// Builder for [`ConnectionConfig`].
///
/// ```
/// use std::time::Duration;
///
/// use wirelink::config::{ConnectionConfig, ThrottleConfig};
///
/// let config = ConnectionConfig::builder()
///     .incoming_throttling(Some(ThrottleConfig::default()))
///     .outgoing_warning_cooldown(Duration::from_secs(5))
///     .build()
///     .expect("valid configuration");
/// assert!(config.throttling().is_some());
/// ```
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Enable adaptive batching of incoming dispatch, or disable with `None`.
    ///
    /// Without throttling every received message is dispatched by its own
    /// task.
    #[must_use]
    pub fn incoming_throttling(mut self, throttling: Option<ThrottleConfig>) -> Self {
        self.config.throttling = throttling;
        self
    }

    /// Outgoing queue length above which the overflow hint fires.
    #[must_use]
    pub fn outgoing_warning_threshold(mut self, threshold: usize) -> Self {
        self.config.outgoing_warning_threshold = threshold;
        self
    }

    /// Minimum time between two overflow hints.
    #[must_use]
    pub fn outgoing_warning_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.outgoing_warning_cooldown = cooldown;
        self
    }

    /// Terminate the process when a sync send fails.
    #[must_use]
    pub fn exit_on_sync_send_failure(mut self, exit: bool) -> Self {
        self.config.exit_on_sync_send_failure = exit;
        self
    }

    /// Only honour "dispatch while waiting" on sends made while dispatching
    /// a message that itself carried the flag.
    #[must_use]
    pub fn only_dispatch_while_waiting_inside_such_message(mut self, only: bool) -> Self {
        self.config.only_dispatch_while_waiting_inside_such_message = only;
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any threshold or batch size is zero.
    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        if let Some(throttle) = self.config.throttling {
            if throttle.max_batch_size == 0 {
                return Err(ConfigError::ZeroBatchSize);
            }
            if throttle.kill_threshold == Some(0) {
                return Err(ConfigError::ZeroKillThreshold);
            }
        }
        if self.config.outgoing_warning_threshold == 0 {
            return Err(ConfigError::ZeroOutgoingThreshold);
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_disable_throttling() {
        let config = ConnectionConfig::builder().build().expect("defaults are valid");
        assert_eq!(config, ConnectionConfig::default());
        assert!(config.throttling().is_none());
        assert_eq!(config.outgoing_warning_cooldown(), Duration::from_secs(20));
    }

    #[rstest]
    #[case::batch(
        ThrottleConfig { max_batch_size: 0, ..ThrottleConfig::default() },
        ConfigError::ZeroBatchSize
    )]
    #[case::kill(
        ThrottleConfig { kill_threshold: Some(0), ..ThrottleConfig::default() },
        ConfigError::ZeroKillThreshold
    )]
    fn rejects_zero_throttle_values(#[case] throttle: ThrottleConfig, #[case] expected: ConfigError) {
        let result = ConnectionConfig::builder()
            .incoming_throttling(Some(throttle))
            .build();
        assert_eq!(result, Err(expected));
    }

    #[rstest]
    fn rejects_zero_outgoing_threshold() {
        let result = ConnectionConfig::builder().outgoing_warning_threshold(0).build();
        assert_eq!(result, Err(ConfigError::ZeroOutgoingThreshold));
    }
}

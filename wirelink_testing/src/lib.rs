//! Utilities for exercising [`wirelink`] connections in tests.
//!
//! [`ConnectedPair`] opens two connections over a
//! [`MemoryTransport`](wirelink::MemoryTransport), each bound to its own
//! [`WorkQueue`](wirelink::WorkQueue) and [`RecordingSink`].
//!
//! ```rust
//! use std::time::Duration;
//!
//! use wirelink::{ConnectionConfig, Message, MessageName, SendOptions};
//! use wirelink_testing::ConnectedPair;
//!
//! let pair = ConnectedPair::open(ConnectionConfig::default()).expect("pair");
//! let ping = Message::new(MessageName::new("Test", "Ping"), 0, Vec::new());
//! pair.client.send(ping, SendOptions::default()).expect("send");
//! assert!(pair.server_sink.wait_for_events(1, Duration::from_secs(5)));
//! ```

pub mod connected;
pub mod logging;
pub mod sink;

pub use connected::{BoxError, ConnectedPair, pair, run_on, wait_until};
pub use logging::{LoggerHandle, logger};
pub use sink::{RecordingSink, SinkEvent};

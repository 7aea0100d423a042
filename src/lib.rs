#![doc(html_root_url = "https://docs.rs/wirelink/latest")]
//! Public API for the `wirelink` library.
//!
//! This crate provides the core of a message-passing IPC connection:
//! ordered asynchronous sends, blocking request/reply calls that keep
//! servicing re-entrant traffic while they wait, async reply handlers,
//! receive-queue routing and adaptive throttling of incoming traffic.

mod async_reply;
pub mod codec;
pub mod config;
pub mod connection;
pub mod deadline;
pub mod dispatcher;
pub mod error;
mod incoming;
pub mod matcher;
pub mod message;
pub mod metrics;
mod outgoing;
pub mod receive_queue;
mod sync_reply;
mod sync_state;
mod throttle;
pub mod transport;
mod wait_for_message;

pub use async_reply::AsyncReplyCompletion;
pub use codec::{BincodeCodec, CodecError, MAX_MESSAGE_LENGTH, MessageCodec};
pub use config::{ConfigError, ConnectionConfig, ConnectionConfigBuilder, ThrottleConfig};
pub use connection::{
    Connection,
    ConnectionId,
    ConnectionRegistry,
    MessageSink,
    OverflowCallback,
    SendOptions,
    SendSyncOptions,
    SyncReply,
    active_connection_count,
};
pub use deadline::Deadline;
pub use dispatcher::{DispatcherId, SerialDispatcher, Task, WorkQueue};
pub use error::{Error, OpenError, Result};
pub use matcher::ReceiverMatcher;
pub use message::{AsyncReplyId, DispatchWhileWaiting, Message, MessageName, SyncRequestId};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, MESSAGES_TOTAL};
pub use outgoing::OverflowReport;
pub use receive_queue::{DispatcherQueue, MessageReceiveQueue, MessageReceiver};
pub use sync_state::UnboundedSyncScope;
pub use transport::{MemoryTransport, ReceiveCallback, Transport, TransportEvent};
pub use wait_for_message::WaitForOptions;

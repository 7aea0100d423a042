//! Error and result types for connection operations.
//!
//! [`Error`] is the single taxonomy returned by every fallible `send*` and
//! wait operation. It is `Copy` so blocked callers, loggers and metrics can
//! all observe the same value without cloning boxed sources.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure kinds reported by a [`Connection`](crate::Connection).
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// The connection was never opened or has been invalidated.
    #[error("connection is invalid")]
    InvalidConnection,
    /// A blocking wait reached its deadline.
    #[error("timed out waiting for a reply")]
    Timeout,
    /// Another caller already occupies the single wait-for-message slot.
    #[error("another client is already waiting for a message")]
    MultipleWaitingClients,
    /// The connection stopped accepting waits before this one began.
    #[error("attempted to wait on a closed connection")]
    AttemptingToWaitOnClosedConnection,
    /// A synchronous message arrived while the wait asked to be interrupted.
    #[error("wait was interrupted by an incoming sync message")]
    SyncMessageInterruptedWait,
    /// A finite wait was attempted while dispatching a synchronous request.
    #[error("cannot wait with a timeout while handling a sync message")]
    AttemptingToWaitInsideSyncMessageHandling,
    /// The awaited message was already handed to the deferred dispatch path.
    #[error("awaited message was already dispatched")]
    WaitingOnAlreadyDispatchedMessage,
    /// The connection is shutting down and will not track sync calls.
    #[error("connection no longer waits for sync replies")]
    CantWaitForSyncReplies,
    /// The message payload failed to decode.
    #[error("received an invalid message")]
    InvalidMessage,
    /// The peer dropped a sync request without producing a reply.
    #[error("sync message was cancelled by the peer")]
    SyncMessageCancelled,
    /// An async reply completed with no payload.
    #[error("async reply was cancelled")]
    AsyncReplyCancelled,
}

impl Error {
    /// Stable identifier suitable for log fields and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConnection => "invalid_connection",
            Self::Timeout => "timeout",
            Self::MultipleWaitingClients => "multiple_waiting_clients",
            Self::AttemptingToWaitOnClosedConnection => "wait_on_closed_connection",
            Self::SyncMessageInterruptedWait => "sync_message_interrupted_wait",
            Self::AttemptingToWaitInsideSyncMessageHandling => "wait_inside_sync_message_handling",
            Self::WaitingOnAlreadyDispatchedMessage => "waiting_on_already_dispatched_message",
            Self::CantWaitForSyncReplies => "cant_wait_for_sync_replies",
            Self::InvalidMessage => "invalid_message",
            Self::SyncMessageCancelled => "sync_message_cancelled",
            Self::AsyncReplyCancelled => "async_reply_cancelled",
        }
    }
}

/// Errors returned by [`Connection::open`](crate::Connection::open).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OpenError {
    /// The connection already has a client bound, or was invalidated.
    #[error("connection was already opened")]
    AlreadyOpen,
    /// The transport failed to start.
    #[error("transport failed to open: {0}")]
    Transport(#[source] io::Error),
}

//! The message envelope exchanged between two connection endpoints.
//!
//! A [`Message`] carries a [`MessageName`], a destination id, optional
//! correlation ids and an opaque payload. Messages are moved between queues
//! and never cloned by the connection machinery.

use std::{
    borrow::Cow,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::codec::{CodecError, bincode_config};

const IPC_RECEIVER: &str = "IPC";
const ASYNC_REPLY_RECEIVER: &str = "AsyncReply";

/// Name of a message: the receiver it targets and the method it invokes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageName {
    receiver: Cow<'static, str>,
    method: Cow<'static, str>,
}

impl MessageName {
    /// Reply to a synchronous request.
    pub const SYNC_REPLY: Self = Self::new(IPC_RECEIVER, "SyncMessageReply");
    /// Sent in place of a reply when a sync request was not answered.
    pub const CANCEL_SYNC_REPLY: Self = Self::new(IPC_RECEIVER, "CancelSyncMessageReply");
    /// Reply to an asynchronous request.
    pub const ASYNC_REPLY: Self = Self::new(ASYNC_REPLY_RECEIVER, "Reply");
    /// Placeholder for bytes that could not be decoded into an envelope.
    pub const INVALID: Self = Self::new("Invalid", "Invalid");

    /// Create a name from static strings.
    #[must_use]
    pub const fn new(receiver: &'static str, method: &'static str) -> Self {
        Self {
            receiver: Cow::Borrowed(receiver),
            method: Cow::Borrowed(method),
        }
    }

    /// Create a name from owned strings.
    #[must_use]
    pub fn owned(receiver: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            receiver: Cow::Owned(receiver.into()),
            method: Cow::Owned(method.into()),
        }
    }

    #[must_use]
    pub fn receiver(&self) -> &str { &self.receiver }

    #[must_use]
    pub fn method(&self) -> &str { &self.method }
}

impl fmt::Display for MessageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.receiver, self.method)
    }
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Mint a fresh process-unique identifier.
            #[must_use]
            pub fn generate() -> Self {
                static NEXT: AtomicU64 = AtomicU64::new(1);
                Self(NEXT.fetch_add(1, Ordering::Relaxed))
            }

            /// Return the inner `u64` representation.
            #[must_use]
            pub fn as_u64(self) -> u64 { self.0 }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self { Self(value) }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

identifier! {
    /// Correlates a synchronous request with its reply or cancellation.
    SyncRequestId
}

identifier! {
    /// Correlates an asynchronous request with its completion handler.
    AsyncReplyId
}

/// Whether a message may be dispatched while its receiver's dispatcher is
/// blocked waiting for a sync reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchWhileWaiting {
    /// Dispatch only from the normal run loop.
    #[default]
    No,
    /// Dispatch even while a sync reply is awaited.
    Yes,
    /// Dispatch while waiting only if an unbounded sync scope is active.
    YesDuringUnboundedSync,
}

const fn valid() -> bool { true }

/// Envelope for a single message.
#[derive(Debug, Serialize, Deserialize)]
pub struct Message {
    name: MessageName,
    destination_id: u64,
    sync_request_id: Option<SyncRequestId>,
    async_reply_id: Option<AsyncReplyId>,
    dispatch_while_waiting: DispatchWhileWaiting,
    maintain_ordering_with_async: bool,
    payload: Bytes,
    #[serde(skip, default = "valid")]
    valid: bool,
}

impl Message {
    /// Create a plain message carrying `payload`.
    #[must_use]
    pub fn new(name: MessageName, destination_id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            name,
            destination_id,
            sync_request_id: None,
            async_reply_id: None,
            dispatch_while_waiting: DispatchWhileWaiting::No,
            maintain_ordering_with_async: false,
            payload: payload.into(),
            valid: true,
        }
    }

    /// Create a message whose payload is `value` encoded with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if `value` cannot be serialized.
    pub fn encode<T: Serialize>(
        name: MessageName,
        destination_id: u64,
        value: &T,
    ) -> Result<Self, CodecError> {
        let payload = bincode::serde::encode_to_vec(value, bincode_config())?;
        Ok(Self::new(name, destination_id, payload))
    }

    /// Build the reply to the sync request `id`.
    #[must_use]
    pub fn sync_reply(id: SyncRequestId, payload: impl Into<Bytes>) -> Self {
        let mut message = Self::new(MessageName::SYNC_REPLY, 0, payload);
        message.sync_request_id = Some(id);
        message
    }

    /// Build the cancellation sent when a sync request goes unanswered.
    #[must_use]
    pub fn cancel_sync_reply(id: SyncRequestId) -> Self {
        let mut message = Self::new(MessageName::CANCEL_SYNC_REPLY, 0, Bytes::new());
        message.sync_request_id = Some(id);
        message
    }

    /// Build the reply to the async request carrying `id`.
    #[must_use]
    pub fn async_reply(id: AsyncReplyId, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageName::ASYNC_REPLY, id.as_u64(), payload)
    }

    #[must_use]
    pub fn name(&self) -> &MessageName { &self.name }

    #[must_use]
    pub fn destination_id(&self) -> u64 { self.destination_id }

    #[must_use]
    pub fn sync_request_id(&self) -> Option<SyncRequestId> { self.sync_request_id }

    /// Reply id embedded by `send_with_async_reply`, if any.
    #[must_use]
    pub fn async_reply_id(&self) -> Option<AsyncReplyId> { self.async_reply_id }

    #[must_use]
    pub fn dispatch_while_waiting(&self) -> DispatchWhileWaiting { self.dispatch_while_waiting }

    #[must_use]
    pub fn maintains_ordering_with_async(&self) -> bool { self.maintain_ordering_with_async }

    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }

    /// A synchronous request awaiting a reply.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        self.sync_request_id.is_some() && !self.is_sync_reply_or_cancel()
    }

    #[must_use]
    pub fn is_sync_reply(&self) -> bool { self.name == MessageName::SYNC_REPLY }

    #[must_use]
    pub fn is_sync_cancel(&self) -> bool { self.name == MessageName::CANCEL_SYNC_REPLY }

    #[must_use]
    pub fn is_sync_reply_or_cancel(&self) -> bool { self.is_sync_reply() || self.is_sync_cancel() }

    #[must_use]
    pub fn is_async_reply(&self) -> bool { self.name.receiver() == ASYNC_REPLY_RECEIVER }

    /// `false` once any payload decode has failed.
    #[must_use]
    pub fn is_valid(&self) -> bool { self.valid }

    /// Flag the message as malformed so the connection reports it.
    pub fn mark_invalid(&mut self) { self.valid = false; }

    /// Decode the payload as `T`, marking the message invalid on failure.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Option<T> {
        match bincode::serde::decode_from_slice(&self.payload, bincode_config()) {
            Ok((value, _)) => Some(value),
            Err(e) => {
                tracing::debug!(name = %self.name, error = %e, "payload decode failed");
                self.valid = false;
                None
            }
        }
    }

    pub(crate) fn set_sync_request_id(&mut self, id: SyncRequestId) {
        self.sync_request_id = Some(id);
    }

    pub(crate) fn set_async_reply_id(&mut self, id: AsyncReplyId) { self.async_reply_id = Some(id); }

    pub(crate) fn set_dispatch_while_waiting(&mut self, value: DispatchWhileWaiting) {
        self.dispatch_while_waiting = value;
    }

    pub(crate) fn set_maintain_ordering_with_async(&mut self, value: bool) {
        self.maintain_ordering_with_async = value;
    }
}

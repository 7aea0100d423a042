//! Selection of messages by receiver name and destination.

use std::borrow::Cow;

use crate::message::Message;

/// Matches messages addressed to a receiver, optionally at one destination.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReceiverMatcher {
    receiver: Cow<'static, str>,
    destination_id: Option<u64>,
}

impl ReceiverMatcher {
    /// Match every message for `receiver`.
    #[must_use]
    pub fn any(receiver: impl Into<Cow<'static, str>>) -> Self {
        Self {
            receiver: receiver.into(),
            destination_id: None,
        }
    }

    /// Match messages for `receiver` at `destination_id`.
    #[must_use]
    pub fn exact(receiver: impl Into<Cow<'static, str>>, destination_id: u64) -> Self {
        Self {
            receiver: receiver.into(),
            destination_id: Some(destination_id),
        }
    }

    /// Like [`ReceiverMatcher::exact`], treating destination `0` as any.
    #[must_use]
    pub fn with_zero_as_any(receiver: impl Into<Cow<'static, str>>, destination_id: u64) -> Self {
        if destination_id == 0 {
            Self::any(receiver)
        } else {
            Self::exact(receiver, destination_id)
        }
    }

    #[must_use]
    pub fn receiver(&self) -> &str { &self.receiver }

    #[must_use]
    pub fn destination_id(&self) -> Option<u64> { self.destination_id }

    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        message.name().receiver() == self.receiver
            && self
                .destination_id
                .is_none_or(|id| id == message.destination_id())
    }
}

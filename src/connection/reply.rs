//! Reply obligation for a received sync request.

use bytes::Bytes;
use log::debug;
use serde::Serialize;

use super::{Connection, SendOptions};
use crate::{
    error::{Error, Result},
    message::{Message, SyncRequestId},
};

/// The right, and the duty, to answer one sync request.
///
/// Dropping a `SyncReply` without sending it cancels the request, so the
/// blocked peer fails with [`Error::SyncMessageCancelled`] instead of
/// waiting for its deadline.
#[must_use = "dropping a SyncReply cancels the request"]
pub struct SyncReply {
    connection: Connection,
    request_id: SyncRequestId,
    sent: bool,
}

impl SyncReply {
    pub(super) fn new(connection: Connection, request_id: SyncRequestId) -> Self {
        Self {
            connection,
            request_id,
            sent: false,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> SyncRequestId { self.request_id }

    /// Answer the request with `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConnection`] if the connection closed.
    pub fn send(mut self, payload: impl Into<Bytes>) -> Result<()> {
        self.sent = true;
        self.connection.send(
            Message::sync_reply(self.request_id, payload),
            SendOptions::default(),
        )
    }

    /// Answer the request with `value` encoded with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if `value` cannot be encoded, in
    /// which case the request is cancelled, or [`Error::InvalidConnection`]
    /// if the connection closed.
    pub fn send_value<T: Serialize>(self, value: &T) -> Result<()> {
        match bincode::serde::encode_to_vec(value, bincode::config::standard()) {
            Ok(payload) => self.send(payload),
            Err(e) => {
                debug!("failed to encode sync reply: request={}, error={e}", self.request_id);
                Err(Error::InvalidMessage)
            }
        }
    }
}

impl Drop for SyncReply {
    fn drop(&mut self) {
        if self.sent {
            return;
        }
        debug!("cancelling unanswered sync request: request={}", self.request_id);
        let _ = self.connection.send(
            Message::cancel_sync_reply(self.request_id),
            SendOptions::default(),
        );
    }
}

impl std::fmt::Debug for SyncReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncReply")
            .field("connection", &self.connection.id())
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

//! Envelope codecs converting [`Message`]s to and from transport bytes.
//!
//! The [`MessageCodec`] trait lets applications plug in their own wire
//! format. [`BincodeCodec`] is the default and uses `bincode` with its
//! standard configuration, bounded by [`MAX_MESSAGE_LENGTH`].

use bincode::{
    config,
    error::{DecodeError, EncodeError},
};
use bytes::Bytes;
use thiserror::Error;

use crate::message::Message;

/// Largest frame, in bytes, that [`BincodeCodec`] will decode.
pub const MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;

/// `bincode` configuration shared by envelopes and payloads.
pub(crate) fn bincode_config() -> impl config::Config {
    config::standard().with_limit::<MAX_MESSAGE_LENGTH>()
}

/// Errors raised while encoding or decoding an envelope or payload.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] EncodeError),
    #[error("failed to decode message: {0}")]
    Decode(#[from] DecodeError),
    /// Bytes remained after the envelope was decoded.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error("frame of {0} bytes exceeds the {MAX_MESSAGE_LENGTH} byte limit")]
    TooLarge(usize),
}

/// Converts whole messages to and from the bytes a transport carries.
pub trait MessageCodec: Send + Sync + 'static {
    /// Serialize `message` into a single transport frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be represented.
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError>;

    /// Parse a single transport frame.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a well-formed envelope.
    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError>;
}

/// Codec using `bincode` with its standard configuration.
///
/// Frames longer than [`MAX_MESSAGE_LENGTH`] are rejected before decoding,
/// and length prefixes inside a frame may not claim more than that either.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl MessageCodec for BincodeCodec {
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        Ok(bincode::serde::encode_to_vec(message, bincode_config())?.into())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        if bytes.len() > MAX_MESSAGE_LENGTH {
            return Err(CodecError::TooLarge(bytes.len()));
        }
        let (message, used): (Message, usize) = bincode::serde::decode_from_slice(bytes, bincode_config())?;
        if used != bytes.len() {
            return Err(CodecError::TrailingBytes(bytes.len() - used));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::message::{DispatchWhileWaiting, MessageName, SyncRequestId};

    #[rstest]
    fn envelope_fields_survive_encoding() {
        let id = SyncRequestId::generate();
        let mut message = Message::new(MessageName::new("Page", "Load"), 12, vec![1_u8, 2, 3]);
        message.set_sync_request_id(id);
        message.set_dispatch_while_waiting(DispatchWhileWaiting::Yes);

        let bytes = BincodeCodec.encode(&message).expect("encode");
        let decoded = BincodeCodec.decode(&bytes).expect("decode");

        assert_eq!(decoded.name(), message.name());
        assert_eq!(decoded.destination_id(), 12);
        assert_eq!(decoded.sync_request_id(), Some(id));
        assert_eq!(decoded.dispatch_while_waiting(), DispatchWhileWaiting::Yes);
        assert_eq!(decoded.payload().as_ref(), &[1, 2, 3]);
        assert!(decoded.is_valid());
    }

    #[rstest]
    fn garbage_is_rejected() {
        assert!(BincodeCodec.decode(&[0xff; 4]).is_err());
    }

    #[rstest]
    fn oversized_frame_is_rejected() {
        let bytes = vec![0_u8; MAX_MESSAGE_LENGTH + 1];
        assert!(matches!(
            BincodeCodec.decode(&bytes),
            Err(CodecError::TooLarge(len)) if len == MAX_MESSAGE_LENGTH + 1
        ));
    }

    #[rstest]
    fn trailing_bytes_are_rejected() {
        let message = Message::new(MessageName::new("Page", "Load"), 0, Vec::new());
        let mut bytes = BincodeCodec.encode(&message).expect("encode").to_vec();
        bytes.push(0);
        assert!(matches!(
            BincodeCodec.decode(&bytes),
            Err(CodecError::TrailingBytes(1))
        ));
    }
}

//! `tokio_util` codec for typed channel messages.
//!
//! Each message is a `bincode` body behind a 4-byte big-endian length
//! prefix. Frames larger than [`MAX_MESSAGE_SIZE`] are rejected before any
//! allocation.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::RemotingError;

/// Upper bound for one framed message (a video packet plus headroom).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

pub struct MessageCodec<T> {
    frames: LengthDelimitedCodec,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for MessageCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageCodec<T> {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_MESSAGE_SIZE)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for MessageCodec<T> {
    type Item = T;
    type Error = RemotingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(bincode::deserialize(&frame)?)),
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for MessageCodec<T> {
    type Error = RemotingError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = bincode::serialize(&item)?;
        self.frames.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::ControlMessage;

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut codec = MessageCodec::<ControlMessage>::new();
        let mut buf = BytesMut::new();
        codec
            .encode(ControlMessage::VideoControl { enable: false }, &mut buf)
            .unwrap();

        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        assert_eq!(
            codec.decode(&mut partial).unwrap(),
            Some(ControlMessage::VideoControl { enable: false })
        );
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = MessageCodec::<ControlMessage>::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&((MAX_MESSAGE_SIZE as u32) + 1).to_be_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn garbage_body_is_an_encoding_error() {
        let mut codec = MessageCodec::<ControlMessage>::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(&[0xff, 0xff, 0xff]);
        assert!(matches!(codec.decode(&mut buf), Err(RemotingError::Encoding(_))));
    }
}

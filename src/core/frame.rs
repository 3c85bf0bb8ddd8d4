//! # Frame Codec
//!
//! Length-prefixed framing over an ordered byte stream.
//!
//! ```text
//! [Length(2, big-endian)] [Payload(Length)]
//! ```
//!
//! The codec knows nothing about payload contents. Payloads longer than
//! [`MAX_FRAME_PAYLOAD`] are rejected at encode time rather than truncated.

use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest payload a single frame can carry.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Tokio codec for `u16` length-prefixed frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Vec<u8>, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&payload, dst)
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = u16::from_be_bytes([src[0], src[1]]) as usize;
        let total = LENGTH_PREFIX_SIZE + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(len).to_vec();
        trace!(len, "Decoded frame");
        Ok(Some(payload))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::TruncatedFrame {
                missing: missing_bytes(src),
            }),
        }
    }
}

/// Append one frame carrying `payload` to `dst`.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::OversizedFrame(payload.len()));
    }
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Frame a payload into a standalone buffer.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    encode_frame(payload, &mut buf)?;
    Ok(buf.to_vec())
}

/// Parse exactly one complete frame from `bytes`.
///
/// Returns the payload and the number of bytes consumed; an incomplete buffer
/// is a [`ProtocolError::TruncatedFrame`].
pub fn unframe(bytes: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut buf = BytesMut::from(bytes);
    let before = buf.len();
    match FrameCodec.decode(&mut buf)? {
        Some(payload) => Ok((payload, before - buf.len())),
        None => Err(ProtocolError::TruncatedFrame {
            missing: missing_bytes(&buf),
        }),
    }
}

fn missing_bytes(src: &BytesMut) -> usize {
    if src.len() < LENGTH_PREFIX_SIZE {
        return LENGTH_PREFIX_SIZE - src.len();
    }
    let len = u16::from_be_bytes([src[0], src[1]]) as usize;
    LENGTH_PREFIX_SIZE + len - src.len()
}

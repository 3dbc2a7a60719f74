//! Stream framing for the line protocol.
//!
//! [`FrameCodec`] cuts a byte stream into complete frames by reading the
//! type token and waiting for the number of lines that token requires. It
//! does not interpret the fields; pass each frame to
//! [`decode_frame`](crate::decode_frame) or [`decode_reply`](crate::decode_reply).

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{FrameError, MessageKind};

/// Which peer is reading the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Frames written by an agent, read by the collector.
    ToServer,
    /// Frames written by the collector, read by an agent.
    ToAgent,
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    direction: Direction,
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub fn new(direction: Direction, max_frame_bytes: usize) -> Self {
        Self {
            direction,
            max_frame_bytes,
        }
    }

    /// Codec for the collector side of a connection.
    pub fn server(max_frame_bytes: usize) -> Self {
        Self::new(Direction::ToServer, max_frame_bytes)
    }

    /// Codec for the agent side of a connection.
    pub fn agent(max_frame_bytes: usize) -> Self {
        Self::new(Direction::ToAgent, max_frame_bytes)
    }

    /// Byte length of the first complete frame in `src`, if there is one.
    fn frame_len(&self, src: &[u8]) -> Option<usize> {
        let token_end = src.iter().position(|b| *b == b'\n')?;
        let token = std::str::from_utf8(&src[..token_end])
            .map(|t| t.strip_suffix('\r').unwrap_or(t))
            .ok();

        // Unknown or misdirected tokens are emitted as a one-line frame so
        // the decoder reports the real error.
        let needed = token
            .and_then(MessageKind::from_token)
            .and_then(|kind| kind.field_lines(self.direction))
            .unwrap_or(0);

        let mut end = token_end + 1;
        for _ in 0..needed {
            let rel = src[end..].iter().position(|b| *b == b'\n')?;
            end += rel + 1;
        }
        Some(end)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frame_len(src) {
            Some(len) if len > self.max_frame_bytes => Err(FrameError::TooLong {
                max: self.max_frame_bytes,
            }),
            Some(len) => Ok(Some(src.split_to(len))),
            None if src.len() > self.max_frame_bytes => Err(FrameError::TooLong {
                max: self.max_frame_bytes,
            }),
            None => Ok(None),
        }
    }

    /// A partial frame left at end of stream is handed out as-is; decoding
    /// it reports which lines are missing.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Ok(Some(src.split())),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

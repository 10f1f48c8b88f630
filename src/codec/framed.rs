//! Streaming adapter for `tokio_util::codec`

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use super::{PREAMBLE_LEN, PREAMBLE_MAGIC, PROTOCOL_VERSION, decode_frame, decode_preamble, encode_into, measure_frame};
use crate::error::DecodeFailure;
use crate::types::Message;
use crate::{Result, StreamError};

/// Default cap on a single decoded frame (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Where the decoder is in the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Nothing consumed yet; an optional preamble may follow.
    Start,
    /// Reading frames.
    Frames,
}

/// Frame codec for use with `Framed`, `FramedRead` and `FramedWrite`.
///
/// Decoding waits for more bytes on a truncated frame and fails on anything
/// else. A frame whose declared size exceeds the configured maximum is
/// rejected before its payload is buffered.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
    state: DecodeState,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len, state: DecodeState::Start }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn too_large(&self, size: usize) -> StreamError {
        DecodeFailure::FrameTooLarge { size, max: self.max_frame_len }.into()
    }

    /// Consume the preamble if the stream starts with one.
    ///
    /// Returns `false` while the decision still needs more bytes.
    fn accept_preamble(&mut self, src: &mut BytesMut) -> Result<bool> {
        let Some(&first) = src.first() else {
            return Ok(false);
        };

        if first == PREAMBLE_MAGIC[0] {
            if src.len() < PREAMBLE_LEN {
                return Ok(false);
            }
            let found = decode_preamble(&src[..PREAMBLE_LEN])?;
            if found != PROTOCOL_VERSION {
                return Err(StreamError::ProtocolVersion { expected: PROTOCOL_VERSION, found });
            }
            src.advance(PREAMBLE_LEN);
            debug!("Peer announced protocol version {}", found);
        }

        self.state = DecodeState::Frames;
        Ok(true)
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if self.state == DecodeState::Start && !self.accept_preamble(src)? {
            return Ok(None);
        }

        match measure_frame(src)? {
            None => {
                if src.len() > self.max_frame_len {
                    return Err(self.too_large(src.len()));
                }
                Ok(None)
            }
            Some(size) if size > self.max_frame_len => Err(self.too_large(size)),
            Some(size) if src.len() < size => {
                src.reserve(size - src.len());
                Ok(None)
            }
            Some(size) => {
                let frame = src.split_to(size);
                let message = decode_frame(&frame)?;
                trace!("Decoded {:?} frame for '{}' ({} bytes)", message.kind(), message.name(), size);
                Ok(Some(message))
            }
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = StreamError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        encode_into(&item, dst)
    }
}

impl Encoder<&Message> for FrameCodec {
    type Error = StreamError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<()> {
        encode_into(item, dst)
    }
}

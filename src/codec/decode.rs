//! Frame decoding
//!
//! Decoding is bounds-checked on every read. Running out of input is always
//! reported as [`DecodeFailure::Truncated`] with the total number of bytes the
//! frame needs so far, which lets the streaming codec wait for more data
//! instead of failing.

use std::collections::BTreeMap;

use super::{PREAMBLE_LEN, PREAMBLE_MAGIC, PROFILE_ENTER, PROFILE_EXIT};
use crate::error::DecodeFailure;
use crate::types::{
    Event, MAX_FIELD_LEN, Message, MessageKind, Profile, ProfileEvent, Sample, SampleBatch,
    SampledBatch, Text, Timestamp,
};
use crate::{Result, StreamError};

/// Decode exactly one frame; trailing bytes are an error.
pub fn decode_frame(data: &[u8]) -> Result<Message> {
    let (message, used) = decode_prefix(data)?;
    if used != data.len() {
        return Err(DecodeFailure::TrailingBytes { count: data.len() - used }.into());
    }
    Ok(message)
}

/// Decode the frame at the start of `data`, returning it with its size.
pub fn decode_prefix(data: &[u8]) -> Result<(Message, usize)> {
    let mut reader = FrameReader::new(data);
    let (kind, name) = reader.header()?;
    let name = name.to_owned();

    let message = match kind {
        MessageKind::Sample => {
            let timestamp = reader.timestamp()?;
            let value = reader.f64()?;
            Message::Sample(Sample { name, timestamp, value })
        }
        MessageKind::SampleBatch => {
            let count = reader.len_field()?;
            reader.need(count.saturating_mul(16))?;
            let mut samples = Vec::with_capacity(count);
            for _ in 0..count {
                let timestamp = reader.timestamp()?;
                let value = reader.f64()?;
                samples.push((timestamp, value));
            }
            Message::SampleBatch(SampleBatch { name, samples })
        }
        MessageKind::SampledBatch => {
            let start = reader.timestamp()?;
            let dt = reader.f64()?;
            let count = reader.len_field()?;
            reader.need(count.saturating_mul(8))?;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(reader.f64()?);
            }
            let batch = SampledBatch::new(name, start, dt, values)
                .map_err(|_| StreamError::decoding(DecodeFailure::InvalidInterval { dt }))?;
            Message::SampledBatch(batch)
        }
        MessageKind::Text => {
            let timestamp = reader.timestamp()?;
            let len = reader.len_field()?;
            let text = reader.str(len, "text")?.to_owned();
            Message::Text(Text { name, timestamp, text })
        }
        MessageKind::Event => {
            let timestamp = reader.timestamp()?;
            let count = reader.len_field()?;
            let mut attributes = BTreeMap::new();
            for _ in 0..count {
                let key_len = reader.len_field()?;
                let key = reader.str(key_len, "attribute key")?.to_owned();
                let value_len = reader.len_field()?;
                let value = reader.str(value_len, "attribute value")?.to_owned();
                attributes.insert(key, value);
            }
            Message::Event(Event { name, timestamp, attributes })
        }
        MessageKind::Profile => {
            let timestamp = reader.timestamp()?;
            let event = match reader.u8()? {
                PROFILE_ENTER => {
                    let len = reader.len_field()?;
                    ProfileEvent::Enter { callee: reader.str(len, "callee")?.to_owned() }
                }
                PROFILE_EXIT => ProfileEvent::Exit,
                other => return Err(DecodeFailure::UnknownProfileKind(other).into()),
            };
            Message::Profile(Profile { name, timestamp, event })
        }
    };

    Ok((message, reader.pos))
}

/// Size of the frame at the start of `data`, once enough of it has arrived to tell.
///
/// Only the length and count fields that locate the end of the frame are
/// read; names, values and text are skipped without validation. The returned
/// size may exceed `data.len()` when the payload is still in flight.
pub fn measure_frame(data: &[u8]) -> Result<Option<usize>> {
    let mut reader = FrameReader::new(data);
    match measure(&mut reader) {
        Ok(()) => Ok(Some(reader.pos)),
        Err(err) if err.is_truncated() => Ok(None),
        Err(err) => Err(err),
    }
}

fn measure(reader: &mut FrameReader<'_>) -> Result<()> {
    let kind = reader.tag()?;
    let name_len = reader.len_field()?;
    reader.skip(name_len);

    match kind {
        MessageKind::Sample => reader.skip(16),
        MessageKind::SampleBatch => {
            let count = reader.len_field()?;
            reader.skip(count.saturating_mul(16));
        }
        MessageKind::SampledBatch => {
            reader.skip(16);
            let count = reader.len_field()?;
            reader.skip(count.saturating_mul(8));
        }
        MessageKind::Text => {
            reader.skip(8);
            let len = reader.len_field()?;
            reader.skip(len);
        }
        MessageKind::Event => {
            reader.skip(8);
            let count = reader.len_field()?;
            for _ in 0..count {
                let key_len = reader.len_field()?;
                reader.skip(key_len);
                let value_len = reader.len_field()?;
                reader.skip(value_len);
            }
        }
        MessageKind::Profile => {
            reader.skip(8);
            match reader.u8()? {
                PROFILE_ENTER => {
                    let len = reader.len_field()?;
                    reader.skip(len);
                }
                PROFILE_EXIT => {}
                other => return Err(DecodeFailure::UnknownProfileKind(other).into()),
            }
        }
    }

    Ok(())
}

/// Parse a connection preamble and return the announced protocol version.
pub fn decode_preamble(data: &[u8]) -> Result<u16> {
    if data.len() < PREAMBLE_LEN {
        return Err(DecodeFailure::Truncated { needed: PREAMBLE_LEN, available: data.len() }.into());
    }
    if data[..4] != PREAMBLE_MAGIC {
        return Err(DecodeFailure::BadMagic.into());
    }
    Ok(u16::from_le_bytes([data[4], data[5]]))
}

/// Cursor over a frame with bounds-checked little-endian reads.
struct FrameReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Fail unless `len` more bytes are available past the cursor.
    fn need(&self, len: usize) -> Result<()> {
        let needed = self.pos.saturating_add(len);
        if needed > self.data.len() {
            return Err(DecodeFailure::Truncated { needed, available: self.data.len() }.into());
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        self.need(len)?;
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Advance without reading; bounds are checked by the next read.
    fn skip(&mut self, len: usize) {
        self.pos = self.pos.saturating_add(len);
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn f64(&mut self) -> Result<f64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    fn timestamp(&mut self) -> Result<Timestamp> {
        Ok(Timestamp::from_secs_f64(self.f64()?))
    }

    /// A length or count field, capped at 2^31 - 1.
    fn len_field(&mut self) -> Result<usize> {
        let length = self.u32()?;
        if length as usize > MAX_FIELD_LEN {
            return Err(DecodeFailure::LengthOutOfRange { length, max: MAX_FIELD_LEN as u32 }.into());
        }
        Ok(length as usize)
    }

    fn str(&mut self, len: usize, field: &'static str) -> Result<&'a str> {
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeFailure::InvalidUtf8 { field }.into())
    }

    fn tag(&mut self) -> Result<MessageKind> {
        let tag = self.u8()?;
        MessageKind::from_tag(tag).ok_or_else(|| DecodeFailure::UnknownTag(tag).into())
    }

    fn header(&mut self) -> Result<(MessageKind, &'a str)> {
        let kind = self.tag()?;
        let name_len = self.len_field()?;
        if name_len == 0 {
            return Err(DecodeFailure::EmptyName.into());
        }
        let name = self.str(name_len, "channel name")?;
        Ok((kind, name))
    }
}

//! Frame encoding
//!
//! Every writer validates all of its length fields before touching the
//! destination buffer, so a failed encode never leaves a partial frame behind.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

use super::{HEADER_LEN, PREAMBLE_MAGIC, PROFILE_ENTER, PROFILE_EXIT, PROTOCOL_VERSION};
use crate::types::{MAX_FIELD_LEN, Message, MessageKind, ProfileEvent, Timestamp, validate_interval};
use crate::{Result, StreamError};

/// Encode any message into a standalone frame.
pub fn encode_frame(message: &Message) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_into(message, &mut dst)?;
    Ok(dst.freeze())
}

/// Append one frame for `message` to `dst`.
pub fn encode_into(message: &Message, dst: &mut BytesMut) -> Result<()> {
    match message {
        Message::Sample(m) => write_sample(dst, &m.name, m.timestamp, m.value),
        Message::SampleBatch(m) => write_sample_batch(dst, &m.name, &m.samples),
        Message::SampledBatch(m) => write_sampled_batch(dst, m.name(), m.start(), m.dt(), m.values()),
        Message::Text(m) => write_text(dst, &m.name, m.timestamp, &m.text),
        Message::Event(m) => write_event(dst, &m.name, m.timestamp, &m.attributes),
        Message::Profile(m) => write_profile(dst, &m.name, m.timestamp, &m.event),
    }
}

/// Encode a single sample.
pub fn encode_sample(name: &str, timestamp: Timestamp, value: f64) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    write_sample(&mut dst, name, timestamp, value)?;
    Ok(dst.freeze())
}

/// Encode irregularly spaced samples as one frame.
pub fn encode_sample_batch(name: &str, samples: &[(Timestamp, f64)]) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    write_sample_batch(&mut dst, name, samples)?;
    Ok(dst.freeze())
}

/// Encode regularly spaced values as one frame.
pub fn encode_sampled_batch(name: &str, start: Timestamp, dt: f64, values: &[f64]) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    write_sampled_batch(&mut dst, name, start, dt, values)?;
    Ok(dst.freeze())
}

/// Encode a text event.
pub fn encode_text(name: &str, timestamp: Timestamp, text: &str) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    write_text(&mut dst, name, timestamp, text)?;
    Ok(dst.freeze())
}

/// Encode an attribute event.
pub fn encode_event(name: &str, timestamp: Timestamp, attributes: &BTreeMap<String, String>) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    write_event(&mut dst, name, timestamp, attributes)?;
    Ok(dst.freeze())
}

/// Encode a profiling marker.
pub fn encode_profile(name: &str, timestamp: Timestamp, event: &ProfileEvent) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    write_profile(&mut dst, name, timestamp, event)?;
    Ok(dst.freeze())
}

/// The connection preamble announcing [`PROTOCOL_VERSION`].
pub fn encode_preamble() -> Bytes {
    let mut dst = BytesMut::with_capacity(super::PREAMBLE_LEN);
    dst.put_slice(&PREAMBLE_MAGIC);
    dst.put_u16_le(PROTOCOL_VERSION);
    dst.freeze()
}

fn checked_len(field: &str, len: usize) -> Result<u32> {
    if len > MAX_FIELD_LEN {
        return Err(StreamError::encoding(format!(
            "{} length {} exceeds maximum {}",
            field, len, MAX_FIELD_LEN
        )));
    }
    Ok(len as u32)
}

fn checked_name(name: &str) -> Result<u32> {
    if name.is_empty() {
        return Err(StreamError::encoding("channel name is empty"));
    }
    checked_len("channel name", name.len())
}

fn put_header(dst: &mut BytesMut, kind: MessageKind, name: &str, name_len: u32) {
    dst.put_u8(kind.tag());
    dst.put_u32_le(name_len);
    dst.put_slice(name.as_bytes());
}

fn write_sample(dst: &mut BytesMut, name: &str, timestamp: Timestamp, value: f64) -> Result<()> {
    let name_len = checked_name(name)?;

    dst.reserve(HEADER_LEN + name.len() + 16);
    put_header(dst, MessageKind::Sample, name, name_len);
    dst.put_f64_le(timestamp.as_secs_f64());
    dst.put_f64_le(value);
    Ok(())
}

fn write_sample_batch(dst: &mut BytesMut, name: &str, samples: &[(Timestamp, f64)]) -> Result<()> {
    let name_len = checked_name(name)?;
    let count = checked_len("sample count", samples.len())?;

    dst.reserve(HEADER_LEN + name.len() + 4 + samples.len() * 16);
    put_header(dst, MessageKind::SampleBatch, name, name_len);
    dst.put_u32_le(count);
    for (timestamp, value) in samples {
        dst.put_f64_le(timestamp.as_secs_f64());
        dst.put_f64_le(*value);
    }
    Ok(())
}

fn write_sampled_batch(
    dst: &mut BytesMut,
    name: &str,
    start: Timestamp,
    dt: f64,
    values: &[f64],
) -> Result<()> {
    let name_len = checked_name(name)?;
    validate_interval(dt)?;
    let count = checked_len("value count", values.len())?;

    dst.reserve(HEADER_LEN + name.len() + 20 + values.len() * 8);
    put_header(dst, MessageKind::SampledBatch, name, name_len);
    dst.put_f64_le(start.as_secs_f64());
    dst.put_f64_le(dt);
    dst.put_u32_le(count);
    for value in values {
        dst.put_f64_le(*value);
    }
    Ok(())
}

fn write_text(dst: &mut BytesMut, name: &str, timestamp: Timestamp, text: &str) -> Result<()> {
    let name_len = checked_name(name)?;
    let text_len = checked_len("text", text.len())?;

    dst.reserve(HEADER_LEN + name.len() + 12 + text.len());
    put_header(dst, MessageKind::Text, name, name_len);
    dst.put_f64_le(timestamp.as_secs_f64());
    dst.put_u32_le(text_len);
    dst.put_slice(text.as_bytes());
    Ok(())
}

fn write_event(
    dst: &mut BytesMut,
    name: &str,
    timestamp: Timestamp,
    attributes: &BTreeMap<String, String>,
) -> Result<()> {
    let name_len = checked_name(name)?;
    let count = checked_len("attribute count", attributes.len())?;
    let mut payload_len = 0usize;
    for (key, value) in attributes {
        checked_len("attribute key", key.len())?;
        checked_len("attribute value", value.len())?;
        payload_len += 8 + key.len() + value.len();
    }

    dst.reserve(HEADER_LEN + name.len() + 12 + payload_len);
    put_header(dst, MessageKind::Event, name, name_len);
    dst.put_f64_le(timestamp.as_secs_f64());
    dst.put_u32_le(count);
    for (key, value) in attributes {
        dst.put_u32_le(key.len() as u32);
        dst.put_slice(key.as_bytes());
        dst.put_u32_le(value.len() as u32);
        dst.put_slice(value.as_bytes());
    }
    Ok(())
}

fn write_profile(dst: &mut BytesMut, name: &str, timestamp: Timestamp, event: &ProfileEvent) -> Result<()> {
    let name_len = checked_name(name)?;
    let callee_len = match event {
        ProfileEvent::Enter { callee } => Some(checked_len("callee", callee.len())?),
        ProfileEvent::Exit => None,
    };

    dst.reserve(HEADER_LEN + name.len() + 13 + callee_len.map_or(0, |len| 4 + len as usize));
    put_header(dst, MessageKind::Profile, name, name_len);
    dst.put_f64_le(timestamp.as_secs_f64());
    match event {
        ProfileEvent::Enter { callee } => {
            dst.put_u8(PROFILE_ENTER);
            dst.put_u32_le(callee.len() as u32);
            dst.put_slice(callee.as_bytes());
        }
        ProfileEvent::Exit => dst.put_u8(PROFILE_EXIT),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_frame_layout_is_little_endian() {
        let frame = encode_sample("temp", Timestamp::from(1.5), 21.5).unwrap();

        let mut expected = vec![0x01];
        expected.extend_from_slice(&4u32.to_le_bytes());
        expected.extend_from_slice(b"temp");
        expected.extend_from_slice(&1.5f64.to_le_bytes());
        expected.extend_from_slice(&21.5f64.to_le_bytes());
        assert_eq!(frame.as_ref(), expected.as_slice());
    }

    #[test]
    fn sampled_batch_layout() {
        let frame = encode_sampled_batch("pi", Timestamp::from(10.0), 0.01, &[0.0, 0.5, 1.0]).unwrap();

        assert_eq!(frame[0], 0x03);
        assert_eq!(&frame[1..5], &2u32.to_le_bytes());
        assert_eq!(&frame[5..7], b"pi");
        assert_eq!(&frame[7..15], &10.0f64.to_le_bytes());
        assert_eq!(&frame[15..23], &0.01f64.to_le_bytes());
        assert_eq!(&frame[23..27], &3u32.to_le_bytes());
        assert_eq!(frame.len(), 27 + 3 * 8);
    }

    #[test]
    fn empty_batch_still_encodes_a_count() {
        let frame = encode_sample_batch("x", &[]).unwrap();
        assert_eq!(frame.as_ref(), &[0x02, 1, 0, 0, 0, b'x', 0, 0, 0, 0]);
    }

    #[test]
    fn text_is_length_prefixed_utf8() {
        let frame = encode_text("log", Timestamp::from(0.0), "héllo").unwrap();
        let text_len_at = HEADER_LEN + 3 + 8;
        assert_eq!(&frame[text_len_at..text_len_at + 4], &6u32.to_le_bytes());
        assert_eq!(&frame[text_len_at + 4..], "héllo".as_bytes());
    }

    #[test]
    fn empty_name_is_rejected_without_writing() {
        let mut dst = BytesMut::new();
        let message = Message::from(crate::types::Sample::new("", 0.0, 1.0));
        let err = encode_into(&message, &mut dst).unwrap_err();
        assert!(matches!(err, StreamError::Encoding { .. }));
        assert!(dst.is_empty());
    }

    #[test]
    fn non_positive_interval_is_rejected() {
        for dt in [0.0, -0.01] {
            let err = encode_sampled_batch("pi", Timestamp::EPOCH, dt, &[1.0]).unwrap_err();
            assert!(matches!(err, StreamError::InvalidArgument { .. }));
        }
    }

    #[test]
    fn oversized_length_is_an_encoding_error() {
        let err = checked_len("sample count", MAX_FIELD_LEN + 1).unwrap_err();
        assert!(matches!(err, StreamError::Encoding { .. }));
        assert_eq!(checked_len("sample count", MAX_FIELD_LEN).unwrap(), i32::MAX as u32);
    }

    #[test]
    fn profile_exit_has_no_callee() {
        let frame = encode_profile("trace", Timestamp::from(2.0), &ProfileEvent::Exit).unwrap();
        assert_eq!(frame.len(), HEADER_LEN + 5 + 8 + 1);
        assert_eq!(frame[frame.len() - 1], PROFILE_EXIT);
    }

    #[test]
    fn preamble_announces_version() {
        let preamble = encode_preamble();
        assert_eq!(&preamble[..4], b"PLST");
        assert_eq!(u16::from_le_bytes([preamble[4], preamble[5]]), PROTOCOL_VERSION);
    }
}

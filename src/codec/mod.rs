//! Binary wire format for plot data frames.
//!
//! The codec is a pure transform between [`Message`](crate::types::Message)
//! values and bytes. It performs no I/O; the session writes what the encoder
//! produces and the receiver feeds socket bytes through [`FrameCodec`].
//!
//! ## Frame Layout
//!
//! Every frame is self-delimiting. There is no outer length prefix.
//!
//! ```text
//! [type: u8][name_len: u32][name: UTF-8 bytes][payload ...]
//!
//! 0x01 Sample        (timestamp: f64)(value: f64)
//! 0x02 SampleBatch   (count: u32)((timestamp: f64)(value: f64))*count
//! 0x03 SampledBatch  (t0: f64)(dt: f64)(count: u32)(value: f64)*count
//! 0x04 Text          (timestamp: f64)(text_len: u32)(text: UTF-8 bytes)
//! 0x05 Event         (timestamp: f64)(attr_count: u32)
//!                    ((key_len: u32)(key)(value_len: u32)(value))*attr_count
//! 0x06 Profile       (timestamp: f64)(kind: u8)
//!                    kind 0x00 = enter, followed by (callee_len: u32)(callee)
//!                    kind 0x01 = exit
//! ```
//!
//! All integers and floats are little-endian. Length and count fields are
//! `u32` on the wire but never exceed 2^31 - 1; the encoder refuses larger
//! values and the decoder rejects them.
//!
//! ## Connection Preamble
//!
//! A connection may open with `b"PLST"` followed by a `u16` protocol version.
//! The receiver accepts a stream with or without it; a preamble announcing a
//! different version fails with
//! [`StreamError::ProtocolVersion`](crate::StreamError::ProtocolVersion).

mod decode;
mod encode;
mod framed;

pub use decode::{decode_frame, decode_preamble, decode_prefix, measure_frame};
pub use encode::{
    encode_event, encode_frame, encode_into, encode_preamble, encode_profile, encode_sample,
    encode_sample_batch, encode_sampled_batch, encode_text,
};
pub use framed::{DEFAULT_MAX_FRAME_LEN, FrameCodec};

/// Bytes before the name in every frame: tag plus name length.
pub const HEADER_LEN: usize = 5;

/// Magic bytes opening the optional connection preamble.
pub const PREAMBLE_MAGIC: [u8; 4] = *b"PLST";

/// Total preamble size: magic plus version.
pub const PREAMBLE_LEN: usize = 6;

/// Wire protocol version announced in the preamble.
pub const PROTOCOL_VERSION: u16 = 1;

/// Profile kind byte for a function entry.
pub(crate) const PROFILE_ENTER: u8 = 0x00;

/// Profile kind byte for a function exit.
pub(crate) const PROFILE_EXIT: u8 = 0x01;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, Message, Profile, ProfileEvent, Sample, SampleBatch, SampledBatch, Text, Timestamp};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn finite() -> impl Strategy<Value = f64> {
        prop::num::f64::NORMAL | prop::num::f64::ZERO | prop::num::f64::SUBNORMAL
    }

    fn channel() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_./ µ°]{1,24}"
    }

    fn message() -> impl Strategy<Value = Message> {
        prop_oneof![
            (channel(), finite(), finite())
                .prop_map(|(name, t, v)| Message::from(Sample::new(name, t, v))),
            (channel(), prop::collection::vec((finite(), finite()), 0..40)).prop_map(|(name, pairs)| {
                let samples = pairs.into_iter().map(|(t, v)| (Timestamp::from(t), v)).collect();
                Message::from(SampleBatch::new(name, samples))
            }),
            (channel(), finite(), 1.0e-6f64..1.0e3, prop::collection::vec(finite(), 0..40)).prop_map(
                |(name, t0, dt, values)| Message::from(SampledBatch::new(name, t0, dt, values).unwrap())
            ),
            (channel(), finite(), ".{0,64}").prop_map(|(name, t, text)| Message::from(Text::new(name, t, text))),
            (channel(), finite(), prop::collection::btree_map("[a-z]{1,8}", ".{0,16}", 0..6)).prop_map(
                |(name, t, attributes)| Message::from(Event { name, timestamp: Timestamp::from(t), attributes })
            ),
            (channel(), finite(), prop::option::of("[a-z_:]{1,16}")).prop_map(|(name, t, callee)| {
                let event = match callee {
                    Some(callee) => ProfileEvent::Enter { callee },
                    None => ProfileEvent::Exit,
                };
                Message::from(Profile { name, timestamp: Timestamp::from(t), event })
            }),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(message in message()) {
            let bytes = encode_frame(&message).unwrap();
            prop_assert_eq!(measure_frame(&bytes).unwrap(), Some(bytes.len()));
            prop_assert_eq!(decode_frame(&bytes).unwrap(), message);
        }

        #[test]
        fn every_strict_prefix_is_truncated(message in message()) {
            let bytes = encode_frame(&message).unwrap();
            for cut in 0..bytes.len() {
                let err = decode_frame(&bytes[..cut]).unwrap_err();
                prop_assert!(err.is_truncated(), "cut at {} gave {:?}", cut, err);
            }
        }
    }

    #[test]
    fn empty_attribute_map_is_a_valid_event() {
        let event = Message::from(Event {
            name: "boot".to_string(),
            timestamp: Timestamp::from(3.0),
            attributes: BTreeMap::new(),
        });
        let bytes = encode_frame(&event).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 4 + 8 + 4);
        assert_eq!(decode_frame(&bytes).unwrap(), event);
    }
}

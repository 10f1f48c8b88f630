//! Core types for streamed plot data.
//!
//! This module provides the in-memory side of the wire protocol: the
//! timestamp representation every producer converges on, and the message
//! entities the codec turns into frames.
//!
//! ## Architecture
//!
//! - [`Timestamp`] is fractional seconds since the Unix epoch; calendar times
//!   convert through UTC milliseconds
//! - [`Sample`], [`SampleBatch`] and [`SampledBatch`] carry numeric data for a channel
//! - [`Text`], [`Event`] and [`Profile`] carry log lines, attributes and call markers
//! - [`Message`] is the closed set of everything a frame can hold
//!
//! Entities are plain values. They are built on the calling task, encoded,
//! and dropped; only the batch accumulator holds on to samples between calls.
//!
//! ## Usage Example
//!
//! ```rust
//! use plotstream::types::{Message, SampledBatch, Timestamp};
//!
//! let batch = SampledBatch::new("pi", Timestamp::from(10.0), 0.5, vec![1.0, 2.0]).unwrap();
//! let observations = Message::from(batch).observations();
//! assert_eq!(observations[1], (Timestamp::from(10.5), 2.0));
//! ```

mod message;
mod timestamp;

pub use message::{
    Event, MAX_FIELD_LEN, Message, MessageKind, Profile, ProfileEvent, Sample, SampleBatch,
    SampledBatch, Text, validate_channel_name, validate_interval,
};
pub use timestamp::Timestamp;

//! Message entities carried by wire frames

use std::collections::BTreeMap;

use super::Timestamp;
use crate::{Result, StreamError};

/// Largest value any length or count field may hold (2^31 - 1).
pub const MAX_FIELD_LEN: usize = i32::MAX as usize;

/// Check that a channel name can be put on the wire.
pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StreamError::invalid_argument("channel name must not be empty"));
    }
    if name.len() > MAX_FIELD_LEN {
        return Err(StreamError::invalid_argument(format!(
            "channel name of {} bytes exceeds {} bytes",
            name.len(),
            MAX_FIELD_LEN
        )));
    }
    Ok(())
}

/// Check that a sampling interval is strictly positive and finite.
pub fn validate_interval(dt: f64) -> Result<()> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(StreamError::invalid_argument(format!(
            "sample interval must be strictly positive and finite, got {}",
            dt
        )));
    }
    Ok(())
}

/// One value observed at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub timestamp: Timestamp,
    pub value: f64,
}

impl Sample {
    pub fn new(name: impl Into<String>, timestamp: impl Into<Timestamp>, value: f64) -> Self {
        Self { name: name.into(), timestamp: timestamp.into(), value }
    }
}

/// Irregularly spaced samples for a single channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleBatch {
    pub name: String,
    pub samples: Vec<(Timestamp, f64)>,
}

impl SampleBatch {
    pub fn new(name: impl Into<String>, samples: Vec<(Timestamp, f64)>) -> Self {
        Self { name: name.into(), samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Values taken at a fixed interval from a start time.
///
/// The interval is validated at construction, so every `SampledBatch` in
/// existence has `dt > 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledBatch {
    name: String,
    start: Timestamp,
    dt: f64,
    values: Vec<f64>,
}

impl SampledBatch {
    /// Create a sampled batch, rejecting non-positive or non-finite `dt`.
    pub fn new(
        name: impl Into<String>,
        start: impl Into<Timestamp>,
        dt: f64,
        values: Vec<f64>,
    ) -> Result<Self> {
        validate_interval(dt)?;
        Ok(Self { name: name.into(), start: start.into(), dt, values })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Implicit timestamp of the i-th value.
    pub fn timestamp_at(&self, index: usize) -> Timestamp {
        self.start.offset(self.dt * index as f64)
    }
}

/// A line of text logged against a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub name: String,
    pub timestamp: Timestamp,
    pub text: String,
}

impl Text {
    pub fn new(name: impl Into<String>, timestamp: impl Into<Timestamp>, text: impl Into<String>) -> Self {
        Self { name: name.into(), timestamp: timestamp.into(), text: text.into() }
    }
}

/// A named occurrence with free-form string attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub timestamp: Timestamp,
    pub attributes: BTreeMap<String, String>,
}

/// Function entry/exit marker for call tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    Enter { callee: String },
    Exit,
}

/// A profiling marker on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub timestamp: Timestamp,
    pub event: ProfileEvent,
}

/// Wire-level message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Sample = 0x01,
    SampleBatch = 0x02,
    SampledBatch = 0x03,
    Text = 0x04,
    Event = 0x05,
    Profile = 0x06,
}

impl MessageKind {
    /// The tag byte that opens every frame of this kind.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(MessageKind::Sample),
            0x02 => Some(MessageKind::SampleBatch),
            0x03 => Some(MessageKind::SampledBatch),
            0x04 => Some(MessageKind::Text),
            0x05 => Some(MessageKind::Event),
            0x06 => Some(MessageKind::Profile),
            _ => None,
        }
    }
}

/// Any message that can travel in a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Sample(Sample),
    SampleBatch(SampleBatch),
    SampledBatch(SampledBatch),
    Text(Text),
    Event(Event),
    Profile(Profile),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Sample(_) => MessageKind::Sample,
            Message::SampleBatch(_) => MessageKind::SampleBatch,
            Message::SampledBatch(_) => MessageKind::SampledBatch,
            Message::Text(_) => MessageKind::Text,
            Message::Event(_) => MessageKind::Event,
            Message::Profile(_) => MessageKind::Profile,
        }
    }

    /// Channel this message belongs to.
    pub fn name(&self) -> &str {
        match self {
            Message::Sample(m) => &m.name,
            Message::SampleBatch(m) => &m.name,
            Message::SampledBatch(m) => &m.name,
            Message::Text(m) => &m.name,
            Message::Event(m) => &m.name,
            Message::Profile(m) => &m.name,
        }
    }

    /// Expand a sample-carrying message into explicit `(timestamp, value)` pairs.
    ///
    /// Sampled batches yield `start + i * dt` for the i-th value. Text, event
    /// and profile messages carry no numeric samples and yield nothing.
    pub fn observations(&self) -> Vec<(Timestamp, f64)> {
        match self {
            Message::Sample(m) => vec![(m.timestamp, m.value)],
            Message::SampleBatch(m) => m.samples.clone(),
            Message::SampledBatch(m) => m
                .values
                .iter()
                .enumerate()
                .map(|(index, value)| (m.timestamp_at(index), *value))
                .collect(),
            Message::Text(_) | Message::Event(_) | Message::Profile(_) => Vec::new(),
        }
    }
}

impl From<Sample> for Message {
    fn from(m: Sample) -> Self {
        Message::Sample(m)
    }
}

impl From<SampleBatch> for Message {
    fn from(m: SampleBatch) -> Self {
        Message::SampleBatch(m)
    }
}

impl From<SampledBatch> for Message {
    fn from(m: SampledBatch) -> Self {
        Message::SampledBatch(m)
    }
}

impl From<Text> for Message {
    fn from(m: Text) -> Self {
        Message::Text(m)
    }
}

impl From<Event> for Message {
    fn from(m: Event) -> Self {
        Message::Event(m)
    }
}

impl From<Profile> for Message {
    fn from(m: Profile) -> Self {
        Message::Profile(m)
    }
}

//! Test utilities shared by unit tests and benchmarks
//!
//! This module provides an in-memory transport that records every frame a
//! session writes, plus a few helpers for tracing setup and fixture messages.

#![cfg(any(test, feature = "benchmark"))]

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::codec::decode_frame;
use crate::transport::Transport;
use crate::types::{Event, Message, Profile, ProfileEvent, Sample, SampleBatch, SampledBatch, Text, Timestamp};
use crate::{Result, StreamError};

/// Install a fmt subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Record,
    FailAfter(usize),
    Delay(Duration),
    Stall,
}

/// Mock transport that records the raw bytes of each write call.
///
/// Clones share the same log, so a test can keep one handle while the
/// session owns the other.
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    attempts: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
    mode: WriteMode,
    peer: String,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_mode(WriteMode::Record)
    }

    /// Accept `count` writes, then fail every later one with a broken pipe.
    pub fn failing_after(count: usize) -> Self {
        Self::with_mode(WriteMode::FailAfter(count))
    }

    /// Record every write, each one taking `delay` to complete.
    pub fn delaying(delay: Duration) -> Self {
        Self::with_mode(WriteMode::Delay(delay))
    }

    /// Never complete a write.
    pub fn stalling() -> Self {
        Self::with_mode(WriteMode::Stall)
    }

    fn with_mode(mode: WriteMode) -> Self {
        Self {
            writes: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
            mode,
            peer: "recording".to_string(),
        }
    }

    /// Bytes of each successful write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Decode each write as exactly one frame.
    ///
    /// Panics if any write is not a single well-formed frame.
    pub fn messages(&self) -> Vec<Message> {
        self.writes
            .lock()
            .iter()
            .map(|bytes| match decode_frame(bytes) {
                Ok(message) => message,
                Err(e) => panic!("write of {} bytes is not one frame: {}", bytes.len(), e),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            WriteMode::Record => {}
            WriteMode::FailAfter(count) if attempt < count => {}
            WriteMode::FailAfter(_) => {
                let broken = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
                return Err(StreamError::io("write", broken));
            }
            WriteMode::Delay(delay) => tokio::time::sleep(delay).await,
            WriteMode::Stall => std::future::pending::<()>().await,
        }
        self.writes.lock().push(frame.to_vec());
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

/// One message of every kind, for codec tests and benchmarks.
pub fn fixture_messages() -> Vec<Message> {
    let t0 = Timestamp::from(1_700_000_000.25);
    let mut attributes = BTreeMap::new();
    attributes.insert("lap".to_string(), "12".to_string());
    attributes.insert("driver".to_string(), "#44".to_string());

    let mut messages = vec![
        Message::from(Sample::new("temp", t0, 21.5)),
        Message::from(SampleBatch::new(
            "pressure",
            (0..64).map(|i| (t0.offset(i as f64 * 0.013), 1013.0 + i as f64)).collect(),
        )),
        Message::from(Text::new("log", t0, "engine started")),
        Message::from(Event { name: "pit".to_string(), timestamp: t0, attributes }),
        Message::from(Profile {
            name: "trace".to_string(),
            timestamp: t0,
            event: ProfileEvent::Enter { callee: "physics::step".to_string() },
        }),
        Message::from(Profile { name: "trace".to_string(), timestamp: t0.offset(0.002), event: ProfileEvent::Exit }),
    ];

    let values = (0..1024).map(|i| (i as f64 * 0.01).sin()).collect();
    if let Ok(batch) = SampledBatch::new("sine", t0, 0.001, values) {
        messages.push(Message::from(batch));
    }
    messages
}

//! Per-channel sample coalescing
//!
//! With batching enabled, single samples are held per channel and written
//! as one [`SampleBatch`] frame once a channel reaches `max_entries` or its
//! oldest pending sample is `max_delay` old.
//!
//! Samples are only discarded after the write that carries them succeeds.
//! A failed flush puts its batch back in front of anything buffered since,
//! so a later flush, reconnect, or disconnect retries them in order.
//!
//! Every write that moves samples out of the buffer holds the flush gate
//! from the moment it takes them until the frame is written or restored.
//! Frames that must follow a channel's pending samples go through the same
//! gate, so nothing can overtake a batch that is in flight.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error};

use crate::codec::encode_sample_batch;
use crate::config::BatchConfig;
use crate::session::Session;
use crate::types::{Sample, SampleBatch, Timestamp};
use crate::{Result, StreamError};

/// Which pending samples a flush should write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushTarget<'a> {
    Channel(&'a str),
    All,
}

#[derive(Debug)]
struct Pending {
    samples: Vec<(Timestamp, f64)>,
    since: Instant,
}

/// Buffered samples keyed by channel. Pure bookkeeping, no I/O.
#[derive(Debug)]
pub(crate) struct PendingBuffer {
    config: BatchConfig,
    channels: BTreeMap<String, Pending>,
}

impl PendingBuffer {
    pub(crate) fn new(config: BatchConfig) -> Self {
        Self { config, channels: BTreeMap::new() }
    }

    /// Queue a sample; returns the channel's batch once it is full.
    pub(crate) fn offer(&mut self, sample: Sample, now: Instant) -> Option<SampleBatch> {
        let pending = self
            .channels
            .entry(sample.name.clone())
            .or_insert_with(|| Pending { samples: Vec::new(), since: now });
        pending.samples.push((sample.timestamp, sample.value));

        if pending.samples.len() >= self.config.max_entries {
            return self.take(&sample.name);
        }
        None
    }

    /// Remove every channel whose oldest sample has waited `max_delay`.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<SampleBatch> {
        let expired: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.since) >= self.config.max_delay)
            .map(|(name, _)| name.clone())
            .collect();

        expired.iter().filter_map(|name| self.take(name)).collect()
    }

    pub(crate) fn take(&mut self, channel: &str) -> Option<SampleBatch> {
        self.channels
            .remove(channel)
            .map(|pending| SampleBatch::new(channel, pending.samples))
    }

    pub(crate) fn take_all(&mut self) -> Vec<SampleBatch> {
        std::mem::take(&mut self.channels)
            .into_iter()
            .map(|(name, pending)| SampleBatch::new(name, pending.samples))
            .collect()
    }

    /// Put an unwritten batch back ahead of newer samples for its channel.
    pub(crate) fn restore(&mut self, batch: SampleBatch, now: Instant) {
        match self.channels.get_mut(&batch.name) {
            Some(pending) => {
                let newer = std::mem::replace(&mut pending.samples, batch.samples);
                pending.samples.extend(newer);
            }
            None => {
                self.channels.insert(batch.name, Pending { samples: batch.samples, since: now });
            }
        }
    }

    /// Total samples waiting across all channels.
    pub(crate) fn pending_len(&self) -> usize {
        self.channels.values().map(|pending| pending.samples.len()).sum()
    }

    pub(crate) fn channel_len(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |pending| pending.samples.len())
    }
}

/// Shared accumulator used by a client and its flush ticker.
#[derive(Debug)]
pub(crate) struct Accumulator {
    config: BatchConfig,
    buffer: Mutex<PendingBuffer>,
    gate: tokio::sync::Mutex<()>,
    deferred: Mutex<Option<StreamError>>,
    flushes: AtomicU64,
}

impl Accumulator {
    pub(crate) fn new(config: BatchConfig) -> Self {
        Self {
            config,
            buffer: Mutex::new(PendingBuffer::new(config)),
            gate: tokio::sync::Mutex::new(()),
            deferred: Mutex::new(None),
            flushes: AtomicU64::new(0),
        }
    }

    pub(crate) fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.buffer.lock().pending_len()
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self, channel: &str) -> bool {
        self.buffer.lock().channel_len(channel) > 0
    }

    pub(crate) fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Keep a background failure for the next caller.
    ///
    /// Only the first failure is kept until it has been reported.
    pub(crate) fn defer(&self, err: StreamError) {
        error!("Background flush failed: {}", err);
        let mut deferred = self.deferred.lock();
        if deferred.is_none() {
            *deferred = Some(err);
        }
    }

    /// Return (and clear) a failure stored by a background flush.
    pub(crate) fn take_deferred(&self) -> Result<()> {
        match self.deferred.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Buffer a sample, writing its channel inline if that fills it.
    pub(crate) async fn offer(&self, sample: Sample, session: &Session) -> Result<()> {
        let _gate = self.gate.lock().await;
        let full = self.buffer.lock().offer(sample, Instant::now());
        match full {
            Some(batch) => self.write_batch(batch, session).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn flush(&self, target: FlushTarget<'_>, session: &Session) -> Result<()> {
        let _gate = self.gate.lock().await;
        let batches = {
            let mut buffer = self.buffer.lock();
            match target {
                FlushTarget::Channel(channel) => buffer.take(channel).into_iter().collect(),
                FlushTarget::All => buffer.take_all(),
            }
        };
        self.write_batches(batches, session).await
    }

    /// Write every channel that has waited out `max_delay`.
    pub(crate) async fn flush_expired(&self, session: &Session) -> Result<()> {
        let _gate = self.gate.lock().await;
        let batches = self.buffer.lock().take_expired(Instant::now());
        self.write_batches(batches, session).await
    }

    /// Write `frame` behind every sample still pending for `channel`.
    pub(crate) async fn write_behind(&self, channel: &str, frame: &[u8], session: &Session) -> Result<()> {
        let _gate = self.gate.lock().await;
        let pending = self.buffer.lock().take(channel);
        if let Some(batch) = pending {
            self.write_batch(batch, session).await?;
        }
        session.write(frame).await
    }

    async fn write_batches(&self, batches: Vec<SampleBatch>, session: &Session) -> Result<()> {
        let mut batches = batches.into_iter();
        while let Some(batch) = batches.next() {
            if let Err(e) = self.write_batch(batch, session).await {
                let mut buffer = self.buffer.lock();
                for rest in batches {
                    buffer.restore(rest, Instant::now());
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn write_batch(&self, batch: SampleBatch, session: &Session) -> Result<()> {
        let frame = match encode_sample_batch(&batch.name, &batch.samples) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Dropping {} samples for '{}': {}", batch.len(), batch.name, e);
                return Err(e);
            }
        };

        match session.write(&frame).await {
            Ok(()) => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                debug!("Flushed {} samples for '{}'", batch.len(), batch.name);
                Ok(())
            }
            Err(e) => {
                debug!("Re-queueing {} samples for '{}' after failed flush", batch.len(), batch.name);
                self.buffer.lock().restore(batch, Instant::now());
                Err(e)
            }
        }
    }
}

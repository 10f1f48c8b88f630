//! Client facade
//!
//! [`Client`] is the only type most applications touch. It owns one session
//! at a time, normalizes timestamps, validates arguments, encodes frames and
//! hands them to the session. With batching enabled, single samples go
//! through the accumulator and a ticker task flushes channels that have
//! waited long enough.
//!
//! Argument errors are reported before the session state is looked at, so a
//! bad interval is always `InvalidArgument`, even on a closed client.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accumulator::{Accumulator, FlushTarget};
use crate::codec::{
    encode_event, encode_profile, encode_sample, encode_sample_batch, encode_sampled_batch, encode_text,
};
use crate::config::ClientConfig;
use crate::session::{Session, SessionStatus};
use crate::transport::Transport;
use crate::types::{ProfileEvent, Sample, Timestamp, validate_channel_name, validate_interval};
use crate::{Result, StreamError};

/// Counters describing what a client has sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Frames written on the current session.
    pub frames_written: u64,
    /// Bytes written on the current session, preamble excluded.
    pub bytes_written: u64,
    /// Samples held by the accumulator.
    pub samples_buffered: usize,
    /// Batch frames written by the accumulator since the client was created.
    pub flushes: u64,
}

struct Ticker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Streaming client for one plotting endpoint.
///
/// All methods take `&self`; share a client between tasks with `Arc`.
/// Frames from concurrent senders are serialized and never interleave.
///
/// ```rust,no_run
/// use plotstream::{Client, ClientConfig, Timestamp};
///
/// # #[tokio::main]
/// # async fn main() -> plotstream::Result<()> {
/// let client = Client::new(ClientConfig::default())?;
/// client.connect("127.0.0.1:12345").await?;
/// client.send_sample("temp", Timestamp::now(), 21.5).await?;
/// client.send_sampled("pi", Timestamp::now(), 0.01, &[0.0, 0.5, 1.0]).await?;
/// client.disconnect().await;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: ClientConfig,
    session: RwLock<Arc<Session>>,
    last_address: Mutex<Option<String>>,
    accumulator: Option<Arc<Accumulator>>,
    ticker: Mutex<Option<Ticker>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("status", &self.status())
            .field("batching", &self.config.batching)
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::build(ClientConfig::default())
    }
}

impl Client {
    /// Create an unconnected client after validating `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ClientConfig) -> Self {
        let accumulator = config.batching.map(|batching| Arc::new(Accumulator::new(batching)));
        Self {
            config,
            session: RwLock::new(Arc::new(Session::unopened())),
            last_address: Mutex::new(None),
            accumulator,
            ticker: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// State of the current session.
    pub fn status(&self) -> SessionStatus {
        self.session.read().status()
    }

    pub fn stats(&self) -> ClientStats {
        let session = self.current_session();
        let (samples_buffered, flushes) = match &self.accumulator {
            Some(accumulator) => (accumulator.pending_len(), accumulator.flush_count()),
            None => (0, 0),
        };
        ClientStats {
            frames_written: session.frames_written(),
            bytes_written: session.bytes_written(),
            samples_buffered,
            flushes,
        }
    }

    /// Connect to a receiver at `host:port`.
    ///
    /// On failure the client keeps its previous state; a client that never
    /// connected stays `Unopened`. Connecting while open is `InvalidState`.
    pub async fn connect(&self, address: &str) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.current_session().ensure_not_open("connect")?;

        info!("Connecting to {}", address);
        let session = Session::open(address, &self.config).await?;
        *self.last_address.lock() = Some(address.to_string());
        self.install(session).await;
        Ok(())
    }

    /// Use an already connected transport instead of TCP.
    ///
    /// Such a client has no address to [`reconnect`](Self::reconnect) to.
    pub async fn connect_transport(&self, transport: impl Transport) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.current_session().ensure_not_open("connect")?;

        let session = Session::with_transport(Box::new(transport), &self.config).await?;
        self.install(session).await;
        Ok(())
    }

    /// Open a fresh session to the last address that connected successfully.
    ///
    /// Meant for recovery after a transport failure closed the session.
    /// Samples still buffered from the old session are sent on the new one.
    pub async fn reconnect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.current_session();
        current.ensure_not_open("reconnect")?;

        let address = self.last_address.lock().clone();
        let Some(address) = address else {
            return Err(StreamError::invalid_state(current.status(), "reconnect"));
        };

        info!("Reconnecting to {}", address);
        let session = Session::open(&address, &self.config).await?;
        self.install(session).await;
        Ok(())
    }

    async fn install(&self, session: Session) {
        self.stop_ticker().await;
        let session = Arc::new(session);
        *self.session.write() = session.clone();

        if let Some(accumulator) = &self.accumulator {
            if let Err(e) = accumulator.take_deferred() {
                warn!("Discarding background flush error from the previous session: {}", e);
            }
            *self.ticker.lock() = Some(spawn_ticker(accumulator.clone(), session));
        }
    }

    async fn stop_ticker(&self) {
        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.cancel.cancel();
            if let Err(e) = ticker.handle.await {
                warn!("Flush ticker ended abnormally: {}", e);
            }
        }
    }

    fn current_session(&self) -> Arc<Session> {
        self.session.read().clone()
    }

    /// Session to send on, after reporting any deferred background failure.
    fn ready(&self, operation: &'static str) -> Result<Arc<Session>> {
        if let Some(accumulator) = &self.accumulator {
            accumulator.take_deferred()?;
        }
        let session = self.current_session();
        session.ensure_open(operation)?;
        Ok(session)
    }

    /// Write a direct batch frame after any single samples pending for `channel`.
    async fn write_batch_frame(&self, channel: &str, frame: &[u8], session: &Session) -> Result<()> {
        match &self.accumulator {
            Some(accumulator) => accumulator.write_behind(channel, frame, session).await,
            None => session.write(frame).await,
        }
    }

    /// Send one sample.
    ///
    /// Writes one frame, or buffers the sample when batching is enabled.
    pub async fn send_sample(&self, channel: &str, timestamp: impl Into<Timestamp>, value: f64) -> Result<()> {
        validate_channel_name(channel)?;
        let timestamp = timestamp.into();
        let session = self.ready("send_sample")?;

        match &self.accumulator {
            Some(accumulator) => accumulator.offer(Sample::new(channel, timestamp, value), &session).await,
            None => session.write(&encode_sample(channel, timestamp, value)?).await,
        }
    }

    /// Send irregularly spaced samples as one frame.
    ///
    /// An empty sequence succeeds without writing anything.
    pub async fn send_samples<I, T>(&self, channel: &str, samples: I) -> Result<()>
    where
        I: IntoIterator<Item = (T, f64)>,
        T: Into<Timestamp>,
    {
        validate_channel_name(channel)?;
        let samples: Vec<(Timestamp, f64)> =
            samples.into_iter().map(|(timestamp, value)| (timestamp.into(), value)).collect();
        let session = self.ready("send_samples")?;
        if samples.is_empty() {
            return Ok(());
        }

        let frame = encode_sample_batch(channel, &samples)?;
        self.write_batch_frame(channel, &frame, &session).await
    }

    /// Send values taken every `dt` seconds from `start`.
    ///
    /// Fails with `InvalidArgument` and writes nothing unless `dt > 0`. An
    /// empty value slice succeeds without writing anything.
    pub async fn send_sampled(
        &self,
        channel: &str,
        start: impl Into<Timestamp>,
        dt: f64,
        values: &[f64],
    ) -> Result<()> {
        validate_channel_name(channel)?;
        validate_interval(dt)?;
        let start = start.into();
        let session = self.ready("send_sampled")?;
        if values.is_empty() {
            return Ok(());
        }

        let frame = encode_sampled_batch(channel, start, dt, values)?;
        self.write_batch_frame(channel, &frame, &session).await
    }

    pub async fn send_text(&self, channel: &str, timestamp: impl Into<Timestamp>, text: &str) -> Result<()> {
        validate_channel_name(channel)?;
        let timestamp = timestamp.into();
        let session = self.ready("send_text")?;
        session.write(&encode_text(channel, timestamp, text)?).await
    }

    /// Send a named event with string attributes.
    pub async fn send_event<I, K, V>(&self, channel: &str, timestamp: impl Into<Timestamp>, attributes: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        validate_channel_name(channel)?;
        let timestamp = timestamp.into();
        let attributes: BTreeMap<String, String> =
            attributes.into_iter().map(|(key, value)| (key.into(), value.into())).collect();
        let session = self.ready("send_event")?;
        session.write(&encode_event(channel, timestamp, &attributes)?).await
    }

    /// Mark entry into `callee` on a profiling channel.
    pub async fn send_function_enter(&self, channel: &str, timestamp: impl Into<Timestamp>, callee: &str) -> Result<()> {
        validate_channel_name(channel)?;
        let timestamp = timestamp.into();
        let session = self.ready("send_function_enter")?;
        let event = ProfileEvent::Enter { callee: callee.to_string() };
        session.write(&encode_profile(channel, timestamp, &event)?).await
    }

    /// Mark exit from the innermost entered function.
    pub async fn send_function_exit(&self, channel: &str, timestamp: impl Into<Timestamp>) -> Result<()> {
        validate_channel_name(channel)?;
        let timestamp = timestamp.into();
        let session = self.ready("send_function_exit")?;
        session.write(&encode_profile(channel, timestamp, &ProfileEvent::Exit)?).await
    }

    /// Write every buffered sample now. A no-op without batching.
    pub async fn flush(&self) -> Result<()> {
        self.flush_target(FlushTarget::All).await
    }

    /// Write the buffered samples of one channel now.
    pub async fn flush_channel(&self, channel: &str) -> Result<()> {
        self.flush_target(FlushTarget::Channel(channel)).await
    }

    async fn flush_target(&self, target: FlushTarget<'_>) -> Result<()> {
        let Some(accumulator) = &self.accumulator else {
            return Ok(());
        };
        accumulator.take_deferred()?;
        if accumulator.pending_len() == 0 {
            return Ok(());
        }
        let session = self.current_session();
        session.ensure_open("flush")?;
        accumulator.flush(target, &session).await
    }

    /// Flush and close the session.
    ///
    /// Never fails and is safe to call repeatedly or on a client that never
    /// connected. Problems are logged; samples that could not be written stay
    /// buffered for a later [`reconnect`](Self::reconnect).
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_ticker().await;
        let session = self.current_session();

        if let Some(accumulator) = &self.accumulator {
            if let Err(e) = accumulator.take_deferred() {
                warn!("Discarding unreported background flush error: {}", e);
            }
            if session.is_open() {
                if let Err(e) = accumulator.flush(FlushTarget::All, &session).await {
                    warn!("Final flush before disconnect failed: {}", e);
                }
            }
            let lost = accumulator.pending_len();
            if lost > 0 {
                error!("Disconnected with {} buffered samples unsent", lost);
            }
        }

        if let Err(e) = session.close().await {
            warn!("Closing session to {} failed: {}", session.peer(), e);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            debug!("Dropping client, stopping flush ticker");
            ticker.cancel.cancel();
        }
        if let Some(accumulator) = &self.accumulator {
            let lost = accumulator.pending_len();
            if lost > 0 {
                error!("Client dropped with {} buffered samples unsent", lost);
            }
        }
    }
}

/// Periodically flush channels whose oldest sample is `max_delay` old.
fn spawn_ticker(accumulator: Arc<Accumulator>, session: Arc<Session>) -> Ticker {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let period = (accumulator.config().max_delay / 2).max(Duration::from_millis(1));

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        debug!("Flush ticker started ({:?} period)", period);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if !session.is_open() {
                        break;
                    }
                    if let Err(e) = accumulator.flush_expired(&session).await {
                        accumulator.defer(e);
                    }
                }
            }
        }

        debug!("Flush ticker stopped");
    });

    Ticker { cancel, handle }
}

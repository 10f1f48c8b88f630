//! Streaming time-series samples to a live plotting process.
//!
//! Plotstream sends numeric samples, text lines and events from an
//! application to a plotting GUI over TCP, using a small self-delimiting
//! binary protocol. The receiving half of the protocol is included so a
//! plotting process (or a test) can ingest the same frames.
//!
//! # Features
//!
//! - **Client**: connect, send single samples, irregular batches, regularly
//!   sampled batches, text, events and profiling markers
//! - **Batching**: optional per-channel coalescing of single samples
//! - **Bounded I/O**: every connect and write has a configurable timeout
//! - **Receiver**: decodes frames from many peers into one `Stream`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use plotstream::{Client, ClientConfig, Timestamp};
//!
//! #[tokio::main]
//! async fn main() -> plotstream::Result<()> {
//!     let client = Client::new(ClientConfig::default())?;
//!     client.connect("127.0.0.1:12345").await?;
//!
//!     let t0 = Timestamp::now();
//!     client.send_sample("temp", t0, 21.5).await?;
//!     client.send_samples("pressure", [(t0, 1013.2), (t0.offset(0.3), 1013.4)]).await?;
//!     client.send_text("log", t0, "warming up").await?;
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

mod accumulator;
pub mod client;
pub mod codec;
pub mod config;
mod error;
pub mod receiver;
pub mod session;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod transport;
pub mod types;

pub use client::{Client, ClientStats};
pub use config::{BatchConfig, ClientConfig, ReceiverConfig};
pub use error::*;
pub use receiver::{Received, Receiver};
pub use session::SessionStatus;
pub use types::{Message, Timestamp};

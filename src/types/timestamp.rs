//! Canonical timestamp representation

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::fmt;
use std::time::SystemTime;

use crate::{Result, StreamError};

/// Fractional seconds since the Unix epoch.
///
/// Calendar times are converted through UTC milliseconds, so anything finer
/// than a millisecond is truncated. Raw `f64` values pass through untouched,
/// which keeps sub-millisecond resolution for producers that already work in
/// epoch seconds.
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use plotstream::Timestamp;
///
/// let t = Timestamp::from(Utc.timestamp_millis_opt(1_500).unwrap());
/// assert_eq!(t.as_secs_f64(), 1.5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestamp(f64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Timestamp = Timestamp(0.0);

    /// Wrap a raw epoch-seconds value.
    pub const fn from_secs_f64(secs: f64) -> Self {
        Self(secs)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    /// Convert any zoned calendar time.
    pub fn from_datetime<Tz: TimeZone>(datetime: &DateTime<Tz>) -> Self {
        Self(datetime.timestamp_millis() as f64 / 1000.0)
    }

    /// Interpret a naive calendar time in the local time zone.
    ///
    /// Ambiguous times (during a DST fold) resolve to the earlier instant.
    /// Times skipped by a DST gap are rejected.
    pub fn from_local(naive: NaiveDateTime) -> Result<Self> {
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|datetime| Self::from_datetime(&datetime))
            .ok_or_else(|| {
                StreamError::invalid_argument(format!(
                    "{} does not exist in the local time zone",
                    naive
                ))
            })
    }

    /// Seconds since the epoch.
    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    /// Shift by a number of seconds.
    pub fn offset(self, secs: f64) -> Self {
        Self(self.0 + secs)
    }
}

impl From<f64> for Timestamp {
    fn from(secs: f64) -> Self {
        Self(secs)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Timestamp {
    fn from(datetime: DateTime<Tz>) -> Self {
        Self::from_datetime(&datetime)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self::from_datetime(&DateTime::<Utc>::from(time))
    }
}

impl From<Timestamp> for f64 {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0)
    }
}

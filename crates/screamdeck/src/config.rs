//! Session configuration.

use screamdeck_core::constants::{DEFAULT_EVENT_CAPACITY, READ_KEY_TIMEOUT_MS};
use screamdeck_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which key-state read lengths the poller treats as fresh data.
///
/// The native read reports a byte count alongside filling the buffer. Reads
/// the policy rejects are skipped as "no new data", never as errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadLengthPolicy {
    /// Accept only reads reporting exactly one byte per key.
    #[default]
    Exact,

    /// Accept only reads reporting more bytes than there are keys, for
    /// library builds that count a report header in the returned length.
    Oversized,
}

impl ReadLengthPolicy {
    /// Whether a read reporting `bytes_read` carries a usable snapshot of
    /// `expected` keys.
    #[must_use]
    pub fn accepts(self, bytes_read: i32, expected: usize) -> bool {
        let Ok(bytes_read) = usize::try_from(bytes_read) else {
            return false;
        };
        match self {
            Self::Exact => bytes_read == expected,
            Self::Oversized => bytes_read > expected,
        }
    }
}

/// Configuration for a deck session and its key poller.
///
/// # Example
///
/// ```
/// use screamdeck::config::{ReadLengthPolicy, SessionConfig};
///
/// let config = SessionConfig {
///     read_timeout_ms: 8,
///     event_capacity: 256,
///     read_length: ReadLengthPolicy::Exact,
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bounded wait of each key-state read, which also bounds how long a
    /// teardown waits for the poller to notice cancellation.
    pub read_timeout_ms: u32,

    /// Key events buffered per subscriber before the oldest are dropped.
    pub event_capacity: usize,

    pub read_length: ReadLengthPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: READ_KEY_TIMEOUT_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            read_length: ReadLengthPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Check the configuration before a session is built from it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a zero event capacity or a zero read
    /// timeout (which would make the poller spin).
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be greater than 0".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(Error::Config("read_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.read_timeout_ms))
    }
}

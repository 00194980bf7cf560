//! Constants shared by the native binding and the key poller.
//!
//! # Usage
//!
//! ```
//! use screamdeck_core::constants::*;
//! use std::time::Duration;
//!
//! let frame = Duration::from_millis(READ_KEY_TIMEOUT_MS as u64);
//! assert_eq!(frame.as_millis(), 16);
//! assert_eq!(MAX_BRIGHTNESS_PERCENT, 100);
//! ```

// ============================================================================
// Key polling
// ============================================================================

/// Bounded wait of one key-state read, one frame at 60 Hz.
///
/// The poller checks for cancellation between reads, so this is also the
/// worst-case latency of a session teardown.
pub const READ_KEY_TIMEOUT_MS: u32 = 1000 / 60;

/// Default capacity of the per-session key event channel.
///
/// Subscribers that fall further behind than this lose the oldest events.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

// ============================================================================
// Native buffers
// ============================================================================

/// Capacity, in UTF-16 code units, of the serial number buffer passed to
/// `scdk_get_serial_number`. Includes the terminating NUL.
pub const SERIAL_NUMBER_CAPACITY: usize = 32;

// ============================================================================
// Command ranges
// ============================================================================

/// Highest accepted brightness percentage.
pub const MAX_BRIGHTNESS_PERCENT: u8 = 100;

/// Highest meaningful image quality hint. Values are forwarded verbatim.
pub const MAX_QUALITY_PERCENT: u8 = 100;

// ============================================================================
// Native library resolution
// ============================================================================

/// Base name of the native deck library.
pub const NATIVE_LIBRARY_NAME: &str = "screamdeck";

/// Environment variable overriding the native library path.
pub const NATIVE_LIBRARY_ENV: &str = "SCREAMDECK_LIBRARY";

//! Core types for the screamdeck host binding.
//!
//! This crate holds the plain values exchanged between the native deck
//! library and application code: device and pixel-format tags, panel
//! geometry, enumeration results and key events. It performs no I/O.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

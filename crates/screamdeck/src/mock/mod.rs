//! Mock driver implementation for testing and development.
//!
//! This module provides a simulated native library that can be controlled
//! programmatically, so sessions and the key poller can be exercised without
//! physical hardware.

pub mod deck;

// Re-export commonly used types
pub use deck::{MockCall, MockDriver, MockDriverHandle, catalog_info};

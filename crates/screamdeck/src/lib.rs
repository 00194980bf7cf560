//! Host-side binding for Screamdeck key panels.
//!
//! A deck is a grid of keys, each with its own small display. This crate
//! finds attached decks, opens sessions to them, streams key press and
//! release events from a background poller and pushes images to the panel.
//! The USB protocol lives in the native `screamdeck` library, loaded at
//! runtime; this crate only wraps its call surface.
//!
//! # Design
//!
//! - **Driver seam**: every native call goes through the object-safe
//!   [`DeckDriver`] trait. [`NativeDriver`] forwards to the loaded library;
//!   [`MockDriver`](mock::MockDriver) simulates attached decks for tests.
//! - **Owned handles**: a [`DeckSession`] owns its device handle and frees it
//!   exactly once, after its key poller has stopped.
//! - **Edge-triggered events**: the poller diffs key-state snapshots and
//!   publishes one [`KeyEvent`] per change on a broadcast channel.
//! - **Errors for caller bugs only**: a missing device is `Ok(None)` and a
//!   rejected command is `Ok(false)`. See [`Error`].
//!
//! # Examples
//!
//! ```no_run
//! use screamdeck::{DeckSession, Directory, NativeDriver};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> screamdeck::Result<()> {
//!     let directory = Directory::new(Arc::new(NativeDriver::load()?));
//!
//!     for device in directory.enumerate()? {
//!         println!("{device}");
//!     }
//!
//!     let Some(session) = DeckSession::open_first(
//!         Arc::clone(directory.driver()),
//!         screamdeck::DeviceType::None,
//!     )?
//!     else {
//!         return Ok(());
//!     };
//!
//!     let mut events = session.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{event}");
//!         if event.index == 0 && !event.down {
//!             break;
//!         }
//!     }
//!
//!     session.close_async().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod driver;
pub mod mock;
pub mod native;
pub mod poller;
pub mod session;

// Re-export commonly used types for convenience
pub use config::{ReadLengthPolicy, SessionConfig};
pub use directory::Directory;
pub use driver::{DeckDriver, RawHandle};
pub use native::NativeDriver;
pub use poller::{KeyStateTracker, PollerState};
pub use screamdeck_core::{
    DeviceInfo, DeviceType, DeviceTypeInfo, Error, KeyEvent, PixelFormat, Result,
};
pub use session::DeckSession;

//! Common test utilities for integration tests.
//!
//! Every test drives real [`DeckSession`]s against a [`MockDriver`], which
//! records each native call in order. The helpers here attach a deck, open a
//! session to it and wait for key events with a bounded timeout so a broken
//! poller fails the test instead of hanging it.

#![allow(dead_code)]

use screamdeck::mock::{MockCall, MockDriver, MockDriverHandle, catalog_info};
use screamdeck::{DeckDriver, DeckSession, SessionConfig};
use screamdeck_core::{DeviceType, KeyEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Serial number of the standard 5x3 test deck.
pub const MK2_SERIAL: &str = "CL31K1A00001";

/// Serial number of the standard 3x2 test deck.
pub const MINI_SERIAL: &str = "BL21K1A00002";

/// Upper bound on waiting for a single key event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Mock driver with one deck of `device_type` attached.
pub fn mock_with(device_type: DeviceType, serial: &str) -> (Arc<dyn DeckDriver>, MockDriverHandle) {
    let (driver, mock) = MockDriver::new();
    mock.attach(
        catalog_info(device_type).expect("concrete device type"),
        serial,
    );
    (Arc::new(driver), mock)
}

/// Open a session to a freshly attached deck.
pub fn open_session(device_type: DeviceType, serial: &str) -> (DeckSession, MockDriverHandle) {
    open_session_with_config(device_type, serial, &SessionConfig::default())
}

pub fn open_session_with_config(
    device_type: DeviceType,
    serial: &str,
    config: &SessionConfig,
) -> (DeckSession, MockDriverHandle) {
    let (driver, mock) = mock_with(device_type, serial);
    let session = DeckSession::open_with_config(driver, device_type, serial, config)
        .expect("valid arguments")
        .expect("attached deck opens");
    (session, mock)
}

/// A snapshot of `len` released keys with `pressed` held down.
pub fn snapshot(len: usize, pressed: &[usize]) -> Vec<u8> {
    let mut keys = vec![0u8; len];
    for &index in pressed {
        keys[index] = 1;
    }
    keys
}

/// Next key event, failing the test after [`EVENT_TIMEOUT`].
pub async fn next_event(events: &mut broadcast::Receiver<KeyEvent>) -> KeyEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("key event within timeout")
        .expect("event channel open")
}

/// Assert no key event arrives within `wait`.
pub async fn assert_no_event(events: &mut broadcast::Receiver<KeyEvent>, wait: Duration) {
    if let Ok(result) = tokio::time::timeout(wait, events.recv()).await {
        panic!("unexpected key event: {result:?}");
    }
}

/// Assert the handle was freed exactly once, after every key read, and never
/// used afterwards.
pub fn assert_clean_teardown(mock: &MockDriverHandle) {
    let calls = mock.calls();
    let free_at = calls
        .iter()
        .position(MockCall::is_free)
        .expect("handle was freed");
    assert_eq!(mock.free_count(), 1, "handle freed more than once");
    assert!(
        calls[free_at..].iter().all(|call| !call.is_read()),
        "key read after free: {calls:?}"
    );
    assert_eq!(mock.use_after_free_count(), 0);
    assert_eq!(mock.open_count(), 0);
}

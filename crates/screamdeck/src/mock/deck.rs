//! Scriptable stand-in for the native deck library.
//!
//! [`MockDriver`] implements [`DeckDriver`] against an in-memory set of
//! attached decks. Key-state snapshots are fed in through a
//! [`MockDriverHandle`] and handed out by `read_key_timeout` in order. Every
//! call is recorded, so tests can assert on call order, such as the last key
//! read happening before the handle is freed.

use crate::driver::{DeckDriver, RawHandle};
use screamdeck_core::constants::SERIAL_NUMBER_CAPACITY;
use screamdeck_core::{DeviceInfo, DeviceType, DeviceTypeInfo, Error, PixelFormat, Result};
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// First token handed out as a device handle.
const FIRST_HANDLE_TOKEN: usize = 0x1000;

/// Geometry the native library reports for each model.
///
/// # Examples
///
/// ```
/// use screamdeck::mock::catalog_info;
/// use screamdeck_core::DeviceType;
///
/// let info = catalog_info(DeviceType::Mk2).unwrap();
/// assert_eq!((info.columns, info.rows), (5, 3));
/// assert!(catalog_info(DeviceType::None).is_none());
/// ```
pub fn catalog_info(device_type: DeviceType) -> Option<DeviceTypeInfo> {
    let (columns, rows, key_size, gap) = match device_type {
        DeviceType::None => return None,
        DeviceType::Original | DeviceType::OriginalMk2 | DeviceType::Mk2 => (5, 3, 72, 36),
        DeviceType::Mini | DeviceType::MiniMk2 => (3, 2, 80, 0),
        DeviceType::Xl | DeviceType::XlMk2 => (8, 4, 96, 36),
    };
    Some(DeviceTypeInfo {
        device_type,
        columns,
        rows,
        key_image_width: key_size,
        key_image_height: key_size,
        key_gap_width: gap,
        key_gap_height: gap,
        image_width: columns * key_size + (columns - 1) * gap,
        image_height: rows * key_size + (rows - 1) * gap,
    })
}

/// A native call as observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Enumerate,
    DeviceTypeInfo(DeviceType),
    Open {
        device_type: DeviceType,
        serial_number: String,
    },
    OpenFirst(DeviceType),
    Free {
        handle: usize,
    },
    HandleTypeInfo,
    SerialNumber,
    ReadKey,
    ReadKeyTimeout {
        timeout_ms: u32,
    },
    SetImage {
        format: PixelFormat,
        quality: u8,
        len: usize,
    },
    SetImage24 {
        format: PixelFormat,
        quality: u8,
        len: usize,
    },
    SetImage32 {
        format: PixelFormat,
        quality: u8,
        len: usize,
    },
    SetKeyImage {
        x: i32,
        y: i32,
        format: PixelFormat,
        quality: u8,
        len: usize,
    },
    SetBrightness(u8),
    SetScreensaver,
}

impl MockCall {
    pub fn is_read(&self) -> bool {
        matches!(self, MockCall::ReadKey | MockCall::ReadKeyTimeout { .. })
    }

    pub fn is_free(&self) -> bool {
        matches!(self, MockCall::Free { .. })
    }
}

#[derive(Debug, Clone)]
struct AttachedDevice {
    info: DeviceTypeInfo,
    serial_number: String,
}

#[derive(Debug)]
struct MockState {
    devices: Vec<AttachedDevice>,
    /// Open handle token -> index into `devices`.
    open: HashMap<usize, usize>,
    next_token: usize,
    calls: Vec<MockCall>,
    command_result: bool,
    free_result: bool,
    fail_type_info: bool,
    fail_serial_number: bool,
    hidden_types: Vec<DeviceType>,
    enumeration_error: Option<String>,
    use_after_free: usize,
}

impl MockState {
    fn new() -> Self {
        Self {
            devices: Vec::new(),
            open: HashMap::new(),
            next_token: FIRST_HANDLE_TOKEN,
            calls: Vec::new(),
            command_result: true,
            free_result: true,
            fail_type_info: false,
            fail_serial_number: false,
            hidden_types: Vec::new(),
            enumeration_error: None,
            use_after_free: 0,
        }
    }

    fn device(&mut self, handle: &RawHandle) -> Option<&AttachedDevice> {
        match self.open.get(&handle.addr()) {
            Some(&index) => self.devices.get(index),
            None => {
                self.use_after_free += 1;
                None
            }
        }
    }

    fn open_device(&mut self, index: usize) -> Option<RawHandle> {
        if self.open.values().any(|&open| open == index) {
            // Already open: the device is busy.
            return None;
        }
        let token = self.next_token;
        self.next_token += 0x10;
        self.open.insert(token, index);
        RawHandle::from_token(token)
    }

    fn command(&mut self, handle: &RawHandle, call: MockCall) -> bool {
        self.calls.push(call);
        self.device(handle).is_some() && self.command_result
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock native library for testing and development.
///
/// # Examples
///
/// ```
/// use screamdeck::driver::DeckDriver;
/// use screamdeck::mock::{MockDriver, catalog_info};
/// use screamdeck_core::DeviceType;
///
/// let (driver, handle) = MockDriver::new();
/// handle.attach(catalog_info(DeviceType::Mini).unwrap(), "AL12H1A00001");
///
/// let devices = driver.enumerate().unwrap();
/// assert_eq!(devices.len(), 1);
/// assert_eq!(devices[0].serial_number, "AL12H1A00001");
/// ```
#[derive(Debug)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    snapshots: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl MockDriver {
    /// Create a new mock library with no devices attached.
    ///
    /// Returns a tuple of (MockDriver, MockDriverHandle) where the handle
    /// attaches devices, feeds key-state snapshots and inspects calls.
    pub fn new() -> (Self, MockDriverHandle) {
        let state = Arc::new(Mutex::new(MockState::new()));
        let (snapshot_tx, snapshot_rx) = mpsc::channel();

        let driver = Self {
            state: Arc::clone(&state),
            snapshots: Mutex::new(snapshot_rx),
        };
        let handle = MockDriverHandle { state, snapshot_tx };

        (driver, handle)
    }

    fn next_snapshot(&self, timeout: Option<Duration>) -> Option<Vec<u8>> {
        let rx = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        match timeout {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(snapshot) => Some(snapshot),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
            },
            None => rx.recv().ok(),
        }
    }

    fn deliver(&self, handle: &RawHandle, buffer: &mut [u8], timeout: Option<Duration>) -> i32 {
        if lock(&self.state).device(handle).is_none() {
            return -1;
        }
        match self.next_snapshot(timeout) {
            Some(snapshot) => {
                let n = snapshot.len().min(buffer.len());
                buffer[..n].copy_from_slice(&snapshot[..n]);
                i32::try_from(snapshot.len()).unwrap_or(i32::MAX)
            }
            None => 0,
        }
    }
}

impl DeckDriver for MockDriver {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::Enumerate);
        if let Some(message) = state.enumeration_error.clone() {
            return Err(Error::integrity(message));
        }
        Ok(state
            .devices
            .iter()
            .map(|d| DeviceInfo::new(d.info.device_type, d.serial_number.clone()))
            .collect())
    }

    fn device_type_info(&self, device_type: DeviceType) -> Option<DeviceTypeInfo> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::DeviceTypeInfo(device_type));
        if state.hidden_types.contains(&device_type) {
            return None;
        }
        catalog_info(device_type)
    }

    fn open(&self, device_type: DeviceType, serial_number: &str) -> Option<RawHandle> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::Open {
            device_type,
            serial_number: serial_number.to_string(),
        });
        let index = state.devices.iter().position(|d| {
            d.info.device_type == device_type && d.serial_number == serial_number
        })?;
        state.open_device(index)
    }

    fn open_first(&self, device_type: DeviceType) -> Option<RawHandle> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::OpenFirst(device_type));
        let index = state.devices.iter().enumerate().position(|(index, d)| {
            (!device_type.is_concrete() || d.info.device_type == device_type)
                && !state.open.values().any(|&open| open == index)
        })?;
        state.open_device(index)
    }

    fn free(&self, handle: &RawHandle) -> bool {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::Free {
            handle: handle.addr(),
        });
        state.open.remove(&handle.addr()).is_some() && state.free_result
    }

    fn handle_type_info(&self, handle: &RawHandle) -> Option<DeviceTypeInfo> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::HandleTypeInfo);
        if state.fail_type_info {
            return None;
        }
        state.device(handle).map(|d| d.info)
    }

    fn serial_number(&self, handle: &RawHandle) -> Option<String> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::SerialNumber);
        if state.fail_serial_number {
            return None;
        }
        state
            .device(handle)
            .map(|d| d.serial_number.clone())
            .filter(|serial| serial.encode_utf16().count() < SERIAL_NUMBER_CAPACITY)
    }

    fn read_key(&self, handle: &RawHandle, buffer: &mut [u8]) -> i32 {
        lock(&self.state).calls.push(MockCall::ReadKey);
        self.deliver(handle, buffer, None)
    }

    fn read_key_timeout(&self, handle: &RawHandle, buffer: &mut [u8], timeout_ms: u32) -> i32 {
        lock(&self.state)
            .calls
            .push(MockCall::ReadKeyTimeout { timeout_ms });
        self.deliver(
            handle,
            buffer,
            Some(Duration::from_millis(u64::from(timeout_ms))),
        )
    }

    fn set_image(
        &self,
        handle: &RawHandle,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool {
        let call = MockCall::SetImage {
            format,
            quality,
            len: buffer.len(),
        };
        lock(&self.state).command(handle, call)
    }

    fn set_image_24(
        &self,
        handle: &RawHandle,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool {
        let call = MockCall::SetImage24 {
            format,
            quality,
            len: buffer.len(),
        };
        lock(&self.state).command(handle, call)
    }

    fn set_image_32(
        &self,
        handle: &RawHandle,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool {
        let call = MockCall::SetImage32 {
            format,
            quality,
            len: buffer.len(),
        };
        lock(&self.state).command(handle, call)
    }

    fn set_key_image(
        &self,
        handle: &RawHandle,
        x: i32,
        y: i32,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool {
        let call = MockCall::SetKeyImage {
            x,
            y,
            format,
            quality,
            len: buffer.len(),
        };
        lock(&self.state).command(handle, call)
    }

    fn set_brightness(&self, handle: &RawHandle, percent: u8) -> bool {
        lock(&self.state).command(handle, MockCall::SetBrightness(percent))
    }

    fn set_screensaver(&self, handle: &RawHandle) -> bool {
        lock(&self.state).command(handle, MockCall::SetScreensaver)
    }
}

/// Handle for controlling a mock driver.
///
/// Stays usable after the driver has been moved into a session.
#[derive(Debug, Clone)]
pub struct MockDriverHandle {
    state: Arc<Mutex<MockState>>,
    snapshot_tx: mpsc::Sender<Vec<u8>>,
}

impl MockDriverHandle {
    /// Plug in a device.
    pub fn attach(&self, info: DeviceTypeInfo, serial_number: impl Into<String>) {
        lock(&self.state).devices.push(AttachedDevice {
            info,
            serial_number: serial_number.into(),
        });
    }

    /// Queue a raw key-state snapshot for the next key read.
    ///
    /// The read reports the snapshot's own length, so snapshots shorter or
    /// longer than the panel exercise the poller's length check.
    pub fn push_snapshot(&self, snapshot: impl Into<Vec<u8>>) {
        // The receiver lives as long as the driver; after that nobody reads.
        let _ = self.snapshot_tx.send(snapshot.into());
    }

    /// Success flag returned by every image, brightness and screensaver call.
    pub fn set_command_result(&self, result: bool) {
        lock(&self.state).command_result = result;
    }

    /// Success flag returned by `free` for handles that are open.
    pub fn set_free_result(&self, result: bool) {
        lock(&self.state).free_result = result;
    }

    /// Make `handle_type_info` report failure.
    pub fn fail_type_info(&self, fail: bool) {
        lock(&self.state).fail_type_info = fail;
    }

    /// Make `serial_number` report failure.
    pub fn fail_serial_number(&self, fail: bool) {
        lock(&self.state).fail_serial_number = fail;
    }

    /// Drop a model from the static catalog, as an older library build would.
    pub fn hide_device_type(&self, device_type: DeviceType) {
        lock(&self.state).hidden_types.push(device_type);
    }

    /// Make `enumerate` fail as if the native list held a malformed entry.
    pub fn fail_enumeration(&self, message: impl Into<String>) {
        lock(&self.state).enumeration_error = Some(message.into());
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    pub fn free_count(&self) -> usize {
        lock(&self.state).calls.iter().filter(|c| c.is_free()).count()
    }

    pub fn read_count(&self) -> usize {
        lock(&self.state).calls.iter().filter(|c| c.is_read()).count()
    }

    /// Number of handles currently open.
    pub fn open_count(&self) -> usize {
        lock(&self.state).open.len()
    }

    /// Calls made with a handle that was never opened or already freed.
    pub fn use_after_free_count(&self) -> usize {
        lock(&self.state).use_after_free
    }
}

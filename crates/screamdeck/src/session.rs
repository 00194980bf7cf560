//! Open deck sessions.
//!
//! A [`DeckSession`] owns one native device handle. Constructing it opens the
//! device, snapshots the panel geometry and starts the key poller; closing it
//! stops the poller and frees the handle, in that order, exactly once.
//!
//! ```text
//!  caller thread                    screamdeck-keys-<serial>
//!  ─────────────                    ────────────────────────
//!  open ──► handle, geometry ──────► read_key_timeout ◄─┐
//!  set_image / set_brightness ...    diff, broadcast ───┘
//!  close ──► cancel ───────────────► loop exits, Stopped
//!        ◄── join / exit notify ◄───┘
//!        ──► free(handle)
//! ```
//!
//! # Examples
//!
//! ```
//! use screamdeck::mock::{MockDriver, catalog_info};
//! use screamdeck::DeckSession;
//! use screamdeck_core::{DeviceType, PixelFormat};
//! use std::sync::Arc;
//!
//! # fn main() -> screamdeck::Result<()> {
//! let (driver, mock) = MockDriver::new();
//! mock.attach(catalog_info(DeviceType::Mini).unwrap(), "AL12H1A00001");
//!
//! let session = DeckSession::open(Arc::new(driver), DeviceType::Mini, "AL12H1A00001")?
//!     .expect("device is attached");
//!
//! let info = session.type_info();
//! let black = vec![0u8; info.key_image_buffer_len(PixelFormat::Rgb)];
//! assert!(session.set_key_image(0, 0, &black, PixelFormat::Rgb, 90)?);
//!
//! session.close();
//! assert_eq!(mock.free_count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::config::SessionConfig;
use crate::driver::DeckDriver;
use crate::poller::{KeyPoller, NativeDevice, PollerState};
use screamdeck_core::constants::MAX_BRIGHTNESS_PERCENT;
use screamdeck_core::{
    DeviceInfo, DeviceType, DeviceTypeInfo, Error, KeyEvent, PixelFormat, Result,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// An open connection to one deck.
pub struct DeckSession {
    device: Arc<NativeDevice>,
    info: DeviceTypeInfo,
    serial_number: String,
    events: broadcast::Sender<KeyEvent>,

    /// Taken by whichever teardown path runs first.
    poller: Option<KeyPoller>,
}

impl DeckSession {
    /// Open the device with this type and serial number.
    ///
    /// Returns `Ok(None)` when no such device can be opened.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` when `device_type` is
    /// [`DeviceType::None`] or `serial_number` is blank or contains NUL.
    pub fn open(
        driver: Arc<dyn DeckDriver>,
        device_type: DeviceType,
        serial_number: &str,
    ) -> Result<Option<Self>> {
        Self::open_with_config(driver, device_type, serial_number, &SessionConfig::default())
    }

    /// [`open`](Self::open) with explicit session configuration.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open), plus `Error::Config` for an invalid
    /// configuration and `Error::Io` if the poller thread cannot start.
    pub fn open_with_config(
        driver: Arc<dyn DeckDriver>,
        device_type: DeviceType,
        serial_number: &str,
        config: &SessionConfig,
    ) -> Result<Option<Self>> {
        if !device_type.is_concrete() {
            return Err(Error::invalid_argument(format!(
                "Cannot open device type {device_type}; use open_first for any type"
            )));
        }
        validate_serial_number(serial_number)?;
        config.validate()?;

        let Some(handle) = driver.open(device_type, serial_number) else {
            warn!(serial = serial_number, %device_type, "Deck not found or busy");
            return Ok(None);
        };
        let Some(info) = driver.handle_type_info(&handle) else {
            warn!(serial = serial_number, %device_type, "Deck opened but geometry unavailable");
            return Ok(None);
        };

        let device = Arc::new(NativeDevice { driver, handle });
        Self::start(device, info, serial_number.to_string(), config).map(Some)
    }

    /// Open a device found by [`Directory::enumerate`](crate::Directory::enumerate).
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open).
    pub fn open_device(driver: Arc<dyn DeckDriver>, device: &DeviceInfo) -> Result<Option<Self>> {
        Self::open(driver, device.device_type, &device.serial_number)
    }

    /// Open the first attachable device of `device_type`, or of any type
    /// for [`DeviceType::None`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the poller thread cannot start.
    pub fn open_first(driver: Arc<dyn DeckDriver>, device_type: DeviceType) -> Result<Option<Self>> {
        Self::open_first_with_config(driver, device_type, &SessionConfig::default())
    }

    /// [`open_first`](Self::open_first) with explicit session configuration.
    ///
    /// # Errors
    ///
    /// As [`open_first`](Self::open_first), plus `Error::Config` for an
    /// invalid configuration.
    pub fn open_first_with_config(
        driver: Arc<dyn DeckDriver>,
        device_type: DeviceType,
        config: &SessionConfig,
    ) -> Result<Option<Self>> {
        config.validate()?;

        let Some(handle) = driver.open_first(device_type) else {
            warn!(%device_type, "No attachable deck found");
            return Ok(None);
        };
        let Some(info) = driver.handle_type_info(&handle) else {
            warn!(%device_type, "Deck opened but geometry unavailable");
            return Ok(None);
        };
        let Some(serial_number) = driver.serial_number(&handle) else {
            warn!(%device_type, "Deck opened but serial number unreadable");
            return Ok(None);
        };

        let device = Arc::new(NativeDevice { driver, handle });
        Self::start(device, info, serial_number, config).map(Some)
    }

    fn start(
        device: Arc<NativeDevice>,
        info: DeviceTypeInfo,
        serial_number: String,
        config: &SessionConfig,
    ) -> Result<Self> {
        let (events, _) = broadcast::channel(config.event_capacity);

        let poller = match KeyPoller::spawn(
            Arc::clone(&device),
            &info,
            &serial_number,
            config,
            events.clone(),
        ) {
            Ok(poller) => poller,
            Err(e) => {
                free_device(&device, &serial_number);
                return Err(e);
            }
        };

        info!(
            serial = %serial_number,
            device_type = %info.device_type,
            keys = info.key_count(),
            "Opened deck session"
        );

        Ok(Self {
            device,
            info,
            serial_number,
            events,
            poller: Some(poller),
        })
    }

    /// Panel geometry captured when the session was opened.
    pub fn type_info(&self) -> &DeviceTypeInfo {
        &self.info
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Receive key events published from now on.
    ///
    /// Each receiver gets every event; one that falls more than
    /// `event_capacity` events behind loses the oldest with
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<KeyEvent> {
        self.events.subscribe()
    }

    pub fn poller_state(&self) -> PollerState {
        self.poller
            .as_ref()
            .map_or(PollerState::Stopped, KeyPoller::state)
    }

    /// Set backlight brightness in percent.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` when `percent` exceeds 100.
    pub fn set_brightness(&self, percent: u8) -> Result<bool> {
        if percent > MAX_BRIGHTNESS_PERCENT {
            return Err(Error::invalid_argument(format!(
                "Brightness must be 0-{MAX_BRIGHTNESS_PERCENT}, got {percent}"
            )));
        }
        Ok(self.driver().set_brightness(self.handle(), percent))
    }

    /// Show the device's screensaver.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` matches the other commands.
    pub fn set_screensaver(&self) -> Result<bool> {
        Ok(self.driver().set_screensaver(self.handle()))
    }

    /// Push a full-panel image in any pixel format, through
    /// [`set_image_24`](Self::set_image_24) for 3-byte formats and
    /// [`set_image_32`](Self::set_image_32) otherwise.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` when `buffer` is shorter than the
    /// panel image in `format`.
    pub fn set_image(&self, buffer: &[u8], format: PixelFormat, quality: u8) -> Result<bool> {
        if format.is_24_bit() {
            self.set_image_24(buffer, format, quality)
        } else {
            self.set_image_32(buffer, format, quality)
        }
    }

    /// Push a full-panel image in a 3-byte pixel format.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a 4-byte `format` or a short
    /// `buffer`.
    pub fn set_image_24(&self, buffer: &[u8], format: PixelFormat, quality: u8) -> Result<bool> {
        if !format.is_24_bit() {
            return Err(Error::invalid_argument(format!(
                "set_image_24 needs a 24-bit pixel format, got {format:?}"
            )));
        }
        self.check_panel_buffer(buffer, format)?;
        Ok(self
            .driver()
            .set_image_24(self.handle(), buffer, format, quality))
    }

    /// Push a full-panel image in a 4-byte pixel format.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for a 3-byte `format` or a short
    /// `buffer`.
    pub fn set_image_32(&self, buffer: &[u8], format: PixelFormat, quality: u8) -> Result<bool> {
        if !format.is_32_bit() {
            return Err(Error::invalid_argument(format!(
                "set_image_32 needs a 32-bit pixel format, got {format:?}"
            )));
        }
        self.check_panel_buffer(buffer, format)?;
        Ok(self
            .driver()
            .set_image_32(self.handle(), buffer, format, quality))
    }

    /// Push an image to the key at column `x`, row `y`.
    ///
    /// Coordinates are passed to the device unchecked.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` when `buffer` is shorter than one key
    /// image in `format`.
    pub fn set_key_image(
        &self,
        x: i32,
        y: i32,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> Result<bool> {
        let needed = self.info.key_image_buffer_len(format);
        if buffer.len() < needed {
            return Err(Error::invalid_argument(format!(
                "Key image buffer holds {} bytes, {needed} needed for {}x{} {format:?}",
                buffer.len(),
                self.info.key_image_width,
                self.info.key_image_height,
            )));
        }
        Ok(self
            .driver()
            .set_key_image(self.handle(), x, y, buffer, format, quality))
    }

    /// Stop the key poller and free the device, blocking until the poller
    /// thread has exited.
    pub fn close(mut self) {
        self.shutdown();
    }

    /// Stop the key poller and free the device without blocking the calling
    /// async task while the poller finishes its current read.
    pub async fn close_async(mut self) {
        if let Some(poller) = self.poller.as_mut() {
            poller.wait_stopped().await;
        }
        // The loop is over, so joining the thread returns at once.
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(poller) = self.poller.take() {
            debug!(serial = %self.serial_number, "Stopping key poller");
            poller.stop();
            free_device(&self.device, &self.serial_number);
        }
    }

    fn check_panel_buffer(&self, buffer: &[u8], format: PixelFormat) -> Result<()> {
        let needed = self.info.image_buffer_len(format);
        if buffer.len() < needed {
            return Err(Error::invalid_argument(format!(
                "Image buffer holds {} bytes, {needed} needed for {}x{} {format:?}",
                buffer.len(),
                self.info.image_width,
                self.info.image_height,
            )));
        }
        Ok(())
    }

    fn driver(&self) -> &dyn DeckDriver {
        self.device.driver.as_ref()
    }

    fn handle(&self) -> &crate::driver::RawHandle {
        &self.device.handle
    }
}

impl Drop for DeckSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DeckSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeckSession")
            .field("serial_number", &self.serial_number)
            .field("device_type", &self.info.device_type)
            .field("handle", &self.device.handle)
            .field("poller_state", &self.poller_state())
            .finish()
    }
}

/// Free the handle once the poller has released its reference.
fn free_device(device: &Arc<NativeDevice>, serial_number: &str) {
    debug_assert_eq!(
        Arc::strong_count(device),
        1,
        "device freed while still shared with the poller"
    );
    let freed = device.driver.free(&device.handle);
    if !freed {
        error!(serial = %serial_number, handle = ?device.handle, "Native free failed");
    }
    debug_assert!(freed, "native free failed for {serial_number}");
    info!(serial = %serial_number, "Closed deck session");
}

fn validate_serial_number(serial_number: &str) -> Result<()> {
    if serial_number.trim().is_empty() {
        return Err(Error::invalid_argument("Serial number must not be blank"));
    }
    if serial_number.contains('\0') {
        return Err(Error::invalid_argument(
            "Serial number must not contain NUL characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_serial_number() {
        assert!(validate_serial_number("AL12H1A00001").is_ok());
        assert!(validate_serial_number("").unwrap_err().is_invalid_argument());
        assert!(validate_serial_number("  \t").unwrap_err().is_invalid_argument());
        assert!(validate_serial_number("AL\012").unwrap_err().is_invalid_argument());
    }

    /// Collects formatted log output for one test.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .matches(needle)
                .count()
        }
    }

    #[tokio::test]
    async fn test_close_async_logs_poller_stop_once() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (driver, mock) = crate::mock::MockDriver::new();
        let info = crate::mock::catalog_info(DeviceType::Mini).unwrap();
        mock.attach(info, "BL21K1A00002");
        let session = DeckSession::open(Arc::new(driver), DeviceType::Mini, "BL21K1A00002")
            .unwrap()
            .unwrap();

        session.close_async().await;
        assert_eq!(logs.count("Stopping key poller"), 1);
    }
}

//! Device discovery and the device type catalog.

use crate::driver::DeckDriver;
use screamdeck_core::{DeviceInfo, DeviceType, DeviceTypeInfo, Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Entry point for finding decks before opening a session.
///
/// # Examples
///
/// ```
/// use screamdeck::mock::{MockDriver, catalog_info};
/// use screamdeck::Directory;
/// use screamdeck_core::DeviceType;
/// use std::sync::Arc;
///
/// let (driver, mock) = MockDriver::new();
/// mock.attach(catalog_info(DeviceType::Xl).unwrap(), "CL15K1A00042");
///
/// let directory = Directory::new(Arc::new(driver));
/// let devices = directory.enumerate().unwrap();
/// assert_eq!(devices[0].device_type, DeviceType::Xl);
///
/// let info = directory.device_type_info(DeviceType::Xl).unwrap();
/// assert_eq!(info.key_count(), 32);
/// ```
#[derive(Clone)]
pub struct Directory {
    driver: Arc<dyn DeckDriver>,
}

impl Directory {
    pub fn new(driver: Arc<dyn DeckDriver>) -> Self {
        Self { driver }
    }

    /// Driver shared with sessions opened from this directory.
    pub fn driver(&self) -> &Arc<dyn DeckDriver> {
        &self.driver
    }

    /// List the decks attached right now. Nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns `Error::Integrity` when the native list holds an entry that
    /// cannot be decoded.
    pub fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let devices = self.driver.enumerate()?;
        debug!(count = devices.len(), "Enumerated decks");
        Ok(devices)
    }

    /// Static panel geometry of a model.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for [`DeviceType::None`] and
    /// `Error::UnknownDeviceType` when the native library has no entry for
    /// the model.
    pub fn device_type_info(&self, device_type: DeviceType) -> Result<DeviceTypeInfo> {
        if !device_type.is_concrete() {
            return Err(Error::invalid_argument(
                "Device type None has no panel geometry",
            ));
        }
        self.driver
            .device_type_info(device_type)
            .ok_or(Error::UnknownDeviceType(device_type))
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory").finish_non_exhaustive()
    }
}

//! Error taxonomy for deck operations.
//!
//! Only conditions the caller cannot treat as routine are errors. A device
//! that cannot be opened is reported as `Ok(None)` and a command the native
//! layer rejects is reported as `Ok(false)`; neither appears here.

use crate::types::DeviceType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Caller passed a value outside the contract of the operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The native library returned data that cannot be interpreted.
    #[error("Native data integrity error: {message}")]
    Integrity { message: String },

    /// The native library has no geometry for this device type.
    #[error("No device type info for {0}")]
    UnknownDeviceType(DeviceType),

    /// The native library could not be loaded or lacks a symbol.
    #[error("Failed to load native library {path}: {message}")]
    LibraryLoad { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a new integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Create a new library load error.
    pub fn library_load(path: impl Into<String>, message: impl ToString) -> Self {
        Self::LibraryLoad {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error was caused by the caller rather than the device.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

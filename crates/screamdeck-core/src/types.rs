use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deck model tag, matching the native library's enum values.
///
/// `None` is not a device: it is the wildcard accepted by `open_first` and
/// is rejected wherever a concrete model is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(i32)]
pub enum DeviceType {
    None = 0,
    Original = 0x0060,
    OriginalMk2 = 0x006d,
    Mk2 = 0x0080,
    Mini = 0x0063,
    MiniMk2 = 0x0090,
    Xl = 0x006c,
    XlMk2 = 0x008f,
}

impl DeviceType {
    /// Every concrete model, in native enum order.
    pub const CONCRETE: [DeviceType; 7] = [
        DeviceType::Original,
        DeviceType::OriginalMk2,
        DeviceType::Mk2,
        DeviceType::Mini,
        DeviceType::MiniMk2,
        DeviceType::Xl,
        DeviceType::XlMk2,
    ];

    /// Raw native value.
    #[must_use]
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Whether this names an actual model rather than the wildcard.
    #[must_use]
    pub fn is_concrete(self) -> bool {
        self != DeviceType::None
    }

    /// Stable lowercase name, also accepted by [`FromStr`](std::str::FromStr).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            DeviceType::None => "none",
            DeviceType::Original => "original",
            DeviceType::OriginalMk2 => "original-mk2",
            DeviceType::Mk2 => "mk2",
            DeviceType::Mini => "mini",
            DeviceType::MiniMk2 => "mini-mk2",
            DeviceType::Xl => "xl",
            DeviceType::XlMk2 => "xl-mk2",
        }
    }
}

impl TryFrom<i32> for DeviceType {
    type Error = Error;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(DeviceType::None),
            0x0060 => Ok(DeviceType::Original),
            0x006d => Ok(DeviceType::OriginalMk2),
            0x0080 => Ok(DeviceType::Mk2),
            0x0063 => Ok(DeviceType::Mini),
            0x0090 => Ok(DeviceType::MiniMk2),
            0x006c => Ok(DeviceType::Xl),
            0x008f => Ok(DeviceType::XlMk2),
            other => Err(Error::invalid_argument(format!(
                "Invalid device type value: {other:#06x}"
            ))),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        std::iter::once(DeviceType::None)
            .chain(DeviceType::CONCRETE)
            .find(|t| t.name() == normalized)
            .ok_or_else(|| Error::invalid_argument(format!("Unknown device type: {s}")))
    }
}

/// Channel layout of an image buffer handed to the device.
///
/// `Rgb` and `Bgr` are packed 3-byte formats; the rest are 4-byte formats
/// that differ only in channel order and where the padding or alpha byte
/// sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum PixelFormat {
    Rgb = 0,
    Bgr = 1,
    Rgbx = 2,
    Bgrx = 3,
    Xbgr = 4,
    Xrgb = 5,
    Rgba = 6,
    Bgra = 7,
    Abgr = 8,
    Argb = 9,
}

impl PixelFormat {
    /// Raw native value.
    #[must_use]
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        if self.is_24_bit() { 3 } else { 4 }
    }

    #[must_use]
    pub fn is_24_bit(self) -> bool {
        matches!(self, PixelFormat::Rgb | PixelFormat::Bgr)
    }

    #[must_use]
    pub fn is_32_bit(self) -> bool {
        !self.is_24_bit()
    }
}

impl TryFrom<i32> for PixelFormat {
    type Error = Error;

    fn try_from(raw: i32) -> Result<Self> {
        Ok(match raw {
            0 => PixelFormat::Rgb,
            1 => PixelFormat::Bgr,
            2 => PixelFormat::Rgbx,
            3 => PixelFormat::Bgrx,
            4 => PixelFormat::Xbgr,
            5 => PixelFormat::Xrgb,
            6 => PixelFormat::Rgba,
            7 => PixelFormat::Bgra,
            8 => PixelFormat::Abgr,
            9 => PixelFormat::Argb,
            other => {
                return Err(Error::invalid_argument(format!(
                    "Invalid pixel format value: {other}"
                )));
            }
        })
    }
}

/// Panel geometry of a deck model.
///
/// Obtained from the native library, either for an open device or by type.
/// Keys are indexed row-major: `index = y * columns + x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceTypeInfo {
    pub device_type: DeviceType,
    pub columns: u32,
    pub rows: u32,
    pub key_image_width: u32,
    pub key_image_height: u32,
    pub key_gap_width: u32,
    pub key_gap_height: u32,
    /// Width of the full-panel image, gaps included.
    pub image_width: u32,
    /// Height of the full-panel image, gaps included.
    pub image_height: u32,
}

impl DeviceTypeInfo {
    /// Number of keys, and the length of a key-state snapshot.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// Column and row of a key index, or `None` past the last key.
    #[must_use]
    pub fn key_position(&self, index: usize) -> Option<(u32, u32)> {
        if index >= self.key_count() {
            return None;
        }
        let columns = self.columns as usize;
        Some(((index % columns) as u32, (index / columns) as u32))
    }

    /// Row-major index of a key, or `None` outside the grid.
    #[must_use]
    pub fn key_index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.columns && y < self.rows)
            .then(|| y as usize * self.columns as usize + x as usize)
    }

    /// Bytes needed for a full-panel image in `format`.
    #[must_use]
    pub fn image_buffer_len(&self, format: PixelFormat) -> usize {
        self.image_width as usize * self.image_height as usize * format.bytes_per_pixel()
    }

    /// Bytes needed for a single key image in `format`.
    #[must_use]
    pub fn key_image_buffer_len(&self, format: PixelFormat) -> usize {
        self.key_image_width as usize * self.key_image_height as usize * format.bytes_per_pixel()
    }
}

/// An attached deck as reported by enumeration.
///
/// Purely descriptive: holding one does not keep the device open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn new(device_type: DeviceType, serial_number: impl Into<String>) -> Self {
        Self {
            device_type,
            serial_number: serial_number.into(),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.serial_number, self.device_type)
    }
}

/// A key press or release, derived from two consecutive key-state snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Row-major key index.
    pub index: usize,
    pub x: u32,
    pub y: u32,
    /// `true` on press, `false` on release.
    pub down: bool,
}

impl KeyEvent {
    /// Build an event for `index` on a panel `columns` keys wide.
    ///
    /// `columns` must be non-zero.
    #[must_use]
    pub fn new(index: usize, columns: u32, down: bool) -> Self {
        let columns = columns as usize;
        Self {
            index,
            x: (index % columns) as u32,
            y: (index / columns) as u32,
            down,
        }
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Key {} ({}, {}) {}",
            self.index,
            self.x,
            self.y,
            if self.down { "Pressed" } else { "Released" }
        )
    }
}

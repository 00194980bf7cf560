//! Native call surface of the deck library.
//!
//! [`DeckDriver`] mirrors the `scdk_*` C functions one to one, translated into
//! owned Rust values. It is deliberately synchronous: every native call
//! returns promptly except key reads, which carry their own timeout. Two
//! implementations exist: [`NativeDriver`](crate::native::NativeDriver),
//! which forwards to the dynamically loaded library, and
//! [`MockDriver`](crate::mock::MockDriver), a scriptable double for tests.
//!
//! The trait is object-safe; sessions hold an `Arc<dyn DeckDriver>` that is
//! shared between the caller and the key poller thread. The native library is
//! responsible for making concurrent calls against one handle safe.

use screamdeck_core::{DeviceInfo, DeviceType, DeviceTypeInfo, PixelFormat, Result};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

/// Opaque, non-null handle to an open native device.
///
/// Neither `Clone` nor `Copy`: a handle has one owner, and freeing it through
/// [`DeckDriver::free`] ends its life.
pub struct RawHandle(NonNull<c_void>);

// SAFETY: the handle is an opaque token; the native library guarantees that
// it may be used from any thread, including concurrently by the key poller
// and command callers.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    /// Wrap a native pointer, returning `None` for null.
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Build a handle from an address that will never be dereferenced.
    ///
    /// Used by drivers that hand out tokens instead of real pointers.
    pub fn from_token(token: usize) -> Option<Self> {
        Self::from_ptr(std::ptr::without_provenance_mut(token))
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Numeric address, for logging and for token-based drivers.
    pub fn addr(&self) -> usize {
        self.0.as_ptr().addr()
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:#x})", self.addr())
    }
}

/// Functions exposed by the native deck library.
///
/// Boolean returns are the native success flags, passed through unchanged.
/// Argument validation is the caller's job; implementations forward what
/// they are given.
pub trait DeckDriver: Send + Sync {
    /// List attached devices, copying every entry into owned memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integrity`](screamdeck_core::Error::Integrity) when an
    /// entry cannot be decoded.
    fn enumerate(&self) -> Result<Vec<DeviceInfo>>;

    /// Static panel geometry for a model, without opening a device.
    fn device_type_info(&self, device_type: DeviceType) -> Option<DeviceTypeInfo>;

    /// Open the device with this exact type and serial number.
    fn open(&self, device_type: DeviceType, serial_number: &str) -> Option<RawHandle>;

    /// Open the first attached device of a type, or of any type for
    /// [`DeviceType::None`].
    fn open_first(&self, device_type: DeviceType) -> Option<RawHandle>;

    /// Release a handle obtained from `open` or `open_first`.
    fn free(&self, handle: &RawHandle) -> bool;

    /// Panel geometry of an open device.
    fn handle_type_info(&self, handle: &RawHandle) -> Option<DeviceTypeInfo>;

    /// Serial number of an open device, read through a buffer of
    /// [`SERIAL_NUMBER_CAPACITY`](screamdeck_core::constants::SERIAL_NUMBER_CAPACITY)
    /// UTF-16 units. `None` when the native call fails or the result does not
    /// decode.
    fn serial_number(&self, handle: &RawHandle) -> Option<String>;

    /// Blocking key-state read. Returns the reported byte count.
    fn read_key(&self, handle: &RawHandle, buffer: &mut [u8]) -> i32;

    /// Key-state read that gives up after `timeout_ms`.
    fn read_key_timeout(&self, handle: &RawHandle, buffer: &mut [u8], timeout_ms: u32) -> i32;

    fn set_image(
        &self,
        handle: &RawHandle,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool;

    fn set_image_24(
        &self,
        handle: &RawHandle,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool;

    fn set_image_32(
        &self,
        handle: &RawHandle,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool;

    fn set_key_image(
        &self,
        handle: &RawHandle,
        x: i32,
        y: i32,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool;

    fn set_brightness(&self, handle: &RawHandle, percent: u8) -> bool;

    fn set_screensaver(&self, handle: &RawHandle) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_handle_rejects_null() {
        assert!(RawHandle::from_ptr(std::ptr::null_mut()).is_none());
        assert!(RawHandle::from_token(0).is_none());
    }

    #[test]
    fn test_raw_handle_token_roundtrip() {
        let handle = RawHandle::from_token(0x1000).unwrap();
        assert_eq!(handle.addr(), 0x1000);
        assert_eq!(format!("{handle:?}"), "RawHandle(0x1000)");
    }
}

//! Driver backed by the native `screamdeck` shared library.
//!
//! The library is loaded at runtime with `libloading`, so nothing links
//! against it at build time and the rest of the crate (and its tests) work on
//! machines without it. All `scdk_*` symbols are resolved once in
//! [`NativeDriver::load_from`]; a missing symbol fails the load rather than
//! the first call.

use crate::driver::{DeckDriver, RawHandle};
use libloading::Library;
use screamdeck_core::constants::{NATIVE_LIBRARY_ENV, NATIVE_LIBRARY_NAME, SERIAL_NUMBER_CAPACITY};
use screamdeck_core::{DeviceInfo, DeviceType, DeviceTypeInfo, Error, PixelFormat, Result};
use std::ffi::{OsStr, OsString, c_int, c_void};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// Longest serial string accepted from enumeration, in UTF-16 units.
const MAX_ENUMERATED_SERIAL_LEN: usize = 256;

/// Entry of the linked list returned by `scdk_enumerate`.
#[repr(C)]
struct NativeDeviceInfo {
    serial_number: *const u16,
    device_type: c_int,
    next: *const NativeDeviceInfo,
}

#[repr(C)]
struct NativeDeviceTypeInfo {
    device_type: c_int,
    columns: c_int,
    rows: c_int,
    key_image_width: c_int,
    key_image_height: c_int,
    key_gap_width: c_int,
    key_gap_height: c_int,
    image_width: c_int,
    image_height: c_int,
}

type EnumerateFn = unsafe extern "C" fn() -> *const NativeDeviceInfo;
type FreeEnumerationFn = unsafe extern "C" fn(*const NativeDeviceInfo);
type OpenFn = unsafe extern "C" fn(*mut *mut c_void, c_int, *const u16) -> u8;
type OpenFirstFn = unsafe extern "C" fn(*mut *mut c_void, c_int) -> u8;
type FreeFn = unsafe extern "C" fn(*mut c_void) -> u8;
type TypeInfoFn = unsafe extern "C" fn(*mut c_void) -> *const NativeDeviceTypeInfo;
type TypeInfoFromTypeFn = unsafe extern "C" fn(c_int) -> *const NativeDeviceTypeInfo;
type SerialNumberFn = unsafe extern "C" fn(*mut c_void, *mut u16, usize) -> u8;
type ReadKeyFn = unsafe extern "C" fn(*mut c_void, *mut u8, c_int) -> c_int;
type ReadKeyTimeoutFn = unsafe extern "C" fn(*mut c_void, *mut u8, c_int, c_int) -> c_int;
type SetImageFn = unsafe extern "C" fn(*mut c_void, *const u8, c_int, c_int) -> u8;
type SetKeyImageFn =
    unsafe extern "C" fn(*mut c_void, c_int, c_int, *const u8, c_int, c_int) -> u8;
type SetBrightnessFn = unsafe extern "C" fn(*mut c_void, c_int) -> u8;
type SetScreensaverFn = unsafe extern "C" fn(*mut c_void) -> u8;

/// Function pointers copied out of the library.
struct Symbols {
    enumerate: EnumerateFn,
    free_enumeration: FreeEnumerationFn,
    open: OpenFn,
    open_first: OpenFirstFn,
    free: FreeFn,
    get_device_type_info: TypeInfoFn,
    get_device_type_info_from_type: TypeInfoFromTypeFn,
    get_serial_number: SerialNumberFn,
    read_key: ReadKeyFn,
    read_key_timeout: ReadKeyTimeoutFn,
    set_image: SetImageFn,
    set_image_24: SetImageFn,
    set_image_32: SetImageFn,
    set_key_image: SetKeyImageFn,
    set_brightness: SetBrightnessFn,
    set_screensaver: SetScreensaverFn,
}

impl Symbols {
    fn resolve(library: &Library, path: &str) -> Result<Self> {
        // SAFETY: each type alias matches the C prototype of the symbol it is
        // used for.
        unsafe {
            Ok(Self {
                enumerate: symbol(library, path, b"scdk_enumerate\0")?,
                free_enumeration: symbol(library, path, b"scdk_free_enumeration\0")?,
                open: symbol(library, path, b"scdk_open\0")?,
                open_first: symbol(library, path, b"scdk_open_first\0")?,
                free: symbol(library, path, b"scdk_free\0")?,
                get_device_type_info: symbol(library, path, b"scdk_get_device_type_info\0")?,
                get_device_type_info_from_type: symbol(
                    library,
                    path,
                    b"scdk_get_device_type_info_from_type\0",
                )?,
                get_serial_number: symbol(library, path, b"scdk_get_serial_number\0")?,
                read_key: symbol(library, path, b"scdk_read_key\0")?,
                read_key_timeout: symbol(library, path, b"scdk_read_key_timeout\0")?,
                set_image: symbol(library, path, b"scdk_set_image\0")?,
                set_image_24: symbol(library, path, b"scdk_set_image_24\0")?,
                set_image_32: symbol(library, path, b"scdk_set_image_32\0")?,
                set_key_image: symbol(library, path, b"scdk_set_key_image\0")?,
                set_brightness: symbol(library, path, b"scdk_set_brightness\0")?,
                set_screensaver: symbol(library, path, b"scdk_set_screensaver\0")?,
            })
        }
    }
}

/// Resolve one symbol and copy the function pointer out.
///
/// # Safety
///
/// `T` must be the correct function pointer type for `name`.
unsafe fn symbol<T: Copy>(library: &Library, path: &str, name: &[u8]) -> Result<T> {
    // SAFETY: forwarded to the caller.
    unsafe { library.get::<T>(name) }
        .map(|sym| *sym)
        .map_err(|e| Error::library_load(path, e))
}

/// [`DeckDriver`] that calls into the native library.
///
/// # Examples
///
/// ```no_run
/// use screamdeck::native::NativeDriver;
/// use screamdeck::directory::Directory;
/// use std::sync::Arc;
///
/// # fn main() -> screamdeck::Result<()> {
/// let driver = Arc::new(NativeDriver::load()?);
/// for device in Directory::new(driver).enumerate()? {
///     println!("{device}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct NativeDriver {
    symbols: Symbols,
    path: String,
    // Keeps the code behind `symbols` mapped.
    _library: Library,
}

impl NativeDriver {
    /// Load the library named by `SCREAMDECK_LIBRARY`, or the platform's
    /// file name for `screamdeck` resolved through the system search path.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(NATIVE_LIBRARY_ENV)
            .unwrap_or_else(|| libloading::library_filename(NATIVE_LIBRARY_NAME));
        Self::load_from(path)
    }

    /// Load the library from an explicit path.
    pub fn load_from(path: impl AsRef<OsStr>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().into_owned();
        debug!(path = %path_str, "Loading native deck library");

        // SAFETY: loading runs the library's initialisers; the screamdeck
        // library has no initialisers with preconditions.
        let library = unsafe { Library::new(path) }.map_err(|e| Error::library_load(&path_str, e))?;
        let symbols = Symbols::resolve(&library, &path_str)?;

        info!(path = %path_str, "Native deck library loaded");
        Ok(Self {
            symbols,
            path: path_str,
            _library: library,
        })
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Default library file name for this platform.
    pub fn default_library_name() -> OsString {
        libloading::library_filename(NATIVE_LIBRARY_NAME)
    }

    fn type_info_from_native(&self, info: *const NativeDeviceTypeInfo) -> Option<DeviceTypeInfo> {
        // SAFETY: the library returns either null or a pointer to static
        // type information that stays valid while it is loaded.
        let info = unsafe { info.as_ref() }?;
        match convert_type_info(info) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "Discarding malformed device type info");
                None
            }
        }
    }
}

impl fmt::Debug for NativeDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDriver").field("path", &self.path).finish()
    }
}

fn convert_type_info(info: &NativeDeviceTypeInfo) -> Result<DeviceTypeInfo> {
    let dim = |value: c_int, field: &str| {
        u32::try_from(value)
            .map_err(|_| Error::integrity(format!("negative {field} in device type info: {value}")))
    };

    Ok(DeviceTypeInfo {
        device_type: DeviceType::try_from(info.device_type)
            .map_err(|e| Error::integrity(e.to_string()))?,
        columns: dim(info.columns, "columns")?,
        rows: dim(info.rows, "rows")?,
        key_image_width: dim(info.key_image_width, "key image width")?,
        key_image_height: dim(info.key_image_height, "key image height")?,
        key_gap_width: dim(info.key_gap_width, "key gap width")?,
        key_gap_height: dim(info.key_gap_height, "key gap height")?,
        image_width: dim(info.image_width, "image width")?,
        image_height: dim(info.image_height, "image height")?,
    })
}

/// Native enumeration list, released when dropped.
///
/// Entries borrow from the guard, so nothing read from the list can outlive
/// the `scdk_free_enumeration` call.
struct Enumeration<'a> {
    head: *const NativeDeviceInfo,
    free: FreeEnumerationFn,
    _driver: PhantomData<&'a NativeDriver>,
}

impl Enumeration<'_> {
    /// Copy every entry out of the list.
    ///
    /// # Errors
    ///
    /// Returns `Error::Integrity` for an entry whose serial or device type
    /// does not decode.
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.iter()
            .map(|entry| {
                // SAFETY: the serial belongs to the list entry, alive until
                // `self` drops.
                let serial =
                    unsafe { read_wide_string(entry.serial_number, MAX_ENUMERATED_SERIAL_LEN) }?;
                let device_type = DeviceType::try_from(entry.device_type)
                    .map_err(|e| Error::integrity(e.to_string()))?;
                Ok(DeviceInfo::new(device_type, serial))
            })
            .collect()
    }

    fn iter(&self) -> impl Iterator<Item = &NativeDeviceInfo> {
        // SAFETY: every `next` pointer is null or points at a live entry of
        // the same list, which lives until `self` is dropped.
        std::iter::successors(unsafe { self.head.as_ref() }, |entry| unsafe {
            entry.next.as_ref()
        })
    }
}

impl Drop for Enumeration<'_> {
    fn drop(&mut self) {
        // The library expects every `scdk_enumerate` result back, null
        // included.
        // SAFETY: `head` came from `scdk_enumerate` and is freed once.
        unsafe { (self.free)(self.head) };
    }
}

/// Copy a NUL-terminated UTF-16 string out of native memory.
///
/// # Safety
///
/// `ptr` must be null or point at memory readable up to its terminator or
/// `max_len` units, whichever comes first.
unsafe fn read_wide_string(ptr: *const u16, max_len: usize) -> Result<String> {
    if ptr.is_null() {
        return Err(Error::integrity("null serial string"));
    }
    let mut len = 0;
    // SAFETY: bounded by the caller's contract.
    while unsafe { *ptr.add(len) } != 0 {
        len += 1;
        if len >= max_len {
            return Err(Error::integrity(format!(
                "serial string exceeds {max_len} units"
            )));
        }
    }
    // SAFETY: `len` units were just read successfully.
    let units = unsafe { std::slice::from_raw_parts(ptr, len) };
    String::from_utf16(units).map_err(|e| Error::integrity(format!("undecodable serial string: {e}")))
}

/// Decode a serial from a fixed buffer, stopping at the first NUL.
fn decode_serial_buffer(buffer: &[u16]) -> Option<String> {
    let len = buffer.iter().position(|&unit| unit == 0)?;
    String::from_utf16(&buffer[..len]).ok()
}

fn to_wide_nul(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn len_as_c_int(len: usize) -> c_int {
    c_int::try_from(len).unwrap_or(c_int::MAX)
}

impl DeckDriver for NativeDriver {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let list = Enumeration {
            // SAFETY: no preconditions.
            head: unsafe { (self.symbols.enumerate)() },
            free: self.symbols.free_enumeration,
            _driver: PhantomData,
        };

        list.devices()
    }

    fn device_type_info(&self, device_type: DeviceType) -> Option<DeviceTypeInfo> {
        // SAFETY: takes a plain enum value.
        let info = unsafe { (self.symbols.get_device_type_info_from_type)(device_type.as_raw()) };
        self.type_info_from_native(info)
    }

    fn open(&self, device_type: DeviceType, serial_number: &str) -> Option<RawHandle> {
        let serial = to_wide_nul(serial_number);
        let mut raw: *mut c_void = std::ptr::null_mut();
        // SAFETY: `raw` is a valid out pointer and `serial` is NUL-terminated.
        let opened =
            unsafe { (self.symbols.open)(&mut raw, device_type.as_raw(), serial.as_ptr()) } != 0;
        if opened { RawHandle::from_ptr(raw) } else { None }
    }

    fn open_first(&self, device_type: DeviceType) -> Option<RawHandle> {
        let mut raw: *mut c_void = std::ptr::null_mut();
        // SAFETY: `raw` is a valid out pointer.
        let opened = unsafe { (self.symbols.open_first)(&mut raw, device_type.as_raw()) } != 0;
        if opened { RawHandle::from_ptr(raw) } else { None }
    }

    fn free(&self, handle: &RawHandle) -> bool {
        // SAFETY: the handle came from `open`/`open_first`; the session frees
        // it once.
        unsafe { (self.symbols.free)(handle.as_ptr()) != 0 }
    }

    fn handle_type_info(&self, handle: &RawHandle) -> Option<DeviceTypeInfo> {
        // SAFETY: the handle is open.
        let info = unsafe { (self.symbols.get_device_type_info)(handle.as_ptr()) };
        self.type_info_from_native(info)
    }

    fn serial_number(&self, handle: &RawHandle) -> Option<String> {
        let mut buffer = [0u16; SERIAL_NUMBER_CAPACITY];
        // SAFETY: the buffer holds exactly the capacity passed.
        let ok = unsafe {
            (self.symbols.get_serial_number)(handle.as_ptr(), buffer.as_mut_ptr(), buffer.len())
        } != 0;
        if !ok {
            return None;
        }
        decode_serial_buffer(&buffer)
    }

    fn read_key(&self, handle: &RawHandle, buffer: &mut [u8]) -> i32 {
        // SAFETY: the length passed never exceeds the buffer.
        unsafe {
            (self.symbols.read_key)(
                handle.as_ptr(),
                buffer.as_mut_ptr(),
                len_as_c_int(buffer.len()),
            )
        }
    }

    fn read_key_timeout(&self, handle: &RawHandle, buffer: &mut [u8], timeout_ms: u32) -> i32 {
        let timeout = c_int::try_from(timeout_ms).unwrap_or(c_int::MAX);
        // SAFETY: the length passed never exceeds the buffer.
        unsafe {
            (self.symbols.read_key_timeout)(
                handle.as_ptr(),
                buffer.as_mut_ptr(),
                len_as_c_int(buffer.len()),
                timeout,
            )
        }
    }

    fn set_image(
        &self,
        handle: &RawHandle,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool {
        // SAFETY: the session checked the buffer covers the panel.
        unsafe {
            (self.symbols.set_image)(
                handle.as_ptr(),
                buffer.as_ptr(),
                format.as_raw(),
                c_int::from(quality),
            ) != 0
        }
    }

    fn set_image_24(
        &self,
        handle: &RawHandle,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool {
        // SAFETY: the session checked the buffer covers the panel.
        unsafe {
            (self.symbols.set_image_24)(
                handle.as_ptr(),
                buffer.as_ptr(),
                format.as_raw(),
                c_int::from(quality),
            ) != 0
        }
    }

    fn set_image_32(
        &self,
        handle: &RawHandle,
        buffer: &[u8],
        format: PixelFormat,
        quality: u8,
    ) -> bool {
        // SAFETY: the session checked the buffer covers the panel.
        unsafe {
            (self.symbols.set_image_32)(
                handle.as_ptr(),
                buffer.as_ptr(),
                format.as_raw(),
                c_int::from(quality),
            ) != 0
        }
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
        // SAFETY: the session checked the buffer covers one key image.
        unsafe {
            (self.symbols.set_key_image)(
                handle.as_ptr(),
                x,
                y,
                buffer.as_ptr(),
                format.as_raw(),
                c_int::from(quality),
            ) != 0
        }
    }

    fn set_brightness(&self, handle: &RawHandle, percent: u8) -> bool {
        // SAFETY: the handle is open.
        unsafe { (self.symbols.set_brightness)(handle.as_ptr(), c_int::from(percent)) != 0 }
    }

    fn set_screensaver(&self, handle: &RawHandle) -> bool {
        // SAFETY: the handle is open.
        unsafe { (self.symbols.set_screensaver)(handle.as_ptr()) != 0 }
    }
}

//! FFI Bridge - Native Driver Library
//!
//! This module loads the GPU driver library at runtime and exposes its
//! deallocation entry points as a [`Driver`].
//!
//! # Design:
//! - The library is opened with `libloading`, so the crate builds and its
//!   tests run on machines without a driver installed
//! - Symbols are resolved once at load time; a missing symbol fails the
//!   load rather than the first release
//! - Handles cross the boundary as address-sized values: pointers for
//!   streams and pools, a 64-bit integer for device pointers

use std::ffi::CStr;
use std::fmt;
use std::path::{Path, PathBuf};

use libc::{c_char, c_int, c_ulonglong, c_void};
use libloading::Library;
use tracing::info;

use crate::driver::{Driver, DriverStatus};
use crate::engine::kind::NativeHandle;
use crate::error::{HolderError, Result};

/// C-compatible driver result code (`CUresult`)
pub type CuResult = c_int;

pub const CUDA_SUCCESS: CuResult = 0;

/// Library opened when no path is configured.
#[cfg(windows)]
pub const DEFAULT_DRIVER_LIBRARY: &str = "nvcuda.dll";
#[cfg(not(windows))]
pub const DEFAULT_DRIVER_LIBRARY: &str = "libcuda.so.1";

type CuStreamDestroyFn = unsafe extern "C" fn(stream: *mut c_void) -> CuResult;
type CuMemPoolDestroyFn = unsafe extern "C" fn(pool: *mut c_void) -> CuResult;
type CuMemFreeAsyncFn = unsafe extern "C" fn(dptr: c_ulonglong, stream: *mut c_void) -> CuResult;
type CuGetErrorStringFn =
    unsafe extern "C" fn(error: CuResult, message: *mut *const c_char) -> CuResult;

/// The native driver, loaded at runtime.
pub struct CudaDriver {
    path: PathBuf,
    stream_destroy: CuStreamDestroyFn,
    mem_pool_destroy: CuMemPoolDestroyFn,
    mem_free_async: CuMemFreeAsyncFn,
    get_error_string: CuGetErrorStringFn,
    // Keeps the resolved function pointers valid.
    _library: Library,
}

impl CudaDriver {
    /// Load the driver from the platform default location.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_DRIVER_LIBRARY)
    }

    /// Load the driver library at `path` and resolve its release entry points.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading native driver from {:?}", path);

        // SAFETY: opening the driver runs its initializers; the driver
        // library is trusted in the same way a linked one would be.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            HolderError::DriverUnavailable(format!("{}: {}", path.display(), e))
        })?;

        // SAFETY: each type alias matches the driver's published C prototype.
        let driver = unsafe {
            Self {
                path: path.to_path_buf(),
                stream_destroy: resolve(&library, b"cuStreamDestroy_v2\0")?,
                mem_pool_destroy: resolve(&library, b"cuMemPoolDestroy\0")?,
                mem_free_async: resolve(&library, b"cuMemFreeAsync\0")?,
                get_error_string: resolve(&library, b"cuGetErrorString\0")?,
                _library: library,
            }
        };

        info!("Native driver loaded from {:?}", driver.path);
        Ok(driver)
    }

    /// Path the driver was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolve a NUL-terminated symbol name to a function pointer.
///
/// # Safety
/// `T` must be the correct function pointer type for the symbol.
unsafe fn resolve<T: Copy>(library: &Library, name: &[u8]) -> Result<T> {
    library.get::<T>(name).map(|symbol| *symbol).map_err(|e| {
        let printable = String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name));
        HolderError::DriverUnavailable(format!("missing symbol {}: {}", printable, e))
    })
}

impl Driver for CudaDriver {
    fn name(&self) -> &str {
        "cuda"
    }

    fn stream_destroy(&self, stream: NativeHandle) -> std::result::Result<(), DriverStatus> {
        DriverStatus::check(unsafe { (self.stream_destroy)(stream.as_ptr()) })
    }

    fn mem_pool_destroy(&self, pool: NativeHandle) -> std::result::Result<(), DriverStatus> {
        DriverStatus::check(unsafe { (self.mem_pool_destroy)(pool.as_ptr()) })
    }

    fn mem_free_async(
        &self,
        ptr: NativeHandle,
        stream: NativeHandle,
    ) -> std::result::Result<(), DriverStatus> {
        let dptr = ptr.as_usize() as c_ulonglong;
        DriverStatus::check(unsafe { (self.mem_free_async)(dptr, stream.as_ptr()) })
    }

    fn error_string(&self, status: DriverStatus) -> Option<String> {
        let mut message: *const c_char = std::ptr::null();
        let result = unsafe { (self.get_error_string)(status.code(), &mut message) };
        if result != CUDA_SUCCESS || message.is_null() {
            return None;
        }
        // SAFETY: the driver returns a static NUL-terminated string.
        let message = unsafe { CStr::from_ptr(message) };
        Some(message.to_string_lossy().into_owned())
    }
}

impl fmt::Debug for CudaDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaDriver").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffi_constants() {
        assert_eq!(CUDA_SUCCESS, DriverStatus::SUCCESS);
        assert!(DEFAULT_DRIVER_LIBRARY.contains("cuda"));
    }

    #[test]
    fn test_load_missing_library() {
        let err = CudaDriver::load_from("/nonexistent/libcuda.so.1").unwrap_err();
        match err {
            HolderError::DriverUnavailable(msg) => assert!(msg.contains("/nonexistent")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_device_pointer_width() {
        // Device pointers are passed as 64-bit integers.
        assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<c_ulonglong>());
    }

    // Note: release calls against the real driver need a GPU and are
    // exercised by the `holders --probe` command instead.
}

//! Resource kinds and native handle identity.
//!
//! A resource kind is a zero-sized marker type describing one family of
//! driver resources: what the invalid/default handle is, which owner
//! holders a box of that kind carries, and which driver primitive releases
//! it. Handle values are only unique within a kind, so caches are per kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::{Driver, DriverStatus};
use crate::engine::cache::ResourceCache;
use crate::engine::context::Caches;
use crate::engine::holder::Holder;

/// Opaque, address-sized identity of a native resource.
///
/// Some driver handles are pointers and some are integers; both are
/// treated uniformly as a machine word here.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NativeHandle(usize);

impl NativeHandle {
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// The handle reinterpreted as a pointer, for driver calls taking one.
    pub fn as_ptr(self) -> *mut libc::c_void {
        self.0 as *mut libc::c_void
    }
}

impl From<usize> for NativeHandle {
    fn from(raw: usize) -> Self {
        Self(raw)
    }
}

impl From<NativeHandle> for usize {
    fn from(handle: NativeHandle) -> Self {
        handle.0
    }
}

impl fmt::LowerHex for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Runtime tag for a resource kind, used by diagnostics and host glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Stream,
    MemPool,
    Deviceptr,
}

/// Static description of a resource kind.
pub trait ResourceKind: Sized + Send + Sync + 'static {
    /// Host-facing class name, e.g. `"Stream"`.
    const CLASS_NAME: &'static str;
    /// Native type name used in string representations, e.g. `"CUstream"`.
    const NATIVE_NAME: &'static str;
    const TYPE: ResourceType;
    /// Handle held by a default-constructed box.
    const DEFAULT_HANDLE: NativeHandle;

    /// Holders of other kinds that must outlive this kind's handle.
    type Owners: Default + Clone + fmt::Debug + Send + Sync + 'static;

    /// Invoke the kind's deallocation primitive.
    fn release(
        driver: &dyn Driver,
        handle: NativeHandle,
        owners: &Self::Owners,
    ) -> Result<(), DriverStatus>;

    /// This kind's cache within a context.
    fn cache(caches: &Caches) -> &ResourceCache<Self>;
}

/// Execution queue. The default handle is the per-thread default stream.
#[derive(Debug, Clone, Copy)]
pub struct Stream;

/// Memory pool.
#[derive(Debug, Clone, Copy)]
pub struct MemPool;

/// Device memory allocation, freed asynchronously on a stream.
#[derive(Debug, Clone, Copy)]
pub struct Deviceptr;

pub type StreamH = Holder<Stream>;
pub type MemPoolH = Holder<MemPool>;
pub type DeviceptrH = Holder<Deviceptr>;

impl ResourceKind for Stream {
    const CLASS_NAME: &'static str = "Stream";
    const NATIVE_NAME: &'static str = "CUstream";
    const TYPE: ResourceType = ResourceType::Stream;
    // CU_STREAM_PER_THREAD
    const DEFAULT_HANDLE: NativeHandle = NativeHandle::new(0x2);

    type Owners = ();

    fn release(driver: &dyn Driver, handle: NativeHandle, _: &()) -> Result<(), DriverStatus> {
        driver.stream_destroy(handle)
    }

    fn cache(caches: &Caches) -> &ResourceCache<Self> {
        &caches.streams
    }
}

impl ResourceKind for MemPool {
    const CLASS_NAME: &'static str = "MemPool";
    const NATIVE_NAME: &'static str = "CUmemoryPool";
    const TYPE: ResourceType = ResourceType::MemPool;
    const DEFAULT_HANDLE: NativeHandle = NativeHandle::new(0);

    type Owners = ();

    fn release(driver: &dyn Driver, handle: NativeHandle, _: &()) -> Result<(), DriverStatus> {
        driver.mem_pool_destroy(handle)
    }

    fn cache(caches: &Caches) -> &ResourceCache<Self> {
        &caches.mem_pools
    }
}

/// Owners of a device allocation.
#[derive(Debug, Clone, Default)]
pub struct DeviceptrOwners {
    /// Pool the allocation came from; must outlive the allocation.
    pub pool: MemPoolH,
    /// Stream the deferred free is enqueued on.
    pub stream: StreamH,
}

impl ResourceKind for Deviceptr {
    const CLASS_NAME: &'static str = "Deviceptr";
    const NATIVE_NAME: &'static str = "CUdeviceptr";
    const TYPE: ResourceType = ResourceType::Deviceptr;
    const DEFAULT_HANDLE: NativeHandle = NativeHandle::new(0);

    type Owners = DeviceptrOwners;

    fn release(
        driver: &dyn Driver,
        handle: NativeHandle,
        owners: &DeviceptrOwners,
    ) -> Result<(), DriverStatus> {
        driver.mem_free_async(handle, owners.stream.handle())
    }

    fn cache(caches: &Caches) -> &ResourceCache<Self> {
        &caches.deviceptrs
    }
}

impl Holder<Deviceptr> {
    /// Re-target the stream the deferred free will be enqueued on.
    ///
    /// The previous stream holder is dropped after the owner lock is
    /// released, so a stream whose last reference lived here is destroyed
    /// right away.
    pub fn set_stream(&self, stream: &StreamH) {
        let previous =
            self.update_owners(|owners| std::mem::replace(&mut owners.stream, stream.clone()));
        debug!(
            ptr = %self.handle(),
            from = %previous.handle(),
            to = %stream.handle(),
            "Deviceptr stream re-targeted"
        );
    }

    /// Stream the deferred free is currently bound to.
    pub fn stream(&self) -> StreamH {
        self.owners().stream
    }

    /// Pool this allocation keeps alive.
    pub fn pool(&self) -> MemPoolH {
        self.owners().pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_formatting() {
        let handle = NativeHandle::new(0x2000);
        assert_eq!(handle.to_string(), "0x2000");
        assert_eq!(format!("{handle:x}"), "2000");
        assert_eq!(usize::from(handle), 0x2000);
    }

    #[test]
    fn test_default_handles() {
        assert_eq!(Stream::DEFAULT_HANDLE.as_usize(), 0x2);
        assert_eq!(MemPool::DEFAULT_HANDLE.as_usize(), 0);
        assert_eq!(Deviceptr::DEFAULT_HANDLE.as_usize(), 0);
    }

    #[test]
    fn test_default_deviceptr_owners_are_valid_holders() {
        let owners = DeviceptrOwners::default();
        assert_eq!(owners.pool.handle(), MemPool::DEFAULT_HANDLE);
        assert_eq!(owners.stream.handle(), Stream::DEFAULT_HANDLE);
        assert!(!owners.stream.is_owning());
    }

    #[test]
    fn test_resource_type_serde() {
        let json = serde_json::to_string(&ResourceType::MemPool).unwrap();
        assert_eq!(json, "\"mem_pool\"");
    }
}

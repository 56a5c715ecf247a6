//! Holder Context - Capture Protocol
//!
//! The context owns everything a capture needs: the driver the release
//! actions call into, one [`ResourceCache`] per kind, usage counters, and
//! the failure policy. It replaces process-wide caches, so independent
//! contexts (and tests) never observe each other's handles.
//!
//! Holders do not borrow the context. Each release action captures its own
//! `Arc` to the driver and counters, so a holder may outlive the context
//! that created it.

use std::sync::Arc;

use tracing::{debug, info};

use crate::diagnostics::{UsageCounters, UsageReport};
use crate::driver::Driver;
use crate::error::{FailurePolicy, HolderError, Result};
use crate::config::HoldersConfig;
use crate::engine::cache::ResourceCache;
use crate::engine::holder::{BoundRelease, Holder, ReleaseFn};
use crate::engine::kind::{
    Deviceptr, DeviceptrH, DeviceptrOwners, MemPool, MemPoolH, NativeHandle, ResourceKind,
    Stream, StreamH,
};
use crate::engine::resource_box::ResourceBox;
use crate::ffi::CudaDriver;

/// One weak-reference cache per resource kind.
#[derive(Default)]
pub struct Caches {
    pub(crate) streams: ResourceCache<Stream>,
    pub(crate) mem_pools: ResourceCache<MemPool>,
    pub(crate) deviceptrs: ResourceCache<Deviceptr>,
}

/// Owner of the caches and driver used to capture native handles.
pub struct HolderContext {
    driver: Arc<dyn Driver>,
    caches: Caches,
    usage: Arc<UsageCounters>,
    policy: FailurePolicy,
}

impl HolderContext {
    /// Create a context with the default failure policy.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_policy(driver, FailurePolicy::default())
    }

    pub fn with_policy(driver: Arc<dyn Driver>, policy: FailurePolicy) -> Self {
        info!(driver = driver.name(), ?policy, "Creating HolderContext");
        Self {
            driver,
            caches: Caches::default(),
            usage: Arc::new(UsageCounters::new()),
            policy,
        }
    }

    /// Load the native driver named by `config` and build a context on it.
    pub fn from_config(config: &HoldersConfig) -> Result<Self> {
        let driver = CudaDriver::load_from(config.driver_library())?;
        Ok(Self::with_policy(Arc::new(driver), config.failure_policy))
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// The cache for kind `K`.
    pub fn cache<K: ResourceKind>(&self) -> &ResourceCache<K> {
        K::cache(&self.caches)
    }

    /// Snapshot of live owning boxes per kind.
    pub fn usage_report(&self) -> UsageReport {
        self.usage.snapshot()
    }

    /// Take ownership of `handle`.
    ///
    /// The returned holder releases `handle` through the kind's driver
    /// primitive once its last clone is dropped. `owners` are kept alive
    /// until that release call has returned.
    pub fn capture<K: ResourceKind>(
        &self,
        handle: impl Into<NativeHandle>,
        owners: K::Owners,
    ) -> Holder<K> {
        let handle = handle.into();
        debug!(kind = K::CLASS_NAME, %handle, "Capturing resource");
        self.usage.record_capture(K::TYPE);

        let driver = Arc::clone(&self.driver);
        let usage = Arc::clone(&self.usage);
        let action: ReleaseFn<K> = Box::new(move |boxed: &ResourceBox<K>| {
            let handle = boxed.handle();
            debug!(kind = K::CLASS_NAME, %handle, "Releasing resource");
            usage.record_release(K::TYPE);
            K::release(&*driver, handle, boxed.owners()).map_err(|status| {
                usage.record_release_failure();
                HolderError::release::<K>(handle, status, driver.error_string(status))
            })
        });

        Holder::bind(
            ResourceBox::new(handle, owners),
            Some(BoundRelease::new(action, self.policy)),
        )
    }

    /// Wrap a handle this process does not own. It is never released.
    pub fn capture_static<K: ResourceKind>(&self, handle: impl Into<NativeHandle>) -> Holder<K> {
        let handle = handle.into();
        debug!(kind = K::CLASS_NAME, %handle, "Wrapping static resource");
        Holder::bind(ResourceBox::new(handle, K::Owners::default()), None)
    }

    /// Capture `handle`, reusing the live holder if one is cached.
    ///
    /// On a hit `owners` is dropped unused and no new release action is
    /// created. On a miss, or when the cached box has already been
    /// released, a new owning capture is installed.
    pub fn capture_cached<K: ResourceKind>(
        &self,
        handle: impl Into<NativeHandle>,
        owners: K::Owners,
    ) -> Holder<K> {
        let handle = handle.into();
        self.cache::<K>()
            .get_or_capture(handle, || self.capture(handle, owners))
    }

    /// Take ownership of a stream.
    pub fn stream(&self, handle: impl Into<NativeHandle>) -> StreamH {
        self.capture(handle, ())
    }

    /// Take ownership of a memory pool.
    pub fn mem_pool(&self, handle: impl Into<NativeHandle>) -> MemPoolH {
        self.capture(handle, ())
    }

    /// Take ownership of a device allocation from `pool`, to be freed on
    /// `stream`.
    pub fn deviceptr(
        &self,
        handle: impl Into<NativeHandle>,
        pool: &MemPoolH,
        stream: &StreamH,
    ) -> DeviceptrH {
        let owners = DeviceptrOwners {
            pool: pool.clone(),
            stream: stream.clone(),
        };
        self.capture(handle, owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverStatus, RecordingDriver, ReleaseCall};

    fn context() -> (Arc<RecordingDriver>, HolderContext) {
        let driver = Arc::new(RecordingDriver::new());
        let ctx = HolderContext::with_policy(driver.clone(), FailurePolicy::Log);
        (driver, ctx)
    }

    #[test]
    fn test_capture_releases_once() {
        let (driver, ctx) = context();
        let stream = ctx.stream(0x10usize);
        let clone = stream.clone();
        drop(stream);
        assert!(driver.calls().is_empty());

        drop(clone);
        assert_eq!(
            driver.calls(),
            vec![ReleaseCall::StreamDestroy { stream: NativeHandle::new(0x10) }]
        );
        assert!(ctx.usage_report().is_clean());
    }

    #[test]
    fn test_static_capture_never_releases() {
        let (driver, ctx) = context();
        let stream = ctx.capture_static::<Stream>(0x10usize);
        assert!(!stream.is_owning());
        drop(stream);
        assert!(driver.calls().is_empty());
        assert_eq!(ctx.usage_report().captures, 0);
    }

    #[test]
    fn test_cached_capture_shares_box() {
        let (driver, ctx) = context();
        let a = ctx.capture_cached::<MemPool>(0x1000usize, ());
        let b = ctx.capture_cached::<MemPool>(0x1000usize, ());
        assert!(a.same_box(&b));
        assert_eq!(ctx.usage_report().mempools, 1);

        drop(a);
        drop(b);
        assert_eq!(driver.release_count(0x1000usize), 1);
    }

    #[test]
    fn test_caches_are_per_kind() {
        let (_driver, ctx) = context();
        let pool = ctx.capture_cached::<MemPool>(0x40usize, ());
        let stream = ctx.capture_cached::<Stream>(0x40usize, ());
        assert_eq!(ctx.cache::<MemPool>().len(), 1);
        assert_eq!(ctx.cache::<Stream>().len(), 1);
        assert_eq!(pool.handle(), stream.handle());
    }

    #[test]
    fn test_failed_release_is_counted() {
        let (driver, ctx) = context();
        driver.fail_with(0x10usize, DriverStatus::new(1));
        drop(ctx.stream(0x10usize));

        let report = ctx.usage_report();
        assert_eq!(report.release_failures, 1);
        assert_eq!(report.streams, 0);
        assert_eq!(driver.release_count(0x10usize), 1);
    }

    #[test]
    fn test_holder_outlives_context() {
        let (driver, ctx) = context();
        let pool = ctx.mem_pool(0x1000usize);
        drop(ctx);
        drop(pool);
        assert_eq!(driver.release_count(0x1000usize), 1);
    }

    #[test]
    fn test_from_config_without_driver_library() {
        let config = HoldersConfig {
            driver_library: Some("/nonexistent/libcuda.so.1".into()),
            ..HoldersConfig::default()
        };
        let err = HolderContext::from_config(&config).err().expect("load must fail");
        assert!(matches!(err, HolderError::DriverUnavailable(_)));
    }
}

//! Host-facing holder contract.
//!
//! A binding layer exposing holders to a scripting host needs only what is
//! here: build from an integer handle, read the handle back as an integer,
//! show it, and reset it. [`AnyHolder`] erases the kind for hosts that
//! have no static types of their own.

use std::fmt;

use crate::engine::context::HolderContext;
use crate::engine::holder::Holder;
use crate::engine::kind::{
    Deviceptr, DeviceptrH, MemPool, MemPoolH, NativeHandle, ResourceKind, ResourceType, Stream,
    StreamH,
};

/// How a host-side constructor should take the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Take ownership; release when the last holder goes away.
    Owning,
    /// Observe only; never release.
    Static,
    /// Take ownership, sharing the live holder if one exists.
    Cached,
}

/// Operations every host holder object supports.
pub trait HostHolder {
    /// Host class name, e.g. `"MemPool"`.
    fn class_name(&self) -> &'static str;

    /// The handle as an address-sized integer (`int(holder)`, `holder.value`).
    fn value(&self) -> usize;

    /// `"<native-type-name>=0x<hex-handle>"`.
    fn repr(&self) -> String;

    /// Drop this object's reference and point it at a default box.
    fn reset(&mut self);
}

impl<K: ResourceKind> HostHolder for Holder<K> {
    fn class_name(&self) -> &'static str {
        K::CLASS_NAME
    }

    fn value(&self) -> usize {
        self.as_int()
    }

    fn repr(&self) -> String {
        self.to_string()
    }

    fn reset(&mut self) {
        Holder::reset(self)
    }
}

/// A holder of any kind.
#[derive(Debug, Clone)]
pub enum AnyHolder {
    Stream(StreamH),
    MemPool(MemPoolH),
    Deviceptr(DeviceptrH),
}

impl AnyHolder {
    /// Construct a kind that has no owners from an integer handle.
    ///
    /// Returns `None` for [`ResourceType::Deviceptr`], whose constructor
    /// needs its pool and stream; use [`HolderContext::deviceptr`].
    pub fn from_int(
        ctx: &HolderContext,
        kind: ResourceType,
        handle: usize,
        mode: CaptureMode,
    ) -> Option<Self> {
        let handle = NativeHandle::new(handle);
        match kind {
            ResourceType::Stream => Some(AnyHolder::Stream(capture::<Stream>(ctx, handle, mode))),
            ResourceType::MemPool => {
                Some(AnyHolder::MemPool(capture::<MemPool>(ctx, handle, mode)))
            }
            ResourceType::Deviceptr => None,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            AnyHolder::Stream(_) => Stream::TYPE,
            AnyHolder::MemPool(_) => MemPool::TYPE,
            AnyHolder::Deviceptr(_) => Deviceptr::TYPE,
        }
    }

    fn as_host(&self) -> &dyn HostHolder {
        match self {
            AnyHolder::Stream(h) => h,
            AnyHolder::MemPool(h) => h,
            AnyHolder::Deviceptr(h) => h,
        }
    }
}

fn capture<K: ResourceKind<Owners = ()>>(
    ctx: &HolderContext,
    handle: NativeHandle,
    mode: CaptureMode,
) -> Holder<K> {
    match mode {
        CaptureMode::Owning => ctx.capture(handle, ()),
        CaptureMode::Static => ctx.capture_static(handle),
        CaptureMode::Cached => ctx.capture_cached(handle, ()),
    }
}

impl HostHolder for AnyHolder {
    fn class_name(&self) -> &'static str {
        self.as_host().class_name()
    }

    fn value(&self) -> usize {
        self.as_host().value()
    }

    fn repr(&self) -> String {
        self.as_host().repr()
    }

    fn reset(&mut self) {
        match self {
            AnyHolder::Stream(h) => h.reset(),
            AnyHolder::MemPool(h) => h.reset(),
            AnyHolder::Deviceptr(h) => h.reset(),
        }
    }
}

impl fmt::Display for AnyHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<StreamH> for AnyHolder {
    fn from(holder: StreamH) -> Self {
        AnyHolder::Stream(holder)
    }
}

impl From<MemPoolH> for AnyHolder {
    fn from(holder: MemPoolH) -> Self {
        AnyHolder::MemPool(holder)
    }
}

impl From<DeviceptrH> for AnyHolder {
    fn from(holder: DeviceptrH) -> Self {
        AnyHolder::Deviceptr(holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RecordingDriver;
    use crate::error::FailurePolicy;
    use std::sync::Arc;

    fn context() -> (Arc<RecordingDriver>, HolderContext) {
        let driver = Arc::new(RecordingDriver::new());
        let ctx = HolderContext::with_policy(driver.clone(), FailurePolicy::Log);
        (driver, ctx)
    }

    #[test]
    fn test_host_surface() {
        let (driver, ctx) = context();
        let mut pool = ctx.mem_pool(0x1000usize);
        assert_eq!(pool.class_name(), "MemPool");
        assert_eq!(pool.value(), 0x1000);
        assert_eq!(pool.repr(), "CUmemoryPool=0x1000");

        HostHolder::reset(&mut pool);
        assert_eq!(pool.value(), 0);
        assert_eq!(driver.release_count(0x1000usize), 1);
    }

    #[test]
    fn test_any_holder_modes() {
        let (driver, ctx) = context();
        let owning = AnyHolder::from_int(&ctx, ResourceType::Stream, 0x10, CaptureMode::Owning)
            .unwrap();
        let observed = AnyHolder::from_int(&ctx, ResourceType::Stream, 0x20, CaptureMode::Static)
            .unwrap();
        assert_eq!(owning.resource_type(), ResourceType::Stream);
        assert_eq!(observed.repr(), "CUstream=0x20");

        drop(owning);
        drop(observed);
        assert_eq!(driver.release_count(0x10usize), 1);
        assert_eq!(driver.release_count(0x20usize), 0);
    }

    #[test]
    fn test_any_holder_cached() {
        let (_driver, ctx) = context();
        let a = AnyHolder::from_int(&ctx, ResourceType::MemPool, 0x1000, CaptureMode::Cached);
        let b = AnyHolder::from_int(&ctx, ResourceType::MemPool, 0x1000, CaptureMode::Cached);
        match (a, b) {
            (Some(AnyHolder::MemPool(a)), Some(AnyHolder::MemPool(b))) => assert!(a.same_box(&b)),
            other => panic!("unexpected holders: {other:?}"),
        }
    }

    #[test]
    fn test_deviceptr_needs_owners() {
        let (_driver, ctx) = context();
        assert!(
            AnyHolder::from_int(&ctx, ResourceType::Deviceptr, 0x2000, CaptureMode::Owning)
                .is_none()
        );
    }

    #[test]
    fn test_any_holder_reset() {
        let (driver, ctx) = context();
        let mut any = AnyHolder::from(ctx.stream(0x10usize));
        any.reset();
        assert_eq!(any.value(), 0x2);
        assert_eq!(any.to_string(), "CUstream=0x2");
        assert_eq!(driver.release_count(0x10usize), 1);
    }
}

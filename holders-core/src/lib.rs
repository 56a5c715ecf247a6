//! Holders Core - Lifetime management for native GPU driver handles
//!
//! Native resources (streams, memory pools, device allocations) come from a
//! driver that has no notion of reference counting. This crate wraps each
//! handle in a reference-counted [`Holder`] whose last drop releases it
//! through the right driver call, exactly once, and only after every
//! dependent resource that needs it has been released.
//!
//! # Building blocks:
//! - [`ResourceBox`]: a handle plus the owner holders needed to release it
//! - [`Holder`]: shared ownership with the release action bound at capture
//! - [`HolderContext`]: owning, static, and cached capture
//! - [`ResourceCache`]: per-kind weak map that deduplicates live handles
//! - [`Driver`]: the deallocation primitives, real or recorded

pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod engine;
pub mod error;
pub mod ffi;

pub use config::HoldersConfig;
pub use diagnostics::{UsageCounters, UsageReport};
pub use driver::{Driver, DriverStatus, RecordingDriver, ReleaseCall};
pub use engine::{
    AnyHolder, CacheStats, CaptureMode, Deviceptr, DeviceptrH, DeviceptrOwners, Holder,
    HolderContext, HostHolder, MemPool, MemPoolH, NativeHandle, ResourceBox, ResourceCache,
    ResourceKind, ResourceType, Stream, StreamH,
};
pub use error::{FailurePolicy, HolderError};
pub use ffi::CudaDriver;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `filter`. Calling this again once a subscriber is
/// installed is a no-op.
pub fn init(filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => EnvFilter::try_new(filter)
            .with_context(|| format!("Invalid log filter '{}'", filter))?,
    };

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        debug!("Tracing subscriber already installed");
        return Ok(());
    }

    info!("Initializing holders v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init("info").is_ok());
        assert!(init("debug").is_ok());
    }
}

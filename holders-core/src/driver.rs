//! Driver Seam - Native Deallocation Primitives
//!
//! Holders never free anything themselves. Each resource kind names the
//! driver primitive that releases it, and the context hands every release
//! action a shared [`Driver`] to call it on.
//!
//! Two implementations ship with the crate:
//! - [`CudaDriver`](crate::ffi::CudaDriver): the real driver library, loaded at runtime
//! - [`RecordingDriver`]: records calls in order and can inject failures

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::kind::NativeHandle;

/// Non-success status code returned by a native driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverStatus(i32);

impl DriverStatus {
    /// Status code the driver uses for success.
    pub const SUCCESS: i32 = 0;

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    /// Convert a raw driver return code into a `Result`.
    pub fn check(code: i32) -> Result<(), DriverStatus> {
        if code == Self::SUCCESS {
            Ok(())
        } else {
            Err(Self(code))
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deallocation primitives for every resource kind.
///
/// Calls are synchronous and non-cancelable. Implementations must tolerate
/// being called from whichever thread dropped the last holder.
pub trait Driver: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &str;

    /// Destroy a stream.
    fn stream_destroy(&self, stream: NativeHandle) -> Result<(), DriverStatus>;

    /// Destroy a memory pool.
    fn mem_pool_destroy(&self, pool: NativeHandle) -> Result<(), DriverStatus>;

    /// Free a device allocation asynchronously on `stream`.
    fn mem_free_async(&self, ptr: NativeHandle, stream: NativeHandle) -> Result<(), DriverStatus>;

    /// Human-readable description of a status code, if the driver has one.
    fn error_string(&self, _status: DriverStatus) -> Option<String> {
        None
    }
}

/// One deallocation call observed by a [`RecordingDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ReleaseCall {
    StreamDestroy { stream: NativeHandle },
    MemPoolDestroy { pool: NativeHandle },
    MemFreeAsync { ptr: NativeHandle, stream: NativeHandle },
}

impl ReleaseCall {
    /// The handle being released by this call.
    pub fn handle(&self) -> NativeHandle {
        match *self {
            ReleaseCall::StreamDestroy { stream } => stream,
            ReleaseCall::MemPoolDestroy { pool } => pool,
            ReleaseCall::MemFreeAsync { ptr, .. } => ptr,
        }
    }
}

impl fmt::Display for ReleaseCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseCall::StreamDestroy { stream } => write!(f, "cuStreamDestroy({stream})"),
            ReleaseCall::MemPoolDestroy { pool } => write!(f, "cuMemPoolDestroy({pool})"),
            ReleaseCall::MemFreeAsync { ptr, stream } => {
                write!(f, "cuMemFreeAsync({ptr}, stream={stream})")
            }
        }
    }
}

/// In-process driver that records every release call.
///
/// Calls are recorded even when they are made to fail, so tests can
/// assert that a failed release was attempted exactly once.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use holders_core::{HolderContext, RecordingDriver};
/// let driver = Arc::new(RecordingDriver::new());
/// let ctx = HolderContext::new(driver.clone());
/// drop(ctx.mem_pool(0x1000usize));
/// assert_eq!(driver.calls().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct RecordingDriver {
    calls: Mutex<Vec<ReleaseCall>>,
    failures: Mutex<HashMap<NativeHandle, DriverStatus>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later release of `handle` report `status`.
    pub fn fail_with(&self, handle: impl Into<NativeHandle>, status: DriverStatus) {
        lock(&self.failures).insert(handle.into(), status);
    }

    /// All calls recorded so far, oldest first.
    pub fn calls(&self) -> Vec<ReleaseCall> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls releasing `handle`.
    pub fn release_count(&self, handle: impl Into<NativeHandle>) -> usize {
        let handle = handle.into();
        lock(&self.calls)
            .iter()
            .filter(|call| call.handle() == handle)
            .count()
    }

    /// Forget recorded calls. Injected failures stay armed.
    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    fn record(&self, call: ReleaseCall) -> Result<(), DriverStatus> {
        debug!(%call, "Recording release call");
        lock(&self.calls).push(call);
        match lock(&self.failures).get(&call.handle()) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }
}

impl Driver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    fn stream_destroy(&self, stream: NativeHandle) -> Result<(), DriverStatus> {
        self.record(ReleaseCall::StreamDestroy { stream })
    }

    fn mem_pool_destroy(&self, pool: NativeHandle) -> Result<(), DriverStatus> {
        self.record(ReleaseCall::MemPoolDestroy { pool })
    }

    fn mem_free_async(&self, ptr: NativeHandle, stream: NativeHandle) -> Result<(), DriverStatus> {
        self.record(ReleaseCall::MemFreeAsync { ptr, stream })
    }

    fn error_string(&self, status: DriverStatus) -> Option<String> {
        Some(format!("injected failure (status {status})"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

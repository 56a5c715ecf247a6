//! Error types for holder release and driver loading.
//!
//! Capture never fails: a syntactically valid handle always produces a
//! wrapper. The only runtime errors are a native release call reporting a
//! non-success status, and the native driver library being unavailable.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::driver::DriverStatus;
use crate::engine::kind::{NativeHandle, ResourceKind};

/// Result type local to holders-core.
pub type Result<T> = std::result::Result<T, HolderError>;

#[derive(Debug, Error)]
pub enum HolderError {
    /// The kind's deallocation primitive reported a non-success status.
    ///
    /// The resource is not retried: a second release attempt could free a
    /// handle the driver has already reused.
    #[error("failed to release {native}={handle}: CUDA error {status}: {message}")]
    Release {
        native: &'static str,
        handle: NativeHandle,
        status: DriverStatus,
        message: String,
    },

    #[error("native driver unavailable: {0}")]
    DriverUnavailable(String),
}

impl HolderError {
    pub(crate) fn release<K: ResourceKind>(
        handle: NativeHandle,
        status: DriverStatus,
        message: Option<String>,
    ) -> Self {
        HolderError::Release {
            native: K::NATIVE_NAME,
            handle,
            status,
            message: message.unwrap_or_else(|| "unknown error".to_string()),
        }
    }
}

/// What to do once a release action has failed.
///
/// The boxed handle and its owner holders are reclaimed before the policy
/// runs, whichever policy is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Terminate the process.
    Abort,
    /// Panic with the release error, unless the thread is already unwinding.
    #[default]
    Panic,
    /// Log the error and carry on.
    Log,
}

impl FailurePolicy {
    pub(crate) fn handle(self, err: HolderError) {
        error!(error = %err, policy = ?self, "Native release failed");
        match self {
            FailurePolicy::Log => {}
            FailurePolicy::Abort => std::process::abort(),
            FailurePolicy::Panic => {
                if std::thread::panicking() {
                    warn!("Release failed while unwinding, not raising a second panic");
                } else {
                    panic!("{err}");
                }
            }
        }
    }
}

//! Configuration for holder contexts and the `holders` binary.
//!
//! Configuration is a small JSON document; every field is optional.
//!
//! ```json
//! {
//!   "driver_library": "/usr/lib/x86_64-linux-gnu/libcuda.so.1",
//!   "failure_policy": "abort",
//!   "log_filter": "holders_core=debug"
//! }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::FailurePolicy;
use crate::ffi::DEFAULT_DRIVER_LIBRARY;

/// Configuration for a [`HolderContext`](crate::HolderContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HoldersConfig {
    /// Path to the native driver library (default: `libcuda.so.1`)
    pub driver_library: Option<PathBuf>,
    /// What to do when a release call fails
    pub failure_policy: FailurePolicy,
    /// `tracing` filter directive; `RUST_LOG` takes precedence
    pub log_filter: String,
}

impl Default for HoldersConfig {
    fn default() -> Self {
        Self {
            driver_library: None,
            failure_policy: FailurePolicy::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl HoldersConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse holders configuration")
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// The driver library to load, falling back to the platform default.
    pub fn driver_library(&self) -> &Path {
        self.driver_library
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_DRIVER_LIBRARY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = HoldersConfig::default();
        assert_eq!(config.failure_policy, FailurePolicy::Panic);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.driver_library(), Path::new(DEFAULT_DRIVER_LIBRARY));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = HoldersConfig::from_json_str(r#"{ "failure_policy": "log" }"#).unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Log);
        assert_eq!(config.log_filter, "info");
        assert!(config.driver_library.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(HoldersConfig::from_json_str(r#"{ "cache_size": 4 }"#).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "driver_library": "/opt/cuda/libcuda.so", "log_filter": "debug" }}"#
        )
        .unwrap();

        let config = HoldersConfig::from_file(file.path()).unwrap();
        assert_eq!(config.driver_library(), Path::new("/opt/cuda/libcuda.so"));
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = HoldersConfig::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read configuration"));
    }
}

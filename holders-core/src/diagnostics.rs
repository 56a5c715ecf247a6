//! Usage Diagnostics - Live Resource Counters
//!
//! Lightweight accounting of owning captures per resource kind, used for
//! leak detection in tests and tooling. Correctness never depends on it.
//!
//! # Design Goals:
//! - Lock-free atomic counters, updated on capture and inside release actions
//! - Static captures are not counted, since they own nothing
//! - Snapshots serialize to JSON for tooling

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::engine::kind::ResourceType;

/// Live and cumulative counters for one context.
#[derive(Debug, Default)]
pub struct UsageCounters {
    streams: AtomicI64,
    mempools: AtomicI64,
    devptrs: AtomicI64,
    captures: AtomicU64,
    releases: AtomicU64,
    release_failures: AtomicU64,
}

impl UsageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_counter(&self, kind: ResourceType) -> &AtomicI64 {
        match kind {
            ResourceType::Stream => &self.streams,
            ResourceType::MemPool => &self.mempools,
            ResourceType::Deviceptr => &self.devptrs,
        }
    }

    /// Record an owning capture.
    pub fn record_capture(&self, kind: ResourceType) {
        self.live_counter(kind).fetch_add(1, Ordering::Relaxed);
        self.captures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a release attempt. Called whether or not the driver call
    /// succeeds, so live counts stay exact.
    pub fn record_release(&self, kind: ResourceType) {
        self.live_counter(kind).fetch_sub(1, Ordering::Relaxed);
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release_failure(&self) {
        self.release_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Live boxes of `kind`.
    pub fn live(&self, kind: ResourceType) -> i64 {
        self.live_counter(kind).load(Ordering::Relaxed)
    }

    /// Get a snapshot of current counters
    pub fn snapshot(&self) -> UsageReport {
        UsageReport {
            streams: self.streams.load(Ordering::Relaxed),
            mempools: self.mempools.load(Ordering::Relaxed),
            devptrs: self.devptrs.load(Ordering::Relaxed),
            captures: self.captures.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of usage counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub streams: i64,
    pub mempools: i64,
    pub devptrs: i64,
    pub captures: u64,
    pub releases: u64,
    pub release_failures: u64,
}

impl UsageReport {
    /// Total live boxes across all kinds.
    pub fn live_total(&self) -> i64 {
        self.streams + self.mempools + self.devptrs
    }

    /// Returns `true` when nothing captured is still alive.
    pub fn is_clean(&self) -> bool {
        self.streams == 0 && self.mempools == 0 && self.devptrs == 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for UsageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CUDA Core Resource Usage Report")?;
        writeln!(f, "===============================")?;
        writeln!(f, "Currently in use:")?;
        writeln!(f, "    #streams : {}", self.streams)?;
        writeln!(f, "    #mempools: {}", self.mempools)?;
        write!(f, "    #devptrs : {}", self.devptrs)
    }
}

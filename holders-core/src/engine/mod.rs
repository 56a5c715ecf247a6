//! Engine module - Resource holder core
//!
//! This module contains the building blocks for managing native handle
//! lifetimes: resource kinds, boxes, reference-counted holders, the
//! per-kind weak cache, and the context that captures handles.

pub mod binding;
pub mod cache;
pub mod context;
pub mod holder;
pub mod kind;
pub mod resource_box;

pub use binding::{AnyHolder, CaptureMode, HostHolder};
pub use cache::{CacheStats, ResourceCache};
pub use context::{Caches, HolderContext};
pub use holder::Holder;
pub use kind::{
    Deviceptr, DeviceptrH, DeviceptrOwners, MemPool, MemPoolH, NativeHandle, ResourceKind,
    ResourceType, Stream, StreamH,
};
pub use resource_box::ResourceBox;

//! Value-level resource boxes.
//!
//! A [`ResourceBox`] is one native handle plus the owner holders needed to
//! release it. Boxes are plain values: cloning one clones the owner
//! holders (bumping their reference counts) but never duplicates
//! ownership of the boxed handle itself. Ownership lives in
//! [`Holder`](crate::engine::holder::Holder).

use std::fmt;

use crate::engine::kind::{NativeHandle, ResourceKind};

/// A native handle and its owners.
///
/// Either the kind's default handle with default owners, or a captured
/// handle with the owner set required to release it.
pub struct ResourceBox<K: ResourceKind> {
    handle: NativeHandle,
    owners: K::Owners,
}

impl<K: ResourceKind> ResourceBox<K> {
    pub fn new(handle: NativeHandle, owners: K::Owners) -> Self {
        Self { handle, owners }
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// The handle as an address-sized integer.
    pub fn as_int(&self) -> usize {
        self.handle.as_usize()
    }

    pub fn owners(&self) -> &K::Owners {
        &self.owners
    }

    /// Returns `true` if this box holds the kind's default handle.
    pub fn is_default(&self) -> bool {
        self.handle == K::DEFAULT_HANDLE
    }

    pub fn into_parts(self) -> (NativeHandle, K::Owners) {
        (self.handle, self.owners)
    }
}

impl<K: ResourceKind> Default for ResourceBox<K> {
    fn default() -> Self {
        Self::new(K::DEFAULT_HANDLE, K::Owners::default())
    }
}

impl<K: ResourceKind> Clone for ResourceBox<K> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            owners: self.owners.clone(),
        }
    }
}

// Identity is the handle alone; owners do not participate.
impl<K: ResourceKind> PartialEq for ResourceBox<K> {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl<K: ResourceKind> Eq for ResourceBox<K> {}

impl<K: ResourceKind> fmt::Debug for ResourceBox<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(K::CLASS_NAME)
            .field("handle", &self.handle)
            .field("owners", &self.owners)
            .finish()
    }
}

impl<K: ResourceKind> fmt::Display for ResourceBox<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", K::NATIVE_NAME, self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::kind::{Deviceptr, DeviceptrOwners, MemPool, Stream};
    use crate::engine::holder::Holder;

    #[test]
    fn test_default_box() {
        let boxed = ResourceBox::<Stream>::default();
        assert!(boxed.is_default());
        assert_eq!(boxed.as_int(), 0x2);
        assert_eq!(boxed.to_string(), "CUstream=0x2");
    }

    #[test]
    fn test_equality_ignores_owners() {
        let pool = Holder::<MemPool>::default();
        let a = ResourceBox::<Deviceptr>::new(
            NativeHandle::new(0x40),
            DeviceptrOwners { pool: pool.clone(), stream: Holder::default() },
        );
        let b = ResourceBox::<Deviceptr>::new(NativeHandle::new(0x40), DeviceptrOwners::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_clone_shares_owner_holders() {
        let pool = Holder::<MemPool>::default();
        let boxed = ResourceBox::<Deviceptr>::new(
            NativeHandle::new(0x40),
            DeviceptrOwners { pool: pool.clone(), stream: Holder::default() },
        );
        assert_eq!(pool.strong_count(), 2);

        let copy = boxed.clone();
        assert_eq!(pool.strong_count(), 3);
        drop(copy);
        drop(boxed);
        assert_eq!(pool.strong_count(), 1);
    }

    #[test]
    fn test_into_parts() {
        let boxed = ResourceBox::<MemPool>::new(NativeHandle::new(0x1000), ());
        let (handle, ()) = boxed.into_parts();
        assert_eq!(handle.as_usize(), 0x1000);
    }
}

//! Reference-Counted Holders
//!
//! A [`Holder`] is shared ownership of one boxed native handle. The release
//! action is bound to the reference-counted cell when the handle is
//! captured, not to the handle value, so cloning holders or copying boxes
//! can never produce a second release.
//!
//! # Release protocol:
//! - Every holder drop goes through [`Arc::into_inner`], which hands the
//!   cell to exactly one thread: the one that dropped the last strong
//!   reference.
//! - That thread rebuilds the [`ResourceBox`], runs the release action
//!   against it, then drops the box. Owner holders therefore outlive the
//!   dependent's release call.
//! - The cell's allocation is already reclaimed by then, and the box is
//!   dropped before any failure policy runs, so a failed release never
//!   leaks the wrapper.

use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::{FailurePolicy, HolderError};
use crate::engine::kind::{NativeHandle, ResourceKind};
use crate::engine::resource_box::ResourceBox;

/// Kind-specific release call bound at capture time.
pub(crate) type ReleaseFn<K> =
    Box<dyn FnOnce(&ResourceBox<K>) -> Result<(), HolderError> + Send + Sync>;

pub(crate) struct BoundRelease<K: ResourceKind> {
    action: ReleaseFn<K>,
    policy: FailurePolicy,
}

impl<K: ResourceKind> BoundRelease<K> {
    pub(crate) fn new(action: ReleaseFn<K>, policy: FailurePolicy) -> Self {
        Self { action, policy }
    }
}

/// Shared state behind every holder of one box.
///
/// The handle never changes after capture; owners may be re-targeted while
/// the cell is alive and are read once more, without contention, at
/// release time.
struct BoxCell<K: ResourceKind> {
    handle: NativeHandle,
    owners: Mutex<K::Owners>,
    release: Option<BoundRelease<K>>,
}

impl<K: ResourceKind> BoxCell<K> {
    fn lock_owners(&self) -> MutexGuard<'_, K::Owners> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(self) {
        let BoxCell { handle, owners, release } = self;
        let owners = owners.into_inner().unwrap_or_else(PoisonError::into_inner);
        let boxed = ResourceBox::<K>::new(handle, owners);

        let Some(BoundRelease { action, policy }) = release else {
            return;
        };
        let outcome = action(&boxed);
        drop(boxed);

        if let Err(err) = outcome {
            policy.handle(err);
        }
    }
}

/// Shared ownership of a boxed native handle.
///
/// Dropping the last holder of a captured box runs its release action
/// exactly once. A default holder refers to a default box and releases
/// nothing.
pub struct Holder<K: ResourceKind> {
    cell: ManuallyDrop<Arc<BoxCell<K>>>,
}

impl<K: ResourceKind> Holder<K> {
    pub(crate) fn bind(boxed: ResourceBox<K>, release: Option<BoundRelease<K>>) -> Self {
        let (handle, owners) = boxed.into_parts();
        Self::from_cell(Arc::new(BoxCell {
            handle,
            owners: Mutex::new(owners),
            release,
        }))
    }

    fn from_cell(cell: Arc<BoxCell<K>>) -> Self {
        Self {
            cell: ManuallyDrop::new(cell),
        }
    }

    pub fn handle(&self) -> NativeHandle {
        self.cell.handle
    }

    /// The handle as an address-sized integer.
    pub fn as_int(&self) -> usize {
        self.cell.handle.as_usize()
    }

    /// Returns `true` if this holder refers to the kind's default handle.
    pub fn is_default(&self) -> bool {
        self.cell.handle == K::DEFAULT_HANDLE
    }

    /// Returns `true` if dropping the last holder will release the handle.
    pub fn is_owning(&self) -> bool {
        self.cell.release.is_some()
    }

    /// Current owner holders (cloned).
    pub fn owners(&self) -> K::Owners {
        self.cell.lock_owners().clone()
    }

    /// A value copy of the box this holder points at.
    pub fn snapshot(&self) -> ResourceBox<K> {
        ResourceBox::new(self.cell.handle, self.owners())
    }

    /// Number of holders sharing this box.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    /// Returns `true` if both holders share the same box.
    pub fn same_box(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Point this holder at a fresh default box.
    ///
    /// Drops this holder's reference to the previous box, which releases
    /// it if this was the last one. Safe on an already-default holder.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn downgrade(&self) -> WeakHolder<K> {
        WeakHolder(Arc::downgrade(&self.cell))
    }

    /// Mutate the owner set in place. Must not race with release, which
    /// cannot happen while `self` keeps the box alive.
    pub(crate) fn update_owners<R>(&self, update: impl FnOnce(&mut K::Owners) -> R) -> R {
        update(&mut self.cell.lock_owners())
    }
}

impl<K: ResourceKind> Default for Holder<K> {
    fn default() -> Self {
        Self::bind(ResourceBox::default(), None)
    }
}

impl<K: ResourceKind> Clone for Holder<K> {
    fn clone(&self) -> Self {
        Self::from_cell(Arc::clone(&self.cell))
    }
}

impl<K: ResourceKind> Drop for Holder<K> {
    fn drop(&mut self) {
        // SAFETY: `cell` is taken exactly once, here, and never read again.
        let cell = unsafe { ManuallyDrop::take(&mut self.cell) };
        if let Some(cell) = Arc::into_inner(cell) {
            cell.release();
        }
    }
}

impl<K: ResourceKind> fmt::Debug for Holder<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Holder")
            .field("kind", &K::CLASS_NAME)
            .field("handle", &self.cell.handle)
            .field("owning", &self.is_owning())
            .field("strong_count", &self.strong_count())
            .finish()
    }
}

impl<K: ResourceKind> fmt::Display for Holder<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", K::NATIVE_NAME, self.cell.handle)
    }
}

impl<K: ResourceKind> From<&Holder<K>> for usize {
    fn from(holder: &Holder<K>) -> Self {
        holder.as_int()
    }
}

/// Non-owning observer of a holder's box. Never extends its lifetime.
pub(crate) struct WeakHolder<K: ResourceKind>(Weak<BoxCell<K>>);

impl<K: ResourceKind> WeakHolder<K> {
    pub(crate) fn upgrade(&self) -> Option<Holder<K>> {
        self.0.upgrade().map(Holder::from_cell)
    }
}

use std::any::type_name;
use std::fmt;
use std::mem::{self, ManuallyDrop};

use crate::SharedPtr;
use crate::control_block::{BlockRef, ControlBlock};

/// A weak, single-threaded handle that observes an object managed by a [`SharedPtr`] without
/// keeping it alive.
///
/// A weak handle keeps the control block of the object alive, which is what allows it to detect
/// that the object has expired. Use [`lock()`][Self::lock] to obtain a strong handle if the
/// object still exists.
///
/// Weak handles are how reference cycles between managed objects are broken.
///
/// # Example
///
/// ```rust
/// use counted_ptr::{SharedPtr, WeakPtr};
///
/// let mut strong = SharedPtr::new(42_u32);
/// let weak = WeakPtr::new(&strong);
///
/// assert!(!weak.expired());
/// assert_eq!(*weak.lock(), 42);
///
/// strong.reset();
///
/// assert!(weak.expired());
/// assert!(weak.lock().is_empty());
/// ```
///
/// # Thread safety
///
/// This type is single-threaded. The counters are not atomic.
pub struct WeakPtr<T: ?Sized> {
    raw: Option<BlockRef<T>>,
}

impl<T: ?Sized> WeakPtr<T> {
    /// Creates a weak handle observing the object of `strong`.
    ///
    /// If `strong` is empty, the weak handle is empty as well.
    #[must_use]
    pub fn new(strong: &SharedPtr<T>) -> Self {
        let raw = strong.block_ref();

        if let Some(raw) = raw {
            raw.header().weak_increment();
        }

        Self { raw }
    }

    /// Whether the handle is empty or its object has been destroyed.
    ///
    /// Once this returns `true` it keeps returning `true` until the handle is reassigned.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.raw.is_none_or(|raw| raw.header().is_expired())
    }

    /// Attempts to obtain a strong handle to the observed object.
    ///
    /// Returns an empty [`SharedPtr`] if this handle is empty or the object has expired
    /// (including while the object's destructor is running).
    #[must_use]
    pub fn lock(&self) -> SharedPtr<T> {
        match self.raw {
            Some(raw) if !raw.header().is_expired() => {
                raw.header().strong_increment();
                SharedPtr::from_block_ref(raw)
            }
            _ => SharedPtr::default(),
        }
    }

    /// Returns the number of strong handles to the observed object, or 0 if the handle is empty.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().strong_count())
    }

    /// Returns the number of weak handles observing the same control block, or 0 if the handle
    /// is empty.
    ///
    /// The internal self-reference of a [`SelfReferencing`][crate::SelfReferencing] object is
    /// not included.
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().observer_count())
    }

    /// Whether both handles observe the same address. Two empty handles are equal.
    #[must_use]
    pub fn ptr_eq<U: ?Sized>(&self, other: &WeakPtr<U>) -> bool {
        self.raw.map(|raw| raw.ptr.cast::<()>()) == other.raw.map(|raw| raw.ptr.cast::<()>())
    }

    /// Releases the weak unit held by this handle, leaving the handle empty.
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Moves the contents out of this handle, leaving it empty.
    #[must_use]
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Exchanges the contents of two handles without touching any counts.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.raw, &mut other.raw);
    }

    /// Releases the weak unit via the counter-only path, used by a self-reference slot while
    /// its owning object is being destroyed.
    pub(crate) fn release_counter_only(self) {
        let this = ManuallyDrop::new(self);

        if let Some(raw) = this.raw {
            raw.header().weak_decrement_counter_only();
        }
    }
}

impl<T: ?Sized> Default for WeakPtr<T> {
    /// Creates an empty handle that observes nothing and is always expired.
    fn default() -> Self {
        Self { raw: None }
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            raw.header().weak_increment();
        }

        Self { raw: self.raw }
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            // SAFETY: We own one weak unit of the block and forget the block pointer here.
            unsafe {
                ControlBlock::weak_decrement(raw.block);
            }
        }
    }
}

impl<T: ?Sized> From<&SharedPtr<T>> for WeakPtr<T> {
    fn from(value: &SharedPtr<T>) -> Self {
        Self::new(value)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T: ?Sized> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("raw", &self.raw)
            .finish()
    }
}

use std::cell::OnceCell;
use std::fmt;

use crate::{SharedPtr, WeakPtr};

/// Lets an object managed by a [`SharedPtr`] obtain handles to itself.
///
/// Implementors embed a [`SelfSlot<Self>`] field and expose it via
/// [`self_slot()`][Self::self_slot]. The slot is primed when the first strong handle to the
/// object is created through one of the self-referencing constructors:
///
/// * [`SharedPtr::new_self_referencing()`]
/// * [`SharedPtr::from_box_self_referencing()`]
///
/// Objects placed under management through any other constructor have an empty slot and
/// [`shared_from_this()`][Self::shared_from_this] returns an empty handle for them.
///
/// # Example
///
/// ```rust
/// use counted_ptr::{SelfReferencing, SelfSlot, SharedPtr};
///
/// #[derive(Debug)]
/// struct Session {
///     id: u32,
///     slot: SelfSlot<Session>,
/// }
///
/// impl Session {
///     fn register(&self, registry: &mut Vec<SharedPtr<Session>>) {
///         registry.push(self.shared_from_this());
///     }
/// }
///
/// impl SelfReferencing for Session {
///     fn self_slot(&self) -> &SelfSlot<Self> {
///         &self.slot
///     }
/// }
///
/// let session = SharedPtr::new_self_referencing(Session {
///     id: 7,
///     slot: SelfSlot::new(),
/// });
///
/// let mut registry = Vec::new();
/// session.register(&mut registry);
///
/// assert_eq!(registry[0].id, 7);
/// assert_eq!(session.use_count(), 2);
/// ```
pub trait SelfReferencing: Sized {
    /// Returns the self-reference slot embedded in the object.
    ///
    /// Must return the same slot every time it is called on the same object.
    fn self_slot(&self) -> &SelfSlot<Self>;

    /// Returns a strong handle to this object, sharing ownership with the handles that
    /// already manage it.
    ///
    /// Returns an empty handle if the object is not managed through a self-referencing
    /// constructor or if the object is being destroyed.
    #[must_use]
    fn shared_from_this(&self) -> SharedPtr<Self> {
        self.self_slot()
            .weak
            .get()
            .map_or_else(SharedPtr::default, WeakPtr::lock)
    }

    /// Returns a weak handle to this object.
    ///
    /// Returns an empty handle if the object is not managed through a self-referencing
    /// constructor.
    #[must_use]
    fn weak_from_this(&self) -> WeakPtr<Self> {
        self.self_slot().weak.get().cloned().unwrap_or_default()
    }
}

/// The weak self-reference embedded in a [`SelfReferencing`] object.
///
/// The slot holds a weak unit of the object's control block while primed. Unlike other weak
/// handles, that unit never keeps the block alive past the object: it is released as part of
/// destroying the object, without the block-freeing check of a regular weak release, because
/// the strong release that is destroying the object already owns that responsibility.
///
/// Cloning a slot produces an empty slot. A cloned object is a different object and becomes
/// self-referencing only once it is itself placed under management.
pub struct SelfSlot<T> {
    weak: OnceCell<WeakPtr<T>>,
}

impl<T> SelfSlot<T> {
    /// Creates an empty slot, to be primed when the object is placed under management.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            weak: OnceCell::new(),
        }
    }

    /// Whether the slot has been primed with the control block of the object.
    #[must_use]
    pub fn is_primed(&self) -> bool {
        self.weak.get().is_some()
    }

    /// Primes the slot with a weak handle to the object managed by `owner`.
    ///
    /// Returns `false` (and changes nothing) if the slot was already primed.
    pub(crate) fn prime(&self, owner: &SharedPtr<T>) -> bool {
        if self.is_primed() {
            return false;
        }

        self.weak.set(WeakPtr::new(owner)).is_ok()
    }
}

impl<T> Default for SelfSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SelfSlot<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Drop for SelfSlot<T> {
    fn drop(&mut self) {
        if let Some(weak) = self.weak.take() {
            weak.release_counter_only();
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T> fmt::Debug for SelfSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfSlot")
            .field("primed", &self.is_primed())
            .finish()
    }
}

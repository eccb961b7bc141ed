use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

use crate::{DefaultDelete, Deleter};

/// A single-owner handle to an object, released by a [`Deleter`] when the handle is dropped
/// or reset.
///
/// Ownership moves with the handle and is never shared. A stateless deleter adds no storage,
/// so with [`DefaultDelete`] the handle is the size of a pointer to `T`.
///
/// Unsized objects such as slices are supported and indexing works through the dereferenced
/// slice.
///
/// A unique pointer can be converted into a [`SharedPtr`][crate::SharedPtr], which takes
/// over both the object and the deleter.
///
/// # Example
///
/// ```rust
/// use counted_ptr::UniquePtr;
///
/// let mut numbers = UniquePtr::from_box(vec![1_u32, 2, 3].into_boxed_slice());
/// numbers[1] = 20;
///
/// assert_eq!(&*numbers, &[1, 20, 3]);
///
/// numbers.reset();
/// assert!(numbers.is_empty());
/// ```
pub struct UniquePtr<T: ?Sized, D: Deleter<T> = DefaultDelete> {
    ptr: Option<NonNull<T>>,
    deleter: D,

    // We drop a `T` when we are dropped.
    _owns: PhantomData<T>,
}

impl<T> UniquePtr<T> {
    /// Moves `value` to the heap and takes ownership of it.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> UniquePtr<T> {
    /// Takes ownership of a boxed object.
    #[must_use]
    pub fn from_box(value: Box<T>) -> Self {
        Self {
            ptr: Some(NonNull::from(Box::leak(value))),
            deleter: DefaultDelete,
            _owns: PhantomData,
        }
    }

    /// Takes ownership of an object via a raw pointer obtained from [`Box::into_raw()`].
    ///
    /// A null pointer results in an empty handle.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the pointer is either null or was obtained from
    /// [`Box::into_raw()`] and is not owned by anything else.
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { Self::from_raw_with_deleter(ptr, DefaultDelete) }
    }
}

impl<T: ?Sized, D: Deleter<T>> UniquePtr<T, D> {
    /// Takes ownership of an object via a raw pointer, releasing it with `deleter`.
    ///
    /// A null pointer results in an empty handle that still carries the deleter.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the pointer is either null or points to a live object that
    /// `deleter` is able to release, and that the object is not owned by anything else.
    #[must_use]
    pub unsafe fn from_raw_with_deleter(ptr: *mut T, deleter: D) -> Self {
        Self {
            ptr: NonNull::new(ptr),
            deleter,
            _owns: PhantomData,
        }
    }

    /// Returns a reference to the object, or `None` if the handle is empty.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: We own the object, so it is alive.
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Returns an exclusive reference to the object, or `None` if the handle is empty.
    #[must_use]
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // SAFETY: We own the object exclusively and `&mut self` guarantees no other borrow
        // exists through this handle.
        self.ptr.map(|mut ptr| unsafe { ptr.as_mut() })
    }

    /// Returns a pointer to the object, or `None` if the handle is empty.
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Whether the handle owns nothing.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr.is_none()
    }

    /// Returns the deleter that will release the object.
    #[must_use]
    pub fn deleter(&self) -> &D {
        &self.deleter
    }

    /// Returns the deleter that will release the object, for modification.
    #[must_use]
    pub fn deleter_mut(&mut self) -> &mut D {
        &mut self.deleter
    }

    /// Gives up ownership without releasing the object, leaving the handle empty.
    ///
    /// The caller becomes responsible for releasing the object, typically by passing the
    /// pointer back to [`from_raw_with_deleter()`][Self::from_raw_with_deleter].
    #[must_use = "the object is leaked unless the returned pointer is released"]
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self.ptr.take()
    }

    /// Releases the owned object (if any), leaving the handle empty.
    pub fn reset(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // SAFETY: We owned the object exclusively and forget the pointer here.
            unsafe {
                self.deleter.delete(ptr);
            }
        }
    }

    /// Releases the owned object (if any) and takes ownership of the object at `ptr`.
    ///
    /// The previous object is released after the new pointer has been stored, so a deleter
    /// that inspects this handle already sees the new object.
    ///
    /// # Safety
    ///
    /// The same requirements as [`from_raw_with_deleter()`][Self::from_raw_with_deleter] apply
    /// to `ptr` in combination with the deleter of this handle.
    pub unsafe fn reset_to_raw(&mut self, ptr: *mut T) {
        let previous = mem::replace(&mut self.ptr, NonNull::new(ptr));

        if let Some(previous) = previous {
            // We never own the same object twice.
            debug_assert!(!ptr::addr_eq(previous.as_ptr(), ptr));

            // SAFETY: We owned the previous object exclusively and have forgotten its pointer.
            unsafe {
                self.deleter.delete(previous);
            }
        }
    }

    /// Exchanges the objects and the deleters of two handles.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Splits the handle into its pointer and its deleter without releasing anything.
    pub(crate) fn into_parts(self) -> (Option<NonNull<T>>, D) {
        let this = ManuallyDrop::new(self);

        // SAFETY: `this` is never used or dropped again, so the deleter is moved out exactly once.
        let deleter = unsafe { ptr::read(&this.deleter) };

        (this.ptr, deleter)
    }
}

impl<T: ?Sized, D: Deleter<T> + Default> Default for UniquePtr<T, D> {
    /// Creates an empty handle.
    fn default() -> Self {
        Self {
            ptr: None,
            deleter: D::default(),
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for UniquePtr<T, D> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for UniquePtr<T, D> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Cargo-mutants does not understand this signature - every mutation is unviable waste of time.
    fn deref(&self) -> &Self::Target {
        self.get().expect("dereferenced an empty UniquePtr")
    }
}

impl<T: ?Sized, D: Deleter<T>> DerefMut for UniquePtr<T, D> {
    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Cargo-mutants does not understand this signature - every mutation is unviable waste of time.
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut().expect("dereferenced an empty UniquePtr")
    }
}

impl<T: ?Sized> From<Box<T>> for UniquePtr<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T: ?Sized, D: Deleter<T>> fmt::Debug for UniquePtr<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("ptr", &self.ptr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(UniquePtr<u32>: Send, Sync, Clone);

    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[derive(Default)]
    struct CountingDelete {
        deleted: usize,
    }

    impl<T: ?Sized> Deleter<T> for CountingDelete {
        unsafe fn delete(&mut self, object: NonNull<T>) {
            self.deleted += 1;

            // SAFETY: Every object in these tests is allocated via `Box`.
            drop(unsafe { Box::from_raw(object.as_ptr()) });
        }
    }

    #[test]
    fn default_deleter_adds_no_storage() {
        assert_eq!(size_of::<UniquePtr<u64>>(), size_of::<*mut u64>());
        assert_eq!(size_of::<UniquePtr<[u64]>>(), size_of::<*mut [u64]>());
    }

    #[test]
    fn drop_releases_object_once() {
        let drops = Rc::new(Cell::new(0));

        let unique = UniquePtr::new(DropCounter(Rc::clone(&drops)));
        assert_eq!(drops.get(), 0);

        drop(unique);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn release_hands_over_ownership() {
        let mut unique = UniquePtr::new(5_u32);

        let raw = unique.release().unwrap();
        assert!(unique.is_empty());
        assert!(unique.get().is_none());

        // SAFETY: The pointer came from a `Box` and was released by the handle.
        let back = unsafe { UniquePtr::from_raw(raw.as_ptr()) };
        assert_eq!(*back, 5);
    }

    #[test]
    fn reset_to_raw_replaces_and_releases_previous() {
        // SAFETY: The pointers came from `Box::into_raw()` and are not owned elsewhere.
        let mut unique = unsafe {
            UniquePtr::from_raw_with_deleter(
                Box::into_raw(Box::new(1_u32)),
                CountingDelete::default(),
            )
        };

        // SAFETY: As above.
        unsafe {
            unique.reset_to_raw(Box::into_raw(Box::new(2_u32)));
        }

        assert_eq!(*unique, 2);
        assert_eq!(unique.deleter().deleted, 1);

        unique.reset();
        assert_eq!(unique.deleter().deleted, 2);

        // Resetting an empty handle is a no-op.
        unique.reset();
        assert_eq!(unique.deleter().deleted, 2);
    }

    #[test]
    fn deleter_state_is_accessible() {
        let mut unique = UniquePtr::<u32, CountingDelete>::default();

        unique.deleter_mut().deleted = 10;
        assert_eq!(unique.deleter().deleted, 10);
        assert!(unique.is_empty());
    }

    #[test]
    fn swap_exchanges_objects_and_deleters() {
        // SAFETY: The pointer came from `Box::into_raw()` and is not owned elsewhere.
        let mut a = unsafe {
            UniquePtr::from_raw_with_deleter(
                Box::into_raw(Box::new(1_u32)),
                CountingDelete { deleted: 7 },
            )
        };
        let mut b = UniquePtr::<u32, CountingDelete>::default();

        a.swap(&mut b);

        assert!(a.is_empty());
        assert_eq!(a.deleter().deleted, 0);
        assert_eq!(*b, 1);
        assert_eq!(b.deleter().deleted, 7);
    }

    #[test]
    fn slices_support_indexing() {
        let mut unique = UniquePtr::from(vec![1_u32, 2, 3].into_boxed_slice());

        unique[0] = 10;

        assert_eq!(unique.len(), 3);
        assert_eq!(unique[0], 10);
        assert_eq!(unique.get().map(<[u32]>::len), Some(3));
    }

    #[test]
    fn get_mut_modifies_in_place() {
        let mut unique = UniquePtr::new(String::from("a"));

        unique.get_mut().unwrap().push('b');
        unique.push('c');

        assert_eq!(unique.as_str(), "abc");
    }

    #[test]
    #[should_panic(expected = "dereferenced an empty UniquePtr")]
    fn deref_empty_panics() {
        let empty = UniquePtr::<u32>::default();

        _ = *empty;
    }

    #[test]
    fn into_parts_does_not_release() {
        let drops = Rc::new(Cell::new(0));
        let unique = UniquePtr::new(DropCounter(Rc::clone(&drops)));

        let (ptr, mut deleter) = unique.into_parts();
        assert_eq!(drops.get(), 0);

        // SAFETY: The pointer came from the handle, which no longer owns it.
        unsafe { deleter.delete(ptr.unwrap()) };
        assert_eq!(drops.get(), 1);
    }
}

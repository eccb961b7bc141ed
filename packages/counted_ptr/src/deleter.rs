use std::ptr::NonNull;

/// Releases an object that a smart pointer owned through a raw pointer.
///
/// Deleters are used by [`UniquePtr`][crate::UniquePtr], by the intrusive model via
/// [`RefCounted::Deleter`][crate::RefCounted::Deleter] and by the [`SharedPtr`][crate::SharedPtr]
/// constructors that take ownership of an existing allocation.
///
/// A stateless deleter is a zero-sized type and adds no storage to the pointer that carries it.
///
/// # Example
///
/// ```rust
/// use std::ptr::NonNull;
///
/// use counted_ptr::{Deleter, UniquePtr};
///
/// #[derive(Default)]
/// struct Leak;
///
/// impl<T: ?Sized> Deleter<T> for Leak {
///     unsafe fn delete(&mut self, _object: NonNull<T>) {
///         // Intentionally does nothing.
///     }
/// }
///
/// let value: *mut u32 = Box::leak(Box::new(42_u32));
///
/// // SAFETY: The deleter never touches the pointer, so any valid pointer will do.
/// let unique = unsafe { UniquePtr::from_raw_with_deleter(value, Leak) };
/// assert_eq!(*unique, 42);
/// ```
pub trait Deleter<T: ?Sized> {
    /// Releases the object.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `object` is a pointer this deleter is able to release
    /// (e.g. one that came from [`Box::into_raw`] for [`DefaultDelete`]) and that the object
    /// is not accessed again after this call.
    unsafe fn delete(&mut self, object: NonNull<T>);
}

/// Releases objects that were allocated via [`Box`].
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    #[inline]
    unsafe fn delete(&mut self, object: NonNull<T>) {
        // SAFETY: Forwarding guarantees from the caller - the pointer came from `Box::into_raw()`.
        drop(unsafe { Box::from_raw(object.as_ptr()) });
    }
}

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::{DefaultDelete, RefCounted};

/// A strong, single-threaded handle to an object that carries its own reference count.
///
/// Copies of the handle add references to the counter embedded in the object and dropping a
/// handle removes one. When the last reference is removed, the object is released by the
/// [`Deleter`][crate::Deleter] declared by its [`RefCounted`] implementation.
///
/// Because the count lives in the object, a new handle can be created from nothing but a pointer
/// to an already-managed object (see [`from_raw()`][Self::from_raw]) and it will share
/// ownership with the existing handles.
///
/// # Example
///
/// ```rust
/// use counted_ptr::{DefaultDelete, IntrusivePtr, RefCounted, SimpleCounter};
///
/// #[derive(Default)]
/// struct Node {
///     refs: SimpleCounter,
/// }
///
/// // SAFETY: `counter()` always returns the embedded field.
/// unsafe impl RefCounted for Node {
///     type Counter = SimpleCounter;
///     type Deleter = DefaultDelete;
///
///     fn counter(&self) -> &SimpleCounter {
///         &self.refs
///     }
/// }
///
/// let first = IntrusivePtr::new(Box::new(Node::default()));
/// let second = first.clone();
///
/// assert_eq!(first.use_count(), 2);
///
/// drop(first);
/// assert_eq!(second.use_count(), 1);
/// ```
///
/// # Thread safety
///
/// This type is single-threaded.
pub struct IntrusivePtr<T: RefCounted + ?Sized> {
    ptr: Option<NonNull<T>>,

    // We (may) drop a `T` when we are dropped.
    _owns: PhantomData<T>,
}

impl<T> IntrusivePtr<T>
where
    T: RefCounted<Deleter = DefaultDelete>,
{
    /// Moves `value` to the heap and creates the first handle to it.
    #[must_use]
    pub fn make(value: T) -> Self {
        Self::new(Box::new(value))
    }
}

impl<T> IntrusivePtr<T>
where
    T: RefCounted<Deleter = DefaultDelete> + ?Sized,
{
    /// Takes ownership of a boxed object, adding one reference to it.
    #[must_use]
    pub fn new(value: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(value));

        // SAFETY: The pointer came from a `Box`, which `DefaultDelete` is able to release.
        unsafe { Self::from_raw(ptr.as_ptr()) }
    }
}

impl<T: RefCounted + ?Sized> IntrusivePtr<T> {
    /// Creates a handle from a raw pointer, adding one reference to the object.
    ///
    /// The object may already be referenced by other handles, in which case the new handle
    /// shares ownership with them. A null pointer results in an empty handle.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the pointer is either null or points to a live object that
    /// the type's [`RefCounted::Deleter`] is able to release, and that the object's count is
    /// not managed by anything other than intrusive handles.
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        let ptr = NonNull::new(ptr);

        if let Some(ptr) = ptr {
            // SAFETY: The caller guarantees the object is alive.
            unsafe { ptr.as_ref() }.inc_ref();
        }

        Self {
            ptr,
            _owns: PhantomData,
        }
    }

    /// Returns a reference to the object, or `None` if the handle is empty.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: We hold a reference, so the object is alive.
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Returns a pointer to the object, or `None` if the handle is empty.
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Returns the number of references to the object, or 0 if the handle is empty.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.get().map_or(0, RefCounted::ref_count)
    }

    /// Whether the handle references nothing.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr.is_none()
    }

    /// Releases the reference held by this handle, leaving the handle empty.
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Moves the contents out of this handle, leaving it empty, without touching the count.
    #[must_use]
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Exchanges the contents of two handles without touching any counts.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.ptr, &mut other.ptr);
    }
}

impl<T: RefCounted + ?Sized> Default for IntrusivePtr<T> {
    /// Creates an empty handle.
    fn default() -> Self {
        Self {
            ptr: None,
            _owns: PhantomData,
        }
    }
}

impl<T: RefCounted + ?Sized> Clone for IntrusivePtr<T> {
    fn clone(&self) -> Self {
        if let Some(object) = self.get() {
            object.inc_ref();
        }

        Self {
            ptr: self.ptr,
            _owns: PhantomData,
        }
    }
}

impl<T: RefCounted + ?Sized> Drop for IntrusivePtr<T> {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // SAFETY: We own one reference and forget the pointer here.
            unsafe {
                T::dec_ref(ptr);
            }
        }
    }
}

impl<T: RefCounted + ?Sized> Deref for IntrusivePtr<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Cargo-mutants does not understand this signature - every mutation is unviable waste of time.
    fn deref(&self) -> &Self::Target {
        self.get().expect("dereferenced an empty IntrusivePtr")
    }
}

/// Handles are equal if they point to the same object.
impl<T: RefCounted + ?Sized> PartialEq for IntrusivePtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr.map(NonNull::cast::<()>) == other.ptr.map(NonNull::cast::<()>)
    }
}

impl<T: RefCounted + ?Sized> Eq for IntrusivePtr<T> {}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T: RefCounted + ?Sized> fmt::Debug for IntrusivePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("ptr", &self.ptr)
            .field("use_count", &self.use_count())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::{Deleter, SimpleCounter};

    thread_local! {
        static DELETED: Cell<usize> = const { Cell::new(0) };
    }

    #[derive(Default)]
    struct Node {
        refs: SimpleCounter,
        value: u32,
    }

    #[derive(Default)]
    struct CountingDelete;

    impl Deleter<Node> for CountingDelete {
        unsafe fn delete(&mut self, object: NonNull<Node>) {
            DELETED.with(|deleted| deleted.set(deleted.get() + 1));

            // SAFETY: Every node in these tests is allocated via `Box`.
            drop(unsafe { Box::from_raw(object.as_ptr()) });
        }
    }

    // SAFETY: `counter()` always returns the embedded field.
    unsafe impl RefCounted for Node {
        type Counter = SimpleCounter;
        type Deleter = CountingDelete;

        fn counter(&self) -> &SimpleCounter {
            &self.refs
        }
    }

    fn new_node(value: u32) -> IntrusivePtr<Node> {
        let raw = Box::into_raw(Box::new(Node {
            value,
            ..Node::default()
        }));

        // SAFETY: Allocated via `Box`, which `CountingDelete` releases.
        unsafe { IntrusivePtr::from_raw(raw) }
    }

    assert_not_impl_any!(IntrusivePtr<Node>: Send, Sync);

    #[test]
    fn last_handle_invokes_deleter_once() {
        DELETED.with(|deleted| deleted.set(0));

        let first = new_node(1);
        let second = first.clone();

        assert_eq!(first.use_count(), 2);
        assert_eq!(second.use_count(), 2);

        drop(first);
        assert_eq!(second.use_count(), 1);
        assert_eq!(DELETED.with(Cell::get), 0);

        drop(second);
        assert_eq!(DELETED.with(Cell::get), 1);
    }

    #[test]
    fn from_raw_shares_existing_count() {
        DELETED.with(|deleted| deleted.set(0));

        let first = new_node(2);
        let raw = first.ptr().unwrap().as_ptr();

        // SAFETY: The object is alive and managed by intrusive handles only.
        let second = unsafe { IntrusivePtr::from_raw(raw) };

        assert_eq!(first, second);
        assert_eq!(second.use_count(), 2);
        assert_eq!(second.value, 2);

        drop(first);
        drop(second);
        assert_eq!(DELETED.with(Cell::get), 1);
    }

    #[test]
    fn take_reset_and_swap() {
        let mut a = new_node(3);
        let mut b = new_node(4);

        a.swap(&mut b);
        assert_eq!(a.value, 4);
        assert_eq!(b.value, 3);

        let moved = a.take();
        assert!(a.is_empty());
        assert_eq!(a.use_count(), 0);
        assert_eq!(moved.use_count(), 1);

        b.reset();
        assert!(b.is_empty());
        assert!(b.get().is_none());
    }

    #[test]
    fn empty_handles() {
        let empty = IntrusivePtr::<Node>::default();

        assert!(empty.is_empty());
        assert_eq!(empty.clone().use_count(), 0);
        assert_eq!(empty, IntrusivePtr::default());

        // SAFETY: Null is explicitly allowed.
        let from_null = unsafe { IntrusivePtr::<Node>::from_raw(std::ptr::null_mut()) };
        assert!(from_null.is_empty());
    }

    #[test]
    #[should_panic(expected = "dereferenced an empty IntrusivePtr")]
    fn deref_empty_panics() {
        let empty = IntrusivePtr::<Node>::default();

        _ = empty.value;
    }

    #[test]
    fn default_delete_with_make() {
        #[derive(Default)]
        struct Simple {
            refs: SimpleCounter,
        }

        // SAFETY: `counter()` always returns the embedded field.
        unsafe impl RefCounted for Simple {
            type Counter = SimpleCounter;
            type Deleter = DefaultDelete;

            fn counter(&self) -> &SimpleCounter {
                &self.refs
            }
        }

        let handle = IntrusivePtr::make(Simple::default());
        let clone = handle.clone();

        assert_eq!(clone.use_count(), 2);
        assert!(handle == clone);
    }
}

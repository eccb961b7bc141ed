use std::cell::Cell;
use std::ptr::NonNull;

use crate::Deleter;

/// A reference counter embedded in an intrusively counted object.
pub trait Counter: Default {
    /// Increments the count, returning the new value.
    fn inc_ref(&self) -> usize;

    /// Decrements the count, returning the new value.
    ///
    /// Callers never decrement a zero count.
    fn dec_ref(&self) -> usize;

    /// Returns the current count.
    fn ref_count(&self) -> usize;
}

/// A plain single-threaded [`Counter`] that starts at zero.
#[derive(Debug, Default)]
pub struct SimpleCounter {
    count: Cell<usize>,
}

impl Counter for SimpleCounter {
    fn inc_ref(&self) -> usize {
        let count = self
            .count
            .get()
            .checked_add(1)
            .expect("reference count overflow - more handles than addressable memory");
        self.count.set(count);
        count
    }

    fn dec_ref(&self) -> usize {
        let count = self
            .count
            .get()
            .checked_sub(1)
            .expect("reference count underflow - handle bookkeeping is broken");
        self.count.set(count);
        count
    }

    fn ref_count(&self) -> usize {
        self.count.get()
    }
}

/// An object that carries its own reference count, for use with
/// [`IntrusivePtr`][crate::IntrusivePtr].
///
/// The object is both the payload and the count holder: no control block is involved and weak
/// observation is not supported. When the count drops to zero, the object is released by its
/// [`Deleter`][Self::Deleter].
///
/// # Safety
///
/// Implementors must guarantee that [`counter()`][Self::counter] returns the same counter,
/// stored inside the object, every time it is called on the same object, and that nothing
/// other than the provided methods modifies that counter.
///
/// # Example
///
/// ```rust
/// use counted_ptr::{DefaultDelete, IntrusivePtr, RefCounted, SimpleCounter};
///
/// #[derive(Default)]
/// struct Node {
///     refs: SimpleCounter,
///     value: u32,
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
/// let node = IntrusivePtr::make(Node {
///     value: 42,
///     ..Node::default()
/// });
///
/// assert_eq!(node.value, 42);
/// assert_eq!(node.use_count(), 1);
/// ```
pub unsafe trait RefCounted {
    /// The type of the embedded counter.
    type Counter: Counter;

    /// Releases the object once the count reaches zero.
    type Deleter: Deleter<Self> + Default;

    /// Returns the counter embedded in the object.
    fn counter(&self) -> &Self::Counter;

    /// Adds one reference.
    fn inc_ref(&self) {
        self.counter().inc_ref();
    }

    /// Returns the current number of references.
    fn ref_count(&self) -> usize {
        self.counter().ref_count()
    }

    /// Removes one reference, releasing the object if it was the last one.
    ///
    /// An object whose count is already zero (i.e. one that was never referenced) is released
    /// immediately.
    ///
    /// # Safety
    ///
    /// The caller must own one reference to the object (or hold the only pointer to an object
    /// with a zero count) and must not use the pointer after this call unless it owns another
    /// reference.
    unsafe fn dec_ref(this: NonNull<Self>) {
        // SAFETY: The caller guarantees the object is alive.
        let counter = unsafe { this.as_ref() }.counter();

        if counter.ref_count() == 0 || counter.dec_ref() == 0 {
            // SAFETY: Nothing references the object any more and the deleter is the one the
            // type declares for releasing it.
            unsafe {
                Self::Deleter::default().delete(this);
            }
        }
    }
}

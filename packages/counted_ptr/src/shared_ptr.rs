use std::any::type_name;
use std::borrow::Borrow;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::NonNull;

use tracing::trace;

use crate::control_block::{BlockRef, ControlBlock, EmbeddedBlock, SeparateBlock};
use crate::{
    BlockShape, DanglingObserver, DefaultDelete, Deleter, SelfReferencing, UniquePtr, WeakPtr,
};

/// A strong, single-threaded reference-counting handle to an object managed by a control block.
///
/// The object is destroyed when the last `SharedPtr` sharing its control block is dropped.
/// [`WeakPtr`] handles may keep observing the control block after that, which is why the
/// counters live in a control block instead of in the object itself.
///
/// Two control block shapes exist (see [`BlockShape`]):
///
/// * [`new()`][Self::new] and [`new_with()`][Self::new_with] construct the object inside the
///   control block, using a single allocation.
/// * [`from_box()`][Self::from_box], [`from_raw()`][Self::from_raw] and conversion from a
///   [`UniquePtr`] take over an object that already exists in its own allocation.
///
/// Both shapes behave identically as far as counting, expiration and locking are concerned.
///
/// A handle may also be empty, in which case it references nothing. Dereferencing an empty
/// handle panics; use [`get()`][Self::get] for fallible access.
///
/// # Example
///
/// ```rust
/// use counted_ptr::SharedPtr;
///
/// let first = SharedPtr::new("hello".to_string());
/// let second = first.clone();
///
/// assert_eq!(first.use_count(), 2);
/// assert_eq!(second.len(), 5);
///
/// drop(first);
/// assert_eq!(second.use_count(), 1);
/// assert_eq!(*second, "hello");
/// ```
///
/// # Thread safety
///
/// This type is single-threaded. The counters are not atomic.
pub struct SharedPtr<T: ?Sized> {
    raw: Option<BlockRef<T>>,

    // We (may) drop a `T` when we are dropped.
    _owns: PhantomData<T>,
}

impl<T> SharedPtr<T> {
    /// Creates a handle to a new object stored in the control block itself.
    ///
    /// Object and counters share a single allocation.
    ///
    /// The self-reference slot of a [`SelfReferencing`] object is left empty by this
    /// constructor. Use [`new_self_referencing()`][Self::new_self_referencing] for such types.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::new_with(|| value)
    }

    /// Creates a handle to a new object constructed by `init` directly in the control block.
    ///
    /// If `init` panics, nothing is allocated by the time the panic propagates.
    ///
    /// # Example
    ///
    /// ```rust
    /// use counted_ptr::SharedPtr;
    ///
    /// let numbers = SharedPtr::new_with(|| (1..=4).collect::<Vec<u32>>());
    ///
    /// assert_eq!(numbers.iter().sum::<u32>(), 10);
    /// ```
    #[must_use]
    pub fn new_with<F>(init: F) -> Self
    where
        F: FnOnce() -> T,
    {
        let (block, ptr) = EmbeddedBlock::allocate_with(init);

        Self::from_block_ref(BlockRef { ptr, block })
    }
}

impl<T: SelfReferencing> SharedPtr<T> {
    /// Creates a handle to a new self-referencing object stored in the control block itself.
    ///
    /// The self-reference slot of the object is primed with the new control block, so the
    /// object can hand out handles to itself via [`SelfReferencing::shared_from_this()`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use counted_ptr::{SelfReferencing, SelfSlot, SharedPtr};
    ///
    /// #[derive(Debug, Default)]
    /// struct Node {
    ///     slot: SelfSlot<Node>,
    /// }
    ///
    /// impl SelfReferencing for Node {
    ///     fn self_slot(&self) -> &SelfSlot<Self> {
    ///         &self.slot
    ///     }
    /// }
    ///
    /// let node = SharedPtr::new_self_referencing(Node::default());
    /// let again = node.shared_from_this();
    ///
    /// assert!(node.ptr_eq(&again));
    /// assert_eq!(node.use_count(), 2);
    /// ```
    #[must_use]
    pub fn new_self_referencing(value: T) -> Self {
        let this = Self::new(value);
        this.prime_self_slot();
        this
    }

    /// Takes ownership of a boxed self-referencing object, priming its self-reference slot.
    ///
    /// The object keeps its own allocation; a separate control block is allocated for it.
    #[must_use]
    pub fn from_box_self_referencing(value: Box<T>) -> Self {
        let this = Self::from_box(value);
        this.prime_self_slot();
        this
    }

    fn prime_self_slot(&self) {
        let Some(raw) = self.raw else {
            return;
        };

        // SAFETY: We hold a strong unit, so the object is alive.
        let object = unsafe { raw.ptr.as_ref() };

        if object.self_slot().prime(self) {
            raw.header().mark_self_slot_primed();
        }
    }
}

impl<T: ?Sized> SharedPtr<T> {
    /// Takes ownership of a boxed object.
    ///
    /// The object keeps its own allocation; a separate control block is allocated for it.
    /// The object is released via [`DefaultDelete`] when the last strong handle is dropped.
    ///
    /// The self-reference slot of a [`SelfReferencing`] object is left empty by this
    /// constructor. Use [`from_box_self_referencing()`][Self::from_box_self_referencing] for
    /// such types.
    #[must_use]
    pub fn from_box(value: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(value));

        // SAFETY: The pointer came from a `Box` and we have taken over its ownership.
        unsafe { Self::from_raw_with_deleter(ptr.as_ptr(), DefaultDelete) }
    }

    /// Takes ownership of an object via a raw pointer obtained from [`Box::into_raw()`].
    ///
    /// A null pointer results in an empty handle.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the pointer is either null or was obtained from
    /// [`Box::into_raw()`] and is not owned by anything else (in particular, that no other
    /// control block has been created for it).
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { Self::from_raw_with_deleter(ptr, DefaultDelete) }
    }

    /// Takes ownership of an object via a raw pointer, releasing it with `deleter` when the
    /// last strong handle is dropped.
    ///
    /// A null pointer results in an empty handle and the deleter is dropped without being used.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the pointer is either null or points to a live object that
    /// `deleter` is able to release, and that the object is not owned by anything else (in
    /// particular, that no other control block has been created for it).
    #[must_use]
    pub unsafe fn from_raw_with_deleter<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: Deleter<T> + 'static,
    {
        let Some(ptr) = NonNull::new(ptr) else {
            return Self::default();
        };

        // SAFETY: Forwarding guarantees from the caller.
        let block = unsafe { SeparateBlock::allocate(ptr, deleter) };

        Self::from_block_ref(BlockRef { ptr, block })
    }

    /// Creates a handle that exposes `ptr` while sharing ownership of the object managed by
    /// `owner`.
    ///
    /// This is typically used to hand out a handle to a part of a managed object, keeping the
    /// whole object alive for as long as the part is referenced. If `owner` is empty, the result
    /// is empty as well.
    ///
    /// See [`project()`][Self::project] for a safe alternative.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` remains valid for shared access for as long as the
    /// object managed by `owner` is alive.
    #[must_use]
    pub unsafe fn aliasing<U: ?Sized>(owner: &SharedPtr<U>, ptr: NonNull<T>) -> Self {
        let Some(owner_raw) = owner.raw else {
            return Self::default();
        };

        owner_raw.header().strong_increment();

        Self::from_block_ref(BlockRef {
            ptr,
            block: owner_raw.block,
        })
    }

    /// Creates a handle to a part of the object (or to the object viewed as a different type,
    /// such as a trait object), sharing ownership with `self`.
    ///
    /// The returned handle keeps the whole object alive. If `self` is empty, the result is
    /// empty as well.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::fmt::Display;
    ///
    /// use counted_ptr::SharedPtr;
    ///
    /// struct Pair {
    ///     name: String,
    ///     value: u32,
    /// }
    ///
    /// let pair = SharedPtr::new(Pair {
    ///     name: "answer".to_string(),
    ///     value: 42,
    /// });
    ///
    /// let name = pair.project(|p| &p.name);
    /// let value = pair.project(|p| &p.value as &dyn Display);
    /// drop(pair);
    ///
    /// assert_eq!(*name, "answer");
    /// assert_eq!(value.to_string(), "42");
    /// assert_eq!(name.use_count(), 2);
    /// ```
    #[must_use]
    pub fn project<U: ?Sized, F>(&self, f: F) -> SharedPtr<U>
    where
        F: FnOnce(&T) -> &U,
        T: 'static,
    {
        let Some(object) = self.get() else {
            return SharedPtr::default();
        };

        let part = NonNull::from(f(object));

        // SAFETY: The closure received a reference tied to the object, so the reference it
        // returned is valid for as long as the object is alive (the object is `'static` so it
        // cannot borrow anything shorter-lived that the part might point into).
        unsafe { SharedPtr::aliasing(self, part) }
    }

    /// Creates a strong handle from a weak one.
    ///
    /// # Errors
    ///
    /// Returns [`DanglingObserver`] if the weak handle is empty or its object has expired.
    /// Use [`WeakPtr::lock()`] if an empty handle is an acceptable outcome instead.
    ///
    /// # Example
    ///
    /// ```rust
    /// use counted_ptr::{SharedPtr, WeakPtr};
    ///
    /// let strong = SharedPtr::new(42_u32);
    /// let weak = WeakPtr::new(&strong);
    ///
    /// let upgraded = SharedPtr::from_weak(&weak).unwrap();
    /// assert_eq!(*upgraded, 42);
    ///
    /// drop(strong);
    /// drop(upgraded);
    /// assert!(SharedPtr::from_weak(&weak).is_err());
    /// ```
    pub fn from_weak(weak: &WeakPtr<T>) -> Result<Self, DanglingObserver> {
        let locked = weak.lock();

        if locked.is_empty() {
            trace!("refusing to create strong handle from expired observer");
            return Err(DanglingObserver);
        }

        Ok(locked)
    }

    /// Wraps a block reference for which the caller has already accounted one strong unit.
    pub(crate) fn from_block_ref(raw: BlockRef<T>) -> Self {
        Self {
            raw: Some(raw),
            _owns: PhantomData,
        }
    }

    pub(crate) fn block_ref(&self) -> Option<BlockRef<T>> {
        self.raw
    }

    /// Returns a reference to the object, or `None` if the handle is empty or the object has
    /// expired.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: We hold a strong unit and the object has not expired, so it is alive.
        // Handles only ever grant shared access to the object.
        self.ptr().map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Returns a pointer to the object, or `None` if the handle is empty or the object has
    /// expired.
    ///
    /// For aliasing handles, this is the pointer the handle was created with, not the pointer to
    /// the object whose lifetime it shares.
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> Option<NonNull<T>> {
        self.raw
            .filter(|raw| !raw.header().is_expired())
            .map(|raw| raw.ptr)
    }

    /// Returns the number of strong handles sharing the control block, or 0 if the handle is
    /// empty.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().strong_count())
    }

    /// Returns the number of weak handles observing the control block, or 0 if the handle is
    /// empty.
    ///
    /// The internal self-reference of a [`SelfReferencing`] object is not included.
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().observer_count())
    }

    /// Returns the shape of the control block, or `None` if the handle is empty.
    #[must_use]
    pub fn block_shape(&self) -> Option<BlockShape> {
        self.raw.map(|raw| raw.header().shape())
    }

    /// Whether the handle references nothing.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Creates a weak handle observing the same object.
    #[must_use]
    pub fn downgrade(&self) -> WeakPtr<T> {
        WeakPtr::new(self)
    }

    /// Releases the strong unit held by this handle, leaving the handle empty.
    ///
    /// If this was the last strong handle, the object is destroyed.
    pub fn reset(&mut self) {
        drop(self.take());
    }

    /// Moves the contents out of this handle, leaving it empty.
    ///
    /// The counts are unchanged - ownership is transferred to the returned handle.
    #[must_use]
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Exchanges the contents of two handles without touching any counts.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.raw, &mut other.raw);
    }

    /// Whether both handles expose the same address. Two empty handles are equal.
    #[must_use]
    pub fn ptr_eq<U: ?Sized>(&self, other: &SharedPtr<U>) -> bool {
        self.ptr().map(NonNull::cast::<()>) == other.ptr().map(NonNull::cast::<()>)
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    /// Creates an empty handle.
    fn default() -> Self {
        Self {
            raw: None,
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    /// Creates another strong handle to the same object, incrementing the strong count.
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            raw.header().strong_increment();
        }

        Self {
            raw: self.raw,
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            // SAFETY: We own one strong unit of the block and forget the block pointer here.
            unsafe {
                ControlBlock::strong_decrement(raw.block);
            }
        }
    }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Cargo-mutants does not understand this signature - every mutation is unviable waste of time.
    fn deref(&self) -> &Self::Target {
        self.get().expect("dereferenced an empty SharedPtr")
    }
}

impl<T: ?Sized> Borrow<T> for SharedPtr<T> {
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Cargo-mutants does not understand this signature - every mutation is unviable waste of time.
    fn borrow(&self) -> &T {
        self
    }
}

impl<T: ?Sized> AsRef<T> for SharedPtr<T> {
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Cargo-mutants does not understand this signature - every mutation is unviable waste of time.
    fn as_ref(&self) -> &T {
        self
    }
}

/// Handles are equal if they expose the same address, regardless of the values stored there.
impl<T: ?Sized, U: ?Sized> PartialEq<SharedPtr<U>> for SharedPtr<T> {
    fn eq(&self, other: &SharedPtr<U>) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: ?Sized> Eq for SharedPtr<T> {}

impl<T: ?Sized> From<Box<T>> for SharedPtr<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized, D> From<UniquePtr<T, D>> for SharedPtr<T>
where
    D: Deleter<T> + 'static,
{
    /// Transfers the object and the deleter of a unique pointer into a new separate-shape
    /// control block.
    fn from(value: UniquePtr<T, D>) -> Self {
        let (ptr, deleter) = value.into_parts();

        let Some(ptr) = ptr else {
            return Self::default();
        };

        // SAFETY: The unique pointer owned the object exclusively and `deleter` is the deleter
        // it would have used to release it.
        unsafe { Self::from_raw_with_deleter(ptr.as_ptr(), deleter) }
    }
}

impl<T: ?Sized> TryFrom<&WeakPtr<T>> for SharedPtr<T> {
    type Error = DanglingObserver;

    fn try_from(value: &WeakPtr<T>) -> Result<Self, Self::Error> {
        Self::from_weak(value)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T: ?Sized> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("raw", &self.raw)
            .finish()
    }
}

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use tracing::trace;

use crate::Deleter;

/// Describes how the control block of a [`SharedPtr`][crate::SharedPtr] relates to the object
/// it manages.
///
/// The shape is selected by the constructor used to create the first strong handle and never
/// changes for the lifetime of the block. Both shapes behave identically as far as counting,
/// expiration and locking are concerned.
///
/// # Example
///
/// ```rust
/// use counted_ptr::{BlockShape, SharedPtr};
///
/// let embedded = SharedPtr::new(42_u32);
/// assert_eq!(embedded.block_shape(), Some(BlockShape::Embedded));
///
/// let separate = SharedPtr::from_box(Box::new(42_u32));
/// assert_eq!(separate.block_shape(), Some(BlockShape::Separate));
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum BlockShape {
    /// The object lives in its own allocation, released by a [`Deleter`] when the object is
    /// destroyed. The control block is a second, independent allocation.
    Separate,

    /// The object is stored inside the control block, so object and counters share a single
    /// allocation. Destroying the object only runs its destructor in place; the memory is
    /// released together with the block.
    Embedded,
}

/// The counters shared by all handles to one managed object.
///
/// This is the common header of every control block shape. Handles only ever see the header,
/// via a type-erased pointer, which allows aliasing handles of a different type to share the
/// block. The shape-specific behavior (how to destroy the object, how to release the block)
/// is reached through the function pointers captured when the block was created.
pub(crate) struct ControlBlock {
    strong: Cell<usize>,

    /// Includes the self-reference slot of the managed object, if one was primed, and a
    /// temporary unit held by the strong side while the object is being destroyed.
    weak: Cell<usize>,

    /// Set before the object's destructor starts. Never cleared.
    expired: Cell<bool>,

    /// Whether one unit of `weak` belongs to a primed self-reference slot that has not yet
    /// been released. Such a unit is not reported as an observer.
    self_slot_primed: Cell<bool>,

    /// Whether one unit of `weak` is the temporary unit held while the object is being
    /// destroyed. Such a unit is not reported as an observer.
    destroying: Cell<bool>,

    shape: BlockShape,

    destroy_object_fn: unsafe fn(NonNull<ControlBlock>),
    free_block_fn: unsafe fn(NonNull<ControlBlock>),
}

impl ControlBlock {
    fn new(
        shape: BlockShape,
        destroy_object_fn: unsafe fn(NonNull<Self>),
        free_block_fn: unsafe fn(NonNull<Self>),
    ) -> Self {
        Self {
            strong: Cell::new(1),
            weak: Cell::new(0),
            expired: Cell::new(false),
            self_slot_primed: Cell::new(false),
            destroying: Cell::new(false),
            shape,
            destroy_object_fn,
            free_block_fn,
        }
    }

    pub(crate) fn strong_increment(&self) {
        debug_assert!(
            !self.expired.get(),
            "strong handles cannot be added to an expired control block"
        );

        self.strong.set(
            self.strong
                .get()
                .checked_add(1)
                .expect("strong count overflow - more handles than addressable memory"),
        );
    }

    /// Releases one unit of strong ownership.
    ///
    /// If this was the last unit, the object is destroyed and, unless weak handles still
    /// observe the block, the block is freed.
    ///
    /// # Safety
    ///
    /// The caller must own one unit of strong ownership of a live block and must not use the
    /// block pointer after this call (unless it also owns another unit).
    pub(crate) unsafe fn strong_decrement(this: NonNull<Self>) {
        // SAFETY: The caller guarantees the block is alive.
        let block = unsafe { this.as_ref() };

        let remaining = block
            .strong
            .get()
            .checked_sub(1)
            .expect("strong count underflow - handle bookkeeping is broken");
        block.strong.set(remaining);

        if remaining != 0 {
            return;
        }

        // The destructor of the object may release weak handles to this same block (its own
        // self-reference slot included). We hold a temporary weak unit until the destructor
        // has returned so that none of those releases can free the block underneath us.
        block.weak_increment();
        block.destroying.set(true);
        block.expired.set(true);

        trace!(shape = ?block.shape, "destroying managed object");

        // SAFETY: The strong count reached zero, so nobody else may access the object any more
        // and this is the only time we destroy it. The block is kept alive by our weak unit.
        unsafe {
            (block.destroy_object_fn)(this);
        }

        block.destroying.set(false);

        // SAFETY: We own the temporary weak unit taken above.
        unsafe {
            Self::weak_decrement(this);
        }
    }

    pub(crate) fn weak_increment(&self) {
        self.weak.set(
            self.weak
                .get()
                .checked_add(1)
                .expect("weak count overflow - more handles than addressable memory"),
        );
    }

    /// Releases one unit of weak ownership, freeing the block if nothing references it any more.
    ///
    /// # Safety
    ///
    /// The caller must own one unit of weak ownership of a live block and must not use the
    /// block pointer after this call (unless it also owns another unit).
    pub(crate) unsafe fn weak_decrement(this: NonNull<Self>) {
        // SAFETY: The caller guarantees the block is alive.
        let block = unsafe { this.as_ref() };

        let remaining = block
            .weak
            .get()
            .checked_sub(1)
            .expect("weak count underflow - handle bookkeeping is broken");
        block.weak.set(remaining);

        if remaining == 0 && block.strong.get() == 0 {
            trace!(shape = ?block.shape, "freeing control block");

            // SAFETY: Both counts are zero, so no handle references the block any more.
            // The object was already destroyed when the strong count reached zero.
            unsafe {
                (block.free_block_fn)(this);
            }
        }
    }

    /// Releases the weak unit held by the self-reference slot of the managed object without
    /// considering whether the block should be freed.
    ///
    /// Only valid while the object is being destroyed by [`strong_decrement()`], which keeps
    /// the block alive and takes care of freeing it afterwards.
    ///
    /// [`strong_decrement()`]: Self::strong_decrement
    pub(crate) fn weak_decrement_counter_only(&self) {
        debug_assert_eq!(
            self.strong.get(),
            0,
            "counter-only weak release is only valid during object destruction"
        );

        self.weak.set(
            self.weak
                .get()
                .checked_sub(1)
                .expect("weak count underflow - handle bookkeeping is broken"),
        );
        self.self_slot_primed.set(false);
    }

    /// Records that one weak unit now belongs to the self-reference slot of the object.
    pub(crate) fn mark_self_slot_primed(&self) {
        self.self_slot_primed.set(true);
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.expired.get()
    }

    pub(crate) fn strong_count(&self) -> usize {
        self.strong.get()
    }

    /// The raw weak counter, including any internal units.
    #[cfg(test)]
    pub(crate) fn weak_count(&self) -> usize {
        self.weak.get()
    }

    /// The number of weak handles held by users, excluding the self-reference slot and the
    /// unit held while the object is being destroyed.
    pub(crate) fn observer_count(&self) -> usize {
        let internal = usize::from(self.self_slot_primed.get())
            .wrapping_add(usize::from(self.destroying.get()));

        self.weak.get().saturating_sub(internal)
    }

    pub(crate) fn shape(&self) -> BlockShape {
        self.shape
    }
}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("strong", &self.strong.get())
            .field("weak", &self.weak.get())
            .field("expired", &self.expired.get())
            .field("self_slot_primed", &self.self_slot_primed.get())
            .field("destroying", &self.destroying.get())
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// A pointer to a managed object (or to a part of it) paired with the block that manages it.
///
/// Only stored inside handles that own one strong or weak unit of the block, which is what keeps
/// the block alive for as long as the `BlockRef` exists.
pub(crate) struct BlockRef<T: ?Sized> {
    pub(crate) ptr: NonNull<T>,
    pub(crate) block: NonNull<ControlBlock>,
}

impl<T: ?Sized> BlockRef<T> {
    pub(crate) fn header(&self) -> &ControlBlock {
        // SAFETY: The handle holding this `BlockRef` owns a unit of the block, keeping it alive.
        unsafe { self.block.as_ref() }
    }
}

impl<T: ?Sized> Clone for BlockRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for BlockRef<T> {}

#[cfg_attr(coverage_nightly, coverage(off))] // No API contract to test.
impl<T: ?Sized> fmt::Debug for BlockRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRef")
            .field("ptr", &self.ptr)
            .field("block", self.header())
            .finish()
    }
}

/// Control block that owns an object living in a separate allocation.
///
/// The header must be the first field so a pointer to the block is also a pointer to the header.
#[repr(C)]
pub(crate) struct SeparateBlock<T: ?Sized, D: Deleter<T>> {
    header: ControlBlock,
    object: NonNull<T>,
    deleter: D,
}

impl<T: ?Sized, D: Deleter<T>> SeparateBlock<T, D> {
    /// Allocates a block with a strong count of 1 that takes ownership of `object`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `deleter` is able to release `object` and that nothing
    /// else owns or releases the object.
    #[must_use]
    pub(crate) unsafe fn allocate(object: NonNull<T>, deleter: D) -> NonNull<ControlBlock> {
        let block = Box::new(Self {
            header: ControlBlock::new(
                BlockShape::Separate,
                Self::destroy_object,
                Self::free_block,
            ),
            object,
            deleter,
        });

        NonNull::from(Box::leak(block)).cast()
    }

    unsafe fn destroy_object(header: NonNull<ControlBlock>) {
        let block = header.cast::<Self>().as_ptr();

        // SAFETY: The header is the first field of a live `Self` (see `allocate()`).
        let object = unsafe { (*block).object };

        // SAFETY: As above. Only the control block ever touches the deleter.
        let deleter = unsafe { &mut *ptr::addr_of_mut!((*block).deleter) };

        // SAFETY: `allocate()` requires the deleter to be able to release this object and the
        // control block calls us exactly once.
        unsafe {
            deleter.delete(object);
        }
    }

    unsafe fn free_block(header: NonNull<ControlBlock>) {
        // SAFETY: The block was created via `Box` in `allocate()` and this is the last reference.
        drop(unsafe { Box::from_raw(header.cast::<Self>().as_ptr()) });
    }
}

/// Control block that stores the object inline, sharing one allocation with the counters.
///
/// The header must be the first field so a pointer to the block is also a pointer to the header.
#[repr(C)]
pub(crate) struct EmbeddedBlock<T> {
    header: ControlBlock,
    storage: UnsafeCell<MaybeUninit<T>>,
}

impl<T> EmbeddedBlock<T> {
    /// Allocates a block with a strong count of 1 and constructs the object inside it.
    ///
    /// Returns the block and a pointer to the object stored in it. If `init` panics, the
    /// allocation is released and no block is created.
    #[must_use]
    pub(crate) fn allocate_with<F>(init: F) -> (NonNull<ControlBlock>, NonNull<T>)
    where
        F: FnOnce() -> T,
    {
        let mut place = Box::<Self>::new_uninit();
        let block = place.as_mut_ptr();

        // SAFETY: We are writing to fields of an allocation sized and aligned for `Self`.
        // `UnsafeCell` and `MaybeUninit` are transparent, so the storage is a valid `T` place.
        unsafe {
            ptr::addr_of_mut!((*block).storage).cast::<T>().write(init());
        }

        // SAFETY: As above. The header is written only after the object has been constructed,
        // so a panicking constructor leaves nothing behind except the uninitialized allocation.
        unsafe {
            ptr::addr_of_mut!((*block).header).write(ControlBlock::new(
                BlockShape::Embedded,
                Self::destroy_object,
                Self::free_block,
            ));
        }

        // SAFETY: Every field has been initialized above.
        let block = NonNull::from(Box::leak(unsafe { place.assume_init() }));

        (block.cast(), Self::object_ptr(block))
    }

    fn object_ptr(block: NonNull<Self>) -> NonNull<T> {
        // SAFETY: We are only computing a field address within a live block, never reading.
        let storage = unsafe { ptr::addr_of!((*block.as_ptr()).storage) };

        // SAFETY: Field of a non-null pointer is non-null.
        unsafe { NonNull::new_unchecked(UnsafeCell::raw_get(storage).cast::<T>()) }
    }

    unsafe fn destroy_object(header: NonNull<ControlBlock>) {
        let object = Self::object_ptr(header.cast::<Self>());

        // SAFETY: The object was constructed in `allocate_with()` and the control block calls
        // us exactly once. The storage itself stays allocated until the block is freed.
        unsafe {
            ptr::drop_in_place(object.as_ptr());
        }
    }

    unsafe fn free_block(header: NonNull<ControlBlock>) {
        // SAFETY: The block was created via `Box` in `allocate_with()` and this is the last
        // reference. Dropping a `MaybeUninit` does not touch the (already destroyed) object.
        drop(unsafe { Box::from_raw(header.cast::<Self>().as_ptr()) });
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::DefaultDelete;

    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn separate(drops: &Rc<Cell<usize>>) -> NonNull<ControlBlock> {
        let object = NonNull::from(Box::leak(Box::new(DropCounter(Rc::clone(drops)))));

        // SAFETY: The object came from a `Box` and is owned only by the block.
        unsafe { SeparateBlock::allocate(object, DefaultDelete) }
    }

    fn embedded(drops: &Rc<Cell<usize>>) -> NonNull<ControlBlock> {
        let drops = Rc::clone(drops);
        EmbeddedBlock::allocate_with(move || DropCounter(drops)).0
    }

    fn check_new_block(block: NonNull<ControlBlock>, shape: BlockShape) {
        // SAFETY: The block is alive until the strong decrement at the end.
        let header = unsafe { block.as_ref() };

        assert_eq!(header.strong_count(), 1);
        assert_eq!(header.weak_count(), 0);
        assert!(!header.is_expired());
        assert_eq!(header.shape(), shape);

        // SAFETY: We own the initial strong unit.
        unsafe { ControlBlock::strong_decrement(block) };
    }

    #[test]
    fn new_blocks_start_with_one_strong_unit() {
        let drops = Rc::new(Cell::new(0));

        check_new_block(separate(&drops), BlockShape::Separate);
        check_new_block(embedded(&drops), BlockShape::Embedded);

        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn last_strong_release_destroys_object_once() {
        for make in [separate, embedded] {
            let drops = Rc::new(Cell::new(0));
            let block = make(&drops);

            // SAFETY: The block is alive while we hold strong units.
            unsafe { block.as_ref() }.strong_increment();

            // SAFETY: We own two strong units.
            unsafe { ControlBlock::strong_decrement(block) };
            assert_eq!(drops.get(), 0);

            // SAFETY: We own the remaining strong unit.
            unsafe { ControlBlock::strong_decrement(block) };
            assert_eq!(drops.get(), 1);
        }
    }

    #[test]
    fn weak_unit_keeps_block_after_expiration() {
        for make in [separate, embedded] {
            let drops = Rc::new(Cell::new(0));
            let block = make(&drops);

            // SAFETY: The block is alive while we hold any unit.
            unsafe { block.as_ref() }.weak_increment();

            // SAFETY: We own the strong unit and keep a weak unit.
            unsafe { ControlBlock::strong_decrement(block) };

            assert_eq!(drops.get(), 1);

            // SAFETY: The weak unit keeps the block alive.
            let header = unsafe { block.as_ref() };
            assert!(header.is_expired());
            assert_eq!(header.strong_count(), 0);
            assert_eq!(header.weak_count(), 1);

            // SAFETY: We own the last weak unit; the block is freed here.
            unsafe { ControlBlock::weak_decrement(block) };
        }
    }

    #[test]
    fn weak_release_before_strong_release_does_not_free() {
        let drops = Rc::new(Cell::new(0));
        let block = embedded(&drops);

        // SAFETY: The block is alive while we hold any unit.
        unsafe { block.as_ref() }.weak_increment();

        // SAFETY: We own one weak unit; the strong unit keeps the block alive.
        unsafe { ControlBlock::weak_decrement(block) };

        // SAFETY: The strong unit still keeps the block alive.
        let header = unsafe { block.as_ref() };
        assert!(!header.is_expired());
        assert_eq!(header.weak_count(), 0);

        // SAFETY: We own the strong unit.
        unsafe { ControlBlock::strong_decrement(block) };
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn observer_count_excludes_primed_self_slot() {
        let drops = Rc::new(Cell::new(0));
        let block = embedded(&drops);

        // SAFETY: The block is alive while we hold the strong unit.
        let header = unsafe { block.as_ref() };
        header.weak_increment();
        header.mark_self_slot_primed();
        header.weak_increment();

        assert_eq!(header.weak_count(), 2);
        assert_eq!(header.observer_count(), 1);

        // SAFETY: We own the strong unit. The weak units keep the block alive.
        unsafe { ControlBlock::strong_decrement(block) };
        assert_eq!(drops.get(), 1);

        // SAFETY: We own both weak units; the block is freed by the second release.
        unsafe {
            ControlBlock::weak_decrement(block);
            ControlBlock::weak_decrement(block);
        }
    }

    #[test]
    #[should_panic(expected = "constructor failed")]
    fn panicking_initializer_creates_no_block() {
        let _block = EmbeddedBlock::<u32>::allocate_with(|| panic!("constructor failed"));
    }
}

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Single-threaded smart pointers with shared, weak, intrusive and unique ownership.
//!
//! This crate provides four handle types for managing the lifetime of heap objects:
//!
//! - [`SharedPtr<T>`] - a strong handle. The object is destroyed when the last strong handle
//!   goes away.
//! - [`WeakPtr<T>`] - an observer that does not keep the object alive but can detect that it
//!   has expired and can be upgraded to a strong handle while the object still exists.
//! - [`IntrusivePtr<T>`] - a strong handle to an object that carries its own reference count
//!   (see [`RefCounted`]).
//! - [`UniquePtr<T, D>`] - a single-owner handle that releases its object via a [`Deleter`].
//!
//! # Control blocks
//!
//! Shared and weak handles coordinate through a control block that holds a strong count
//! and a weak count. The block comes in one of two [`BlockShape`]s:
//!
//! - [`BlockShape::Embedded`] - the object lives inside the block, produced by one allocation
//!   via [`SharedPtr::new()`].
//! - [`BlockShape::Separate`] - the object lives in its own allocation and the block points to
//!   it, produced when taking over an existing object via [`SharedPtr::from_box()`],
//!   [`SharedPtr::from_raw_with_deleter()`] or a [`UniquePtr`].
//!
//! The object is destroyed when the strong count reaches zero. The block itself is released
//! when both counts reach zero, so weak handles can still report that the object has expired
//! after it is gone.
//!
//! # Self-referencing objects
//!
//! An object that implements [`SelfReferencing`] can obtain strong and weak handles to itself
//! via [`SelfReferencing::shared_from_this()`] once it is placed under management through
//! [`SharedPtr::new_self_referencing()`] or [`SharedPtr::from_box_self_referencing()`].
//!
//! # Example
//!
//! ```rust
//! use counted_ptr::{BlockShape, SharedPtr};
//!
//! let mut first = SharedPtr::new(String::from("hello"));
//! let second = first.clone();
//! let observer = first.downgrade();
//!
//! assert_eq!(first.use_count(), 2);
//! assert_eq!(first.block_shape(), Some(BlockShape::Embedded));
//!
//! first.reset();
//! assert_eq!(*observer.lock(), "hello");
//!
//! drop(second);
//! assert!(observer.expired());
//! ```
//!
//! # Thread safety
//!
//! All types in this crate are single-threaded. Counters are plain cells and none of the
//! handles implement [`Send`] or [`Sync`].

mod control_block;
mod deleter;
mod error;
mod intrusive_ptr;
mod ref_counted;
mod self_referencing;
mod shared_ptr;
mod unique_ptr;
mod weak_ptr;

pub use control_block::BlockShape;
pub use deleter::*;
pub use error::*;
pub use intrusive_ptr::*;
pub use ref_counted::*;
pub use self_referencing::*;
pub use shared_ptr::*;
pub use unique_ptr::*;
pub use weak_ptr::*;

use thiserror::Error;

/// A strong handle was requested from a weak handle whose object has already been destroyed.
///
/// Returned by [`SharedPtr::from_weak()`][crate::SharedPtr::from_weak] and the equivalent
/// [`TryFrom`] conversion. Use [`WeakPtr::lock()`][crate::WeakPtr::lock] instead if an empty
/// handle is an acceptable outcome.
#[expect(clippy::exhaustive_structs, reason = "intentionally an empty struct")]
#[derive(Clone, Copy, Debug, Default, Eq, Error, PartialEq)]
#[error("the observed object has expired - cannot create a strong handle from a dangling observer")]
pub struct DanglingObserver;

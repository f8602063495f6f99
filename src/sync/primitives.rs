//! Atomics and cells used by the primitives in this module.
//!
//! With the `loom` feature enabled, tests build against loom's model-checked
//! versions so every interleaving of the protocols below can be explored.

#[cfg(all(test, feature = "loom"))]
pub(crate) use ::loom::{
    cell::UnsafeCell,
    hint,
    sync::atomic::{AtomicU8, Ordering},
    sync::Mutex,
    thread,
};

#[cfg(not(all(test, feature = "loom")))]
pub(crate) use std::{
    hint,
    sync::atomic::{AtomicU8, Ordering},
    sync::Mutex,
    thread,
};

/// `std::cell::UnsafeCell` behind the closure-based access API of loom's
/// cell, so both build from the same code.
#[cfg(not(all(test, feature = "loom")))]
pub(crate) struct UnsafeCell<T>(std::cell::UnsafeCell<T>);

#[cfg(not(all(test, feature = "loom")))]
impl<T> UnsafeCell<T> {
    pub(crate) fn new(data: T) -> Self {
        UnsafeCell(std::cell::UnsafeCell::new(data))
    }

    #[inline]
    pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
        f(self.0.get())
    }

    #[inline]
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        f(self.0.get())
    }
}

//! Capability token for the single active foreign-heap context.
//!
//! Every operation that touches the foreign heap takes a [`Gil`] argument.
//! The token cannot be sent across threads and cannot outlive the
//! [`GilGuard`] it was borrowed from, so holding one is a compile-time
//! visible precondition rather than an ambient assumption. Actual mutual
//! exclusion between threads is the embedding's job; the guard only tracks
//! how deeply the current thread has entered the foreign heap.

use std::{cell::Cell, marker::PhantomData};

thread_local! {
    static GIL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Proof that the current thread is the active foreign-heap context.
#[derive(Debug, Clone, Copy)]
pub struct Gil<'py> {
    _guard: PhantomData<&'py GilGuard>,
}

/// Scoped entry into the foreign heap. Reentrant on the same thread.
#[derive(Debug)]
pub struct GilGuard {
    _not_send: PhantomData<*mut ()>,
}

impl GilGuard {
    pub fn acquire() -> Self {
        GIL_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            _not_send: PhantomData,
        }
    }

    pub fn token(&self) -> Gil<'_> {
        Gil {
            _guard: PhantomData,
        }
    }
}

impl Drop for GilGuard {
    fn drop(&mut self) {
        GIL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

impl Gil<'_> {
    /// Runs `f` with a token, entering the foreign heap for its duration.
    pub fn with<R>(f: impl for<'py> FnOnce(Gil<'py>) -> R) -> R {
        let guard = GilGuard::acquire();
        f(guard.token())
    }

    /// Returns `true` while some guard is alive on this thread.
    pub fn is_held() -> bool {
        GIL_DEPTH.with(|depth| depth.get() > 0)
    }
}

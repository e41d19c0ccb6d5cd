//! Named mutex wrappers.
//!
//! Every mutex carries a name, so that `lock()` panics and debug output
//! can identify which lock misbehaved. This crate has no busy-wait
//! spinlocks — threads block on `std::sync::Mutex` instead — but keeps a
//! naming convention so the three mutex domains in the concurrency model
//! (pool, inode-table, super) are self-describing in logs and panics.

use std::sync::{Mutex, MutexGuard};

pub struct Named<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> Named<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: Mutex::new(data),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquires the lock, recovering from a poisoned mutex.
    ///
    /// A panic while holding one of the three lock domains already aborts
    /// the process per the error-handling design; poison recovery here only
    /// matters for the (rare) case of a panic unwinding through a
    /// `catch_unwind` boundary in an embedding daemon.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            log::error!("lock {} was poisoned, recovering", self.name);
            poisoned.into_inner()
        })
    }
}

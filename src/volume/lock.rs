//! Mount critical section guard
//!
//! A try-acquire flag rather than a blocking mutex: a caller that re-enters
//! mount or unmount while the section is held (for example from a callback
//! fired during device enumeration) gets `AlreadyHeld` instead of spinning
//! on itself.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// The critical section is already held
    AlreadyHeld,
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::AlreadyHeld => write!(f, "mount lock already held"),
        }
    }
}

/// Non-blocking, non-reentrant lock over the mount critical section
pub struct MountLock {
    held: AtomicBool,
}

impl MountLock {
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Enter the critical section without blocking
    ///
    /// The returned guard leaves the section when dropped.
    pub fn try_acquire(&self) -> Result<MountGuard<'_>, LockError> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| MountGuard { lock: self })
            .map_err(|_| LockError::AlreadyHeld)
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Default for MountLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of holding the mount lock
#[must_use = "the mount lock is released as soon as the guard is dropped"]
pub struct MountGuard<'a> {
    lock: &'a MountLock,
}

impl MountGuard<'_> {
    /// Leave the critical section now
    pub fn release(self) {
        drop(self);
    }

    pub(crate) fn is_for(&self, lock: &MountLock) -> bool {
        core::ptr::eq(self.lock, lock)
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

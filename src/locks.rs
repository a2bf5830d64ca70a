use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

/// A clonable mutual-exclusion handle serializing calls into the GRIB
/// decoding library.
///
/// The decode handle is not safe for concurrent use, so every data read
/// acquires a `StoreLock` first. Clones share the same underlying mutex;
/// by default all stores in the process share [`default_lock`], but a
/// caller may construct and inject a separate lock per store.
#[derive(Clone, Debug, Default)]
pub struct StoreLock(Arc<Mutex<()>>);

/// RAII guard returned by [`StoreLock::acquire`]. The lock is held until
/// the guard is dropped.
#[derive(Debug)]
pub struct StoreLockGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

impl StoreLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock is available. No timeout, no retry.
    pub fn acquire(&self) -> StoreLockGuard<'_> {
        StoreLockGuard(self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Non-blocking acquisition; returns `None` when another holder exists.
    pub fn try_acquire(&self) -> Option<StoreLockGuard<'_>> {
        match self.0.try_lock() {
            Ok(guard) => Some(StoreLockGuard(guard)),
            Err(std::sync::TryLockError::Poisoned(p)) => Some(StoreLockGuard(p.into_inner())),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    /// Whether two handles serialize through the same underlying mutex.
    pub fn shares_with(&self, other: &StoreLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

static GRIB_DECODE_LOCK: LazyLock<StoreLock> = LazyLock::new(StoreLock::new);

/// The process-wide default lock guarding GRIB decode calls.
pub fn default_lock() -> StoreLock {
    GRIB_DECODE_LOCK.clone()
}

/// Normalizes an optional caller-supplied lock to a usable handle.
pub fn ensure_lock(lock: Option<StoreLock>) -> StoreLock {
    lock.unwrap_or_else(default_lock)
}

//! Portable fallback on `parking_lot`'s word-sized mutex

use lock_api::RawMutex as _;

pub struct RawLock {
    inner: parking_lot::RawMutex,
}

impl RawLock {
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: <parking_lot::RawMutex as lock_api::RawMutex>::INIT,
        }
    }

    pub fn init(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn lock(&self) {
        self.inner.lock();
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        self.inner.try_lock()
    }

    /// # Safety
    /// The calling thread must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        self.inner.unlock();
    }
}

//! Windows slim reader/writer lock, used exclusively

use std::cell::UnsafeCell;
use winapi::um::synchapi::{
    AcquireSRWLockExclusive, InitializeSRWLock, ReleaseSRWLockExclusive,
    TryAcquireSRWLockExclusive, SRWLOCK, SRWLOCK_INIT,
};

pub struct RawLock {
    srw: UnsafeCell<SRWLOCK>,
}

// SAFETY: SRWLOCK is designed to be shared between threads
unsafe impl Send for RawLock {}
unsafe impl Sync for RawLock {}

impl RawLock {
    #[inline]
    pub const fn new() -> Self {
        Self {
            srw: UnsafeCell::new(SRWLOCK_INIT),
        }
    }

    pub fn init(&mut self) {
        // SAFETY: exclusive access, lock not held
        unsafe { InitializeSRWLock(self.srw.get_mut()) };
    }

    #[inline]
    pub fn lock(&self) {
        // SAFETY: the SRWLOCK lives as long as self
        unsafe { AcquireSRWLockExclusive(self.srw.get()) };
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        // SAFETY: as in `lock`
        unsafe { TryAcquireSRWLockExclusive(self.srw.get()) != 0 }
    }

    /// # Safety
    /// The calling thread must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        ReleaseSRWLockExclusive(self.srw.get());
    }
}

//! pthread mutex wrapper for Unix targets without a futex syscall
//!
//! A pthread mutex must not move once used, so it lives in a box that is
//! allocated on first use. Null is the "not yet initialised" state: locks
//! embedded in zeroed memory are valid and initialise themselves lazily.
//! Publication goes through a CAS, so racing first users agree on one box.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

pub struct RawLock {
    mutex: AtomicPtr<libc::pthread_mutex_t>,
}

impl RawLock {
    #[inline]
    pub const fn new() -> Self {
        Self {
            mutex: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Eagerly allocate the OS mutex; a no-op if already done
    pub fn init(&mut self) {
        if self.mutex.get_mut().is_null() {
            *self.mutex.get_mut() = Box::into_raw(Box::new(libc::PTHREAD_MUTEX_INITIALIZER));
        }
    }

    #[inline]
    fn raw(&self) -> *mut libc::pthread_mutex_t {
        let current = self.mutex.load(Ordering::Acquire);
        if current.is_null() {
            self.initialize()
        } else {
            current
        }
    }

    #[cold]
    fn initialize(&self) -> *mut libc::pthread_mutex_t {
        let fresh = Box::into_raw(Box::new(libc::PTHREAD_MUTEX_INITIALIZER));

        match self.mutex.compare_exchange(
            ptr::null_mut(),
            fresh,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => fresh,
            Err(winner) => {
                // SAFETY: `fresh` was never published
                drop(unsafe { Box::from_raw(fresh) });
                winner
            }
        }
    }

    #[inline]
    pub fn lock(&self) {
        // SAFETY: the box outlives every borrow of self
        let r = unsafe { libc::pthread_mutex_lock(self.raw()) };
        if r != 0 {
            super::report_failure("pthread_mutex_lock", r);
        }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        // SAFETY: as in `lock`
        unsafe { libc::pthread_mutex_trylock(self.raw()) == 0 }
    }

    /// # Safety
    /// The calling thread must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        let r = libc::pthread_mutex_unlock(self.raw());
        if r != 0 {
            super::report_failure("pthread_mutex_unlock", r);
        }
    }
}

impl Drop for RawLock {
    fn drop(&mut self) {
        let mutex = *self.mutex.get_mut();
        if !mutex.is_null() {
            // SAFETY: exclusive access, and the box came from Box::into_raw
            unsafe {
                libc::pthread_mutex_destroy(mutex);
                drop(Box::from_raw(mutex));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_initialization() {
        let lock = RawLock::new();
        assert!(lock.mutex.load(Ordering::Relaxed).is_null());

        lock.lock();
        assert!(!lock.mutex.load(Ordering::Relaxed).is_null());
        unsafe { lock.unlock() };
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut lock = RawLock::new();
        lock.init();
        let first = *lock.mutex.get_mut();
        lock.init();
        assert_eq!(first, *lock.mutex.get_mut());
    }

    #[test]
    fn test_try_lock() {
        let lock = RawLock::new();
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }
}

//! Futex lock - three-state word, no syscalls when uncontended
//!
//! States: `UNLOCKED` -> `LOCKED` by CAS on the fast path. A thread that
//! finds the lock taken swaps in `CONTENDED` and sleeps in the kernel while
//! the word still reads `CONTENDED`. Unlock decrements; anything other than
//! plain `LOCKED` before the decrement means sleepers, so the word is reset
//! and one of them is woken.

use std::ptr;
use std::sync::atomic::{
    AtomicU32,
    Ordering::{Acquire, Relaxed, Release},
};
use tracing::trace;

pub const UNLOCKED: u32 = 0;
pub const LOCKED: u32 = 1;
pub const CONTENDED: u32 = 2;

pub struct RawLock {
    state: AtomicU32,
}

impl RawLock {
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    #[inline]
    pub fn init(&mut self) {
        *self.state.get_mut() = UNLOCKED;
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn lock(&self) {
        if let Err(current) = self.state.compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed) {
            self.lock_contended(current);
        }
    }

    #[cold]
    fn lock_contended(&self, mut current: u32) {
        trace!(target: "lock", word = ?self.state.as_ptr(), "futex contended");

        if current != CONTENDED {
            current = self.state.swap(CONTENDED, Acquire);
        }

        // Re-validated after every wake, so spurious wakeups are harmless
        while current != UNLOCKED {
            futex_wait(&self.state, CONTENDED);
            current = self.state.swap(CONTENDED, Acquire);
        }
    }

    /// # Safety
    /// The calling thread must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        if self.state.fetch_sub(1, Release) != LOCKED {
            self.state.store(UNLOCKED, Release);
            futex_wake_one(&self.state);
        }
    }

    #[cfg(test)]
    fn state(&self) -> u32 {
        self.state.load(Relaxed)
    }
}

fn futex_wait(word: &AtomicU32, expected: u32) {
    // SAFETY: the pointer comes from a live AtomicU32; a null timeout waits forever
    let r = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            ptr::null::<libc::timespec>(),
        )
    };

    if r < 0 {
        match std::io::Error::last_os_error().raw_os_error() {
            // Value already changed, or interrupted: the caller re-checks
            Some(libc::EAGAIN) | Some(libc::EINTR) | None => {}
            Some(code) => super::report_failure("futex_wait", code),
        }
    }
}

fn futex_wake_one(word: &AtomicU32) {
    // SAFETY: the pointer comes from a live AtomicU32
    let r = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            1,
        )
    };

    if r < 0 {
        if let Some(code) = std::io::Error::last_os_error().raw_os_error() {
            super::report_failure("futex_wake", code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_uncontended_transitions() {
        let lock = RawLock::new();
        assert_eq!(lock.state(), UNLOCKED);

        lock.lock();
        assert_eq!(lock.state(), LOCKED);

        unsafe { lock.unlock() };
        assert_eq!(lock.state(), UNLOCKED);
    }

    #[test]
    fn test_try_lock_fails_when_held() {
        let lock = RawLock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        unsafe { lock.unlock() };
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    fn test_waiter_marks_contended() {
        let lock = Arc::new(RawLock::new());
        lock.lock();

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.lock();
                unsafe { lock.unlock() };
            })
        };

        // The waiter must publish CONTENDED before it sleeps
        let mut spins = 0;
        while lock.state() != CONTENDED && spins < 1000 {
            thread::sleep(Duration::from_millis(1));
            spins += 1;
        }
        assert_eq!(lock.state(), CONTENDED);

        unsafe { lock.unlock() };
        waiter.join().unwrap();
        assert_eq!(lock.state(), UNLOCKED);
    }

    #[test]
    fn test_init_resets_word() {
        let mut lock = RawLock::new();
        lock.lock();
        lock.init();
        assert_eq!(lock.state(), UNLOCKED);
    }
}

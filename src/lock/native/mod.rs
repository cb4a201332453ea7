//! Native lock - the cheapest mutual exclusion the platform offers
//!
//! Not recursive, no readers. One backend per target, chosen at build time:
//! 1. Linux/Android: three-state futex word
//! 2. Other Unix: lazily boxed pthread mutex
//! 3. Windows: SRW lock in exclusive mode
//! 4. Anything else: `parking_lot` raw mutex

#[cfg(any(target_os = "linux", target_os = "android"))]
mod futex;
#[cfg(any(target_os = "linux", target_os = "android"))]
use futex as imp;

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
mod pthread;
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
use pthread as imp;

#[cfg(windows)]
mod srw;
#[cfg(windows)]
use srw as imp;

#[cfg(not(any(unix, windows)))]
mod fallback;
#[cfg(not(any(unix, windows)))]
use fallback as imp;

/// Name of the compiled-in backend
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const BACKEND: &str = "futex";
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
pub const BACKEND: &str = "pthread";
#[cfg(windows)]
pub const BACKEND: &str = "srw";
#[cfg(not(any(unix, windows)))]
pub const BACKEND: &str = "parking_lot";

/// Platform lock handle
///
/// Usable in `static`s. `lock` blocks indefinitely; there is no timeout and
/// no cancellation.
pub struct NativeLock {
    inner: imp::RawLock,
}

impl NativeLock {
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: imp::RawLock::new(),
        }
    }

    /// Re-initialise an unheld lock. Safe on a fresh handle.
    #[inline]
    pub fn init(&mut self) {
        self.inner.init();
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

impl Default for NativeLock {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl lock_api::RawMutex for NativeLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: NativeLock = NativeLock::new();

    type GuardMarker = lock_api::GuardNoSend;

    #[inline]
    fn lock(&self) {
        NativeLock::lock(self);
    }

    #[inline]
    fn try_lock(&self) -> bool {
        NativeLock::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        NativeLock::unlock(self);
    }
}

/// Data-owning mutex on the native lock
pub type NativeMutex<T> = lock_api::Mutex<NativeLock, T>;
pub type NativeMutexGuard<'a, T> = lock_api::MutexGuard<'a, NativeLock, T>;

/// Platform call failures are logged and otherwise ignored
#[cfg(unix)]
#[cold]
fn report_failure(op: &'static str, code: i32) {
    let err = crate::error::SyncError::Platform { op, code };
    tracing::error!(target: "lock", backend = BACKEND, error = %err, "native lock call failed");
}

//! Thread identity as seen by the host platform
//!
//! `pthread_self` on Unix, `GetCurrentThreadId` on Windows. Identities are
//! packed into a `usize` so a lock can store its owner in an atomic.

/// Opaque identity of an OS thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ThreadIdent(usize);

impl ThreadIdent {
    /// Never returned by [`current`]
    pub const NONE: ThreadIdent = ThreadIdent(0);

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Identity of the calling thread
#[inline]
pub fn current() -> ThreadIdent {
    ThreadIdent(imp::raw_current())
}

#[cfg(unix)]
mod imp {
    #[inline]
    pub fn raw_current() -> usize {
        // SAFETY: pthread_self has no preconditions
        unsafe { libc::pthread_self() as usize }
    }
}

#[cfg(windows)]
mod imp {
    #[inline]
    pub fn raw_current() -> usize {
        // Thread ids are never 0 on Windows
        // SAFETY: GetCurrentThreadId has no preconditions
        unsafe { winapi::um::processthreadsapi::GetCurrentThreadId() as usize }
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    thread_local! {
        static MARKER: u8 = const { 0 };
    }

    /// The address of a thread-local is unique among live threads
    #[inline]
    pub fn raw_current() -> usize {
        MARKER.with(|m| m as *const u8 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_stable() {
        assert_eq!(current(), current());
        assert!(!current().is_none());
    }

    #[test]
    fn test_threads_differ() {
        let here = current();
        let there = std::thread::spawn(current).join().unwrap();
        assert_ne!(here, there);
    }
}

//! Instrumented lock - native lock plus diagnostics
//!
//! Adds a description, the acquisition site of the current or most recent
//! holder, a held/unheld breadcrumb, and (with [`ContentionStats`]) timing
//! of every acquisition. The breadcrumbs are for debuggers and reports;
//! mutual exclusion is decided by the native lock alone.
//!
//! [`ContentionStats`]: super::ContentionStats

use super::native::NativeLock;
use super::stats::{self, DefaultStats, LockStats, LockStatsSnapshot};
use crate::clock;
use crate::registry::LockReport;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::panic::Location;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};
use tracing::{info, warn};

/// Diagnostic held state, never consulted for correctness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeldState {
    Unlocked = 0,
    Locked = 1,
}

pub struct Lock<S: LockStats = DefaultStats> {
    native: NativeLock,
    description: &'static str,
    site: AtomicPtr<Location<'static>>,
    held: AtomicU8,
    stats: S,
}

impl<S: LockStats> Lock<S> {
    pub const fn new(description: &'static str) -> Self {
        Self::with_stats(description, S::INIT)
    }

    pub const fn with_stats(description: &'static str, stats: S) -> Self {
        Self {
            native: NativeLock::new(),
            description,
            site: AtomicPtr::new(ptr::null_mut()),
            held: AtomicU8::new(HeldState::Unlocked as u8),
            stats,
        }
    }

    /// Reset an unheld lock to its freshly constructed state
    pub fn init(&mut self, description: &'static str) {
        self.native.init();
        self.description = description;
        *self.site.get_mut() = ptr::null_mut();
        *self.held.get_mut() = HeldState::Unlocked as u8;
        self.stats.reset();
    }

    /// Block until the lock is held, recording the caller as the site
    #[track_caller]
    #[inline]
    pub fn acquire(&self) {
        self.acquire_at(Location::caller());
    }

    #[inline]
    pub fn acquire_at(&self, site: &'static Location<'static>) {
        if S::ENABLED {
            let start = clock::now();
            self.native.lock();
            self.stats.record(clock::elapsed_since(start));
        } else {
            self.native.lock();
        }
        self.mark_held(site);
    }

    /// Take the lock only if it is free; counts as uncontended
    #[track_caller]
    pub fn try_acquire(&self) -> bool {
        if !self.native.try_lock() {
            return false;
        }
        if S::ENABLED {
            self.stats.record(0);
        }
        self.mark_held(Location::caller());
        true
    }

    #[inline]
    fn mark_held(&self, site: &'static Location<'static>) {
        self.site
            .store(site as *const Location<'static> as *mut Location<'static>, Ordering::Relaxed);
        self.held.store(HeldState::Locked as u8, Ordering::Relaxed);
    }

    /// # Safety
    /// The calling thread must hold the lock.
    #[inline]
    pub unsafe fn release(&self) {
        self.held.store(HeldState::Unlocked as u8, Ordering::Relaxed);
        self.native.unlock();
    }

    /// Acquire and release on guard drop
    #[track_caller]
    #[inline]
    pub fn lock(&self) -> LockGuard<'_, S> {
        self.acquire_at(Location::caller());
        LockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub fn description(&self) -> &'static str {
        self.description
    }

    /// Site of the current, or most recent, acquisition
    pub fn last_site(&self) -> Option<&'static Location<'static>> {
        let site = self.site.load(Ordering::Relaxed);
        // SAFETY: only `&'static Location` values are ever stored
        unsafe { site.as_ref() }
    }

    pub fn held_state(&self) -> HeldState {
        match self.held.load(Ordering::Relaxed) {
            0 => HeldState::Unlocked,
            _ => HeldState::Locked,
        }
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.held_state() == HeldState::Locked
    }

    pub fn stats(&self) -> LockStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn write_stats<W: Write>(&self, out: &mut W) -> io::Result<()> {
        stats::write_report(out, self.description, &self.stats())
    }

    /// Print the report to stdout, then reset the counters
    pub fn print_stats(&self) {
        let stdout = io::stdout();
        self.print_stats_to(&mut stdout.lock());
    }

    /// Counters are kept if the report could not be written
    fn print_stats_to<W: Write>(&self, out: &mut W) {
        if !S::ENABLED {
            return;
        }

        let snapshot = self.stats();
        info!(
            target: "lock",
            lock = self.description,
            total = snapshot.total(),
            contended = snapshot.contention_count,
            "lock statistics"
        );

        match stats::write_report(out, self.description, &snapshot) {
            Ok(()) => self.reset_stats(),
            Err(err) => warn!(
                target: "lock",
                lock = self.description,
                error = %err,
                "failed to write lock statistics"
            ),
        }
    }
}

impl<S: LockStats + Default> Default for Lock<S> {
    fn default() -> Self {
        Self::with_stats("anonymous lock", S::default())
    }
}

impl<S: LockStats> LockReport for Lock<S> {
    fn description(&self) -> &'static str {
        self.description
    }

    fn stats(&self) -> LockStatsSnapshot {
        Lock::stats(self)
    }

    fn reset_stats(&self) {
        Lock::reset_stats(self);
    }
}

impl<S: LockStats> std::fmt::Debug for Lock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("description", &self.description)
            .field("held", &self.held_state())
            .field("site", &self.last_site())
            .finish()
    }
}

/// Releases the lock when dropped
#[must_use = "if unused the Lock will immediately unlock"]
pub struct LockGuard<'a, S: LockStats = DefaultStats> {
    lock: &'a Lock<S>,
    _not_send: PhantomData<*const ()>,
}

impl<S: LockStats> Drop for LockGuard<'_, S> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: the guard exists only while the lock is held by this thread
        unsafe { self.lock.release() };
    }
}

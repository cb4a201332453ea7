//! Recursive lock - re-entrant for the owning thread
//!
//! States are `Unlocked` and `Locked(owner, depth >= 1)`. The owner
//! re-acquires by bumping `depth` without touching the inner lock; any
//! other thread blocks in the inner lock's native wait. `owner` and `depth`
//! are written only by the thread holding the inner lock, and the owner is
//! cleared before the inner lock is released, so a thread that reads itself
//! as owner really is the holder.

use super::instrumented::{HeldState, Lock};
use super::stats::{DefaultStats, LockStats, LockStatsSnapshot};
use crate::registry::LockReport;
use crate::thread::{self, ThreadIdent};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::panic::Location;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct RecursiveLock<S: LockStats = DefaultStats> {
    lock: Lock<S>,
    owner: AtomicUsize,
    depth: AtomicUsize,
}

impl<S: LockStats> RecursiveLock<S> {
    pub const fn new(description: &'static str) -> Self {
        Self::with_stats(description, S::INIT)
    }

    pub const fn with_stats(description: &'static str, stats: S) -> Self {
        Self {
            lock: Lock::with_stats(description, stats),
            owner: AtomicUsize::new(ThreadIdent::NONE.as_raw()),
            depth: AtomicUsize::new(0),
        }
    }

    pub fn init(&mut self, description: &'static str) {
        self.lock.init(description);
        *self.owner.get_mut() = ThreadIdent::NONE.as_raw();
        *self.depth.get_mut() = 0;
    }

    #[track_caller]
    #[inline]
    pub fn acquire(&self) {
        self.acquire_at(Location::caller());
    }

    pub fn acquire_at(&self, site: &'static Location<'static>) {
        let me = thread::current();

        if self.owned_by(me) {
            let depth = self.depth.load(Ordering::Relaxed);
            self.depth.store(depth + 1, Ordering::Relaxed);
            return;
        }

        self.lock.acquire_at(site);
        self.take_ownership(me);
    }

    #[track_caller]
    pub fn try_acquire(&self) -> bool {
        let me = thread::current();

        if self.owned_by(me) {
            let depth = self.depth.load(Ordering::Relaxed);
            self.depth.store(depth + 1, Ordering::Relaxed);
            return true;
        }

        if !self.lock.try_acquire() {
            return false;
        }
        self.take_ownership(me);
        true
    }

    #[inline]
    fn take_ownership(&self, me: ThreadIdent) {
        debug_assert_eq!(self.depth.load(Ordering::Relaxed), 0, "recursive lock depth corrupted");
        self.owner.store(me.as_raw(), Ordering::Relaxed);
        self.depth.store(1, Ordering::Relaxed);
    }

    /// # Safety
    /// The calling thread must own the lock.
    pub unsafe fn release(&self) {
        let depth = self.depth.load(Ordering::Relaxed);
        debug_assert!(depth > 0, "release of an unowned recursive lock");

        if depth > 1 {
            self.depth.store(depth - 1, Ordering::Relaxed);
            return;
        }

        self.depth.store(0, Ordering::Relaxed);
        self.owner.store(ThreadIdent::NONE.as_raw(), Ordering::Relaxed);
        self.lock.release();
    }

    #[track_caller]
    pub fn lock(&self) -> RecursiveLockGuard<'_, S> {
        self.acquire_at(Location::caller());
        RecursiveLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    #[inline]
    fn owned_by(&self, me: ThreadIdent) -> bool {
        self.depth.load(Ordering::Relaxed) > 0 && self.owner.load(Ordering::Relaxed) == me.as_raw()
    }

    /// For assertions; the answer is only stable when it is `true`
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owned_by(thread::current())
    }

    /// Recursion depth; meaningful to the owner
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn description(&self) -> &'static str {
        self.lock.description()
    }

    pub fn last_site(&self) -> Option<&'static Location<'static>> {
        self.lock.last_site()
    }

    pub fn held_state(&self) -> HeldState {
        self.lock.held_state()
    }

    pub fn is_held(&self) -> bool {
        self.lock.is_held()
    }

    pub fn stats(&self) -> LockStatsSnapshot {
        self.lock.stats()
    }

    pub fn reset_stats(&self) {
        self.lock.reset_stats();
    }

    pub fn write_stats<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.lock.write_stats(out)
    }

    pub fn print_stats(&self) {
        self.lock.print_stats();
    }
}

impl<S: LockStats + Default> Default for RecursiveLock<S> {
    fn default() -> Self {
        Self::with_stats("anonymous recursive lock", S::default())
    }
}

impl<S: LockStats> LockReport for RecursiveLock<S> {
    fn description(&self) -> &'static str {
        self.lock.description()
    }

    fn stats(&self) -> LockStatsSnapshot {
        self.lock.stats()
    }

    fn reset_stats(&self) {
        self.lock.reset_stats();
    }
}

impl<S: LockStats> std::fmt::Debug for RecursiveLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveLock")
            .field("lock", &self.lock)
            .field("owner", &ThreadIdent::from_raw(self.owner.load(Ordering::Relaxed)))
            .field("depth", &self.depth())
            .finish()
    }
}

#[must_use = "if unused the RecursiveLock will immediately unlock"]
pub struct RecursiveLockGuard<'a, S: LockStats = DefaultStats> {
    lock: &'a RecursiveLock<S>,
    _not_send: PhantomData<*const ()>,
}

impl<S: LockStats> Drop for RecursiveLockGuard<'_, S> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: the guard was created by this thread's acquisition
        unsafe { self.lock.release() };
    }
}

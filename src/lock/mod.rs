//! Locking - three layers, each built on the one below
//!
//! 1. [`NativeLock`]: platform primitive (futex, pthread, SRW)
//! 2. [`Lock`]: adds acquisition site, held breadcrumb, contention stats
//! 3. [`RecursiveLock`]: adds owner thread and recursion depth
//!
//! Statistics are selected per lock type through [`LockStats`];
//! [`DefaultStats`] follows the `stats` cargo feature.

pub mod native;
mod instrumented;
mod recursive;
mod stats;

pub use instrumented::{HeldState, Lock, LockGuard};
pub use native::{NativeLock, NativeMutex, NativeMutexGuard};
pub use recursive::{RecursiveLock, RecursiveLockGuard};
pub use stats::{
    contention_threshold, set_contention_threshold, write_report, ContentionStats,
    DefaultStats, LockStats, LockStatsSnapshot, NoStats, DEFAULT_CONTENTION_THRESHOLD,
};

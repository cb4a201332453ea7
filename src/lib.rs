//! Typthon Sync - fine-grained locking and atomic refcounting for the runtime
//!
//! This crate replaces a single interpreter-wide lock with per-structure
//! locks and lock-free reference counting, instrumented so contention can
//! be measured:
//! - [`lock`]: native, instrumented and recursive locks
//! - [`refcount`]: the atomic increment/decrement fast path
//! - [`stats`]: thread-local refcount timing merged into process totals
//! - [`clock`]: the cycle counter behind all timing

pub mod clock;
pub mod config;
pub mod error;
pub mod ffi;
pub mod lock;
pub mod logging;
pub mod refcount;
pub mod registry;
pub mod stats;
pub mod thread;

// Re-export core types
pub use config::{StatsFormat, SyncConfig};
pub use error::{ConfigError, SyncError};
pub use lock::{
    ContentionStats, DefaultStats, Lock, LockGuard, LockStats, NativeLock, NoStats,
    RecursiveLock, RecursiveLockGuard,
};
pub use refcount::{decrement, increment, ObjRef, RefCount, Refcounted};
pub use registry::LockReport;

use tracing::{info, warn};

/// Serializes tests that change process-wide settings
#[cfg(test)]
pub(crate) static SETTINGS_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

/// Initialize logging and apply configuration from file and environment
pub fn init() -> Result<SyncConfig, SyncError> {
    logging::init();

    let config = SyncConfig::discover()?;
    config.apply();

    info!(
        backend = lock::native::BACKEND,
        lock_stats = cfg!(feature = "stats"),
        time_refcounts = cfg!(feature = "time-refcounts"),
        "typthon sync layer initialized"
    );
    Ok(config)
}

/// Persist this thread's statistics and dump everything collected
pub fn shutdown() {
    info!("typthon sync layer shutting down");

    if cfg!(feature = "stats") {
        registry::report_all();
    }
    if cfg!(feature = "time-refcounts") {
        stats::print_summary();
    } else {
        stats::flush_current_thread();
    }
}

/// Runtime initialization
#[no_mangle]
pub extern "C" fn typthon_sync_init() {
    if let Err(err) = init() {
        // Bad configuration is not fatal: defaults stay in effect
        warn!(error = %err, "falling back to default sync configuration");
    }
}

/// Runtime cleanup
#[no_mangle]
pub extern "C" fn typthon_sync_cleanup() {
    shutdown();
}

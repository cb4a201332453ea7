//! Registry of long-lived runtime locks
//!
//! Locks guarding interpreter-wide tables register themselves once so their
//! statistics can be dumped together at shutdown.

use crate::lock::{write_report, LockStatsSnapshot};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::io::{self, Write};
use tracing::{debug, warn};

/// Anything that can report lock statistics
pub trait LockReport: Sync {
    fn description(&self) -> &'static str;
    fn stats(&self) -> LockStatsSnapshot;
    fn reset_stats(&self);
}

static REGISTRY: Lazy<RwLock<Vec<&'static dyn LockReport>>> =
    Lazy::new(|| RwLock::new(Vec::with_capacity(32)));

/// Register a lock for shutdown reporting. Registering twice is a no-op.
pub fn register(lock: &'static dyn LockReport) {
    let mut locks = REGISTRY.write();
    let addr = lock as *const dyn LockReport as *const ();
    if locks.iter().any(|l| *l as *const dyn LockReport as *const () == addr) {
        return;
    }

    debug!(target: "lock", lock = lock.description(), "registered lock");
    locks.push(lock);
}

/// Descriptions of all registered locks, in registration order
pub fn registered() -> Vec<&'static str> {
    REGISTRY.read().iter().map(|l| l.description()).collect()
}

pub fn snapshot_all() -> Vec<(&'static str, LockStatsSnapshot)> {
    REGISTRY
        .read()
        .iter()
        .map(|l| (l.description(), l.stats()))
        .collect()
}

/// Write every registered lock's report, then reset its counters
pub fn write_all<W: Write>(out: &mut W) -> io::Result<()> {
    write_locks(&REGISTRY.read(), out)
}

fn write_locks<W: Write>(locks: &[&'static dyn LockReport], out: &mut W) -> io::Result<()> {
    for lock in locks {
        write_report(out, lock.description(), &lock.stats())?;
        lock.reset_stats();
    }
    Ok(())
}

/// Print every registered lock's report to stdout
pub fn report_all() {
    let stdout = io::stdout();
    if let Err(err) = write_all(&mut stdout.lock()) {
        warn!(target: "lock", error = %err, "failed to write lock statistics");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{ContentionStats, Lock, RecursiveLock};

    static LIST_LOCK: Lock<ContentionStats> =
        Lock::with_stats("registry list", ContentionStats::with_threshold(u64::MAX));
    static DICT_LOCK: RecursiveLock<ContentionStats> = RecursiveLock::new("registry dict");

    #[test]
    fn test_register_and_report() {
        register(&LIST_LOCK);
        register(&DICT_LOCK);
        register(&LIST_LOCK);

        let names = registered();
        assert_eq!(names.iter().filter(|n| **n == "registry list").count(), 1);
        assert!(names.contains(&"registry dict"));

        LIST_LOCK.acquire();
        unsafe { LIST_LOCK.release() };

        let snaps = snapshot_all();
        let (_, list) = snaps.iter().find(|(n, _)| *n == "registry list").unwrap();
        assert_eq!(list.total(), 1);

        let mut out = Vec::new();
        write_all(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("registry list"));
        assert!(text.contains("registry dict"));

        assert_eq!(LIST_LOCK.stats().total(), 0);
    }

    static UNPRINTED: Lock<ContentionStats> =
        Lock::with_stats("registry unprinted", ContentionStats::with_threshold(u64::MAX));

    struct ClosedStdout;

    impl Write for ClosedStdout {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_keeps_counters() {
        UNPRINTED.acquire();
        unsafe { UNPRINTED.release() };

        let locks: [&'static dyn LockReport; 1] = [&UNPRINTED];
        assert!(write_locks(&locks, &mut ClosedStdout).is_err());
        assert_eq!(UNPRINTED.stats().total(), 1);

        let mut out = Vec::new();
        write_locks(&locks, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("registry unprinted"));
        assert_eq!(UNPRINTED.stats().total(), 0);
    }
}

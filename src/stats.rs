//! Refcount timing statistics - thread-local accumulate, atomic merge
//!
//! Every refcount operation adds its cycle cost to a shadow copy owned by
//! the calling thread, so the hot path never writes a shared word. Shadows
//! are merged into the process-wide [`RefcountTotals`] with atomic adds when
//! the thread exits, on [`flush_current_thread`], or every
//! `flush_interval` operations if one is configured.

use crate::clock;
use crossbeam::utils::CachePadded;
use serde::Serialize;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, trace};

/// Process-wide totals; mutated only through atomic adds
#[derive(Debug, Default)]
pub struct RefcountTotals {
    total_refcount_time: CachePadded<AtomicU64>,
    total_refcount_ops: CachePadded<AtomicU64>,
}

impl RefcountTotals {
    pub const fn new() -> Self {
        Self {
            total_refcount_time: CachePadded::new(AtomicU64::new(0)),
            total_refcount_ops: CachePadded::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    pub fn add(&self, time: u64, ops: u64) {
        self.total_refcount_time.fetch_add(time, Ordering::Relaxed);
        self.total_refcount_ops.fetch_add(ops, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RefcountSummary {
        RefcountSummary {
            total_refcount_ops: self.total_refcount_ops.load(Ordering::Relaxed),
            total_refcount_time: self.total_refcount_time.load(Ordering::Relaxed),
        }
    }

    /// Read and zero the totals
    pub fn take(&self) -> RefcountSummary {
        RefcountSummary {
            total_refcount_ops: self.total_refcount_ops.swap(0, Ordering::Relaxed),
            total_refcount_time: self.total_refcount_time.swap(0, Ordering::Relaxed),
        }
    }

    pub fn setzero(&self) {
        self.take();
    }
}

static GLOBAL: RefcountTotals = RefcountTotals::new();

#[inline]
pub fn global() -> &'static RefcountTotals {
    &GLOBAL
}

/// One thread's unmerged counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThreadRefcountStats {
    pub total_refcount_time: u64,
    pub total_refcount_ops: u64,
}

impl ThreadRefcountStats {
    pub const fn new() -> Self {
        Self {
            total_refcount_time: 0,
            total_refcount_ops: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, cycles: u64) {
        self.total_refcount_time = self.total_refcount_time.wrapping_add(cycles);
        self.total_refcount_ops += 1;
    }

    pub fn setzero(&mut self) {
        *self = Self::new();
    }

    pub fn is_empty(&self) -> bool {
        self.total_refcount_ops == 0 && self.total_refcount_time == 0
    }
}

/// Add `local` into `totals` and zero it. Safe to call from many threads at
/// once, each with its own `local`.
pub fn merge_and_reset(local: &mut ThreadRefcountStats, totals: &RefcountTotals) {
    if !local.is_empty() {
        totals.add(local.total_refcount_time, local.total_refcount_ops);
    }
    local.setzero();
}

/// 0 = merge only at thread exit or explicit flush
static FLUSH_INTERVAL: AtomicU64 = AtomicU64::new(0);

pub fn flush_interval() -> u64 {
    FLUSH_INTERVAL.load(Ordering::Relaxed)
}

pub fn set_flush_interval(ops: u64) {
    FLUSH_INTERVAL.store(ops, Ordering::Relaxed);
}

/// Thread-local shadow; persisted into the global totals on thread exit
struct LocalSlot {
    stats: Cell<ThreadRefcountStats>,
}

impl LocalSlot {
    const fn new() -> Self {
        Self {
            stats: Cell::new(ThreadRefcountStats::new()),
        }
    }
}

impl Drop for LocalSlot {
    fn drop(&mut self) {
        let mut stats = self.stats.get();
        if !stats.is_empty() {
            trace!(
                target: "refcount",
                ops = stats.total_refcount_ops,
                "persisting thread refcount stats"
            );
        }
        merge_and_reset(&mut stats, global());
        self.stats.set(stats);
    }
}

thread_local! {
    static LOCAL: LocalSlot = const { LocalSlot::new() };
}

/// Record one timed refcount operation for the calling thread
#[inline]
pub fn record_local(cycles: u64) {
    let recorded = LOCAL.try_with(|slot| {
        let mut stats = slot.stats.get();
        record_with_interval(&mut stats, cycles, flush_interval(), global());
        slot.stats.set(stats);
    });

    // Thread-local storage already torn down: go straight to the totals
    if recorded.is_err() {
        global().add(cycles, 1);
    }
}

/// Accumulate into `local`, merging once it holds `interval` ops (0 = never)
#[inline]
fn record_with_interval(
    local: &mut ThreadRefcountStats,
    cycles: u64,
    interval: u64,
    totals: &RefcountTotals,
) {
    local.record(cycles);
    if interval != 0 && local.total_refcount_ops >= interval {
        merge_and_reset(local, totals);
    }
}

/// The calling thread's unmerged counts
pub fn local_snapshot() -> ThreadRefcountStats {
    LOCAL.try_with(|slot| slot.stats.get()).unwrap_or_default()
}

/// Persist the calling thread's counts now
pub fn flush_current_thread() {
    let _ = LOCAL.try_with(|slot| {
        let mut stats = slot.stats.get();
        merge_and_reset(&mut stats, global());
        slot.stats.set(stats);
    });
}

/// Aggregate refcount figures
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefcountSummary {
    pub total_refcount_ops: u64,
    pub total_refcount_time: u64,
}

impl RefcountSummary {
    pub fn total_seconds(&self) -> f64 {
        clock::cycles_to_seconds(self.total_refcount_time)
    }

    pub fn average_cycles(&self) -> f64 {
        if self.total_refcount_ops == 0 {
            0.0
        } else {
            self.total_refcount_time as f64 / self.total_refcount_ops as f64
        }
    }

    pub fn report(&self) -> String {
        [
            format!("[incref/decref] {} total calls", self.total_refcount_ops),
            format!("[incref/decref] {} total time spent, in cycles", self.total_refcount_time),
            format!("[incref/decref] {:.6} total time spent, in seconds", self.total_seconds()),
            format!(
                "[incref/decref] {:.2} average cycles for an incref/decref",
                self.average_cycles()
            ),
        ]
        .join("\n")
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "refcounts": self,
            "total_seconds": self.total_seconds(),
            "average_cycles": self.average_cycles(),
        })
        .to_string()
    }
}

/// Persist this thread, print the process-wide summary, then reset it
pub fn print_summary() {
    flush_current_thread();
    let summary = global().take();
    if summary.total_refcount_ops == 0 {
        return;
    }

    info!(
        target: "refcount",
        ops = summary.total_refcount_ops,
        cycles = summary.total_refcount_time,
        "refcount statistics"
    );
    match crate::config::stats_format() {
        crate::config::StatsFormat::Text => println!("{}", summary.report()),
        crate::config::StatsFormat::Json => println!("{}", summary.to_json()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_merge_and_reset() {
        let totals = RefcountTotals::new();
        let mut local = ThreadRefcountStats::new();
        local.record(10);
        local.record(30);

        merge_and_reset(&mut local, &totals);
        assert!(local.is_empty());
        assert_eq!(
            totals.snapshot(),
            RefcountSummary {
                total_refcount_ops: 2,
                total_refcount_time: 40
            }
        );

        // Merging an empty shadow changes nothing
        merge_and_reset(&mut local, &totals);
        assert_eq!(totals.snapshot().total_refcount_ops, 2);
    }

    #[test]
    fn test_concurrent_merges_are_exact() {
        const T: usize = 8;
        const C: u64 = 10_000;

        let totals = Arc::new(RefcountTotals::new());
        let start = Arc::new(Barrier::new(T));

        let handles: Vec<_> = (0..T)
            .map(|_| {
                let totals = Arc::clone(&totals);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    let mut local = ThreadRefcountStats::new();
                    for _ in 0..C {
                        local.record(3);
                    }
                    start.wait();
                    merge_and_reset(&mut local, &totals);
                    assert!(local.is_empty());
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let summary = totals.snapshot();
        assert_eq!(summary.total_refcount_ops, T as u64 * C);
        assert_eq!(summary.total_refcount_time, T as u64 * C * 3);
    }

    #[test]
    fn test_record_local_stays_local() {
        thread::spawn(|| {
            record_local(5);
            record_local(7);
            let local = local_snapshot();
            assert_eq!(local.total_refcount_ops, 2);
            assert_eq!(local.total_refcount_time, 12);

            flush_current_thread();
            assert!(local_snapshot().is_empty());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_interval_merges_periodically() {
        let totals = RefcountTotals::new();
        let mut local = ThreadRefcountStats::new();

        for _ in 0..3 {
            record_with_interval(&mut local, 2, 4, &totals);
        }
        assert_eq!(local.total_refcount_ops, 3);
        assert_eq!(totals.snapshot().total_refcount_ops, 0);

        record_with_interval(&mut local, 2, 4, &totals);
        assert!(local.is_empty());
        assert_eq!(totals.snapshot().total_refcount_ops, 4);
        assert_eq!(totals.snapshot().total_refcount_time, 8);

        record_with_interval(&mut local, 2, 0, &totals);
        assert_eq!(local.total_refcount_ops, 1);
    }

    #[test]
    fn test_flush_interval_on_live_thread() {
        let _settings = crate::SETTINGS_LOCK.lock();
        let before = global().snapshot().total_refcount_ops;
        set_flush_interval(4);

        let local_ops = thread::spawn(|| {
            for _ in 0..5 {
                record_local(1);
            }
            let ops = local_snapshot().total_refcount_ops;
            flush_current_thread();
            ops
        })
        .join();
        set_flush_interval(0);

        assert_eq!(local_ops.unwrap(), 1);
        assert!(global().snapshot().total_refcount_ops >= before + 5);
    }

    #[test]
    fn test_take_resets() {
        let totals = RefcountTotals::new();
        totals.add(100, 4);
        let taken = totals.take();
        assert_eq!(taken.total_refcount_ops, 4);
        assert_eq!(taken.average_cycles(), 25.0);
        assert_eq!(totals.snapshot(), RefcountSummary::default());
    }

    #[test]
    fn test_summary_report() {
        let summary = RefcountSummary {
            total_refcount_ops: 4,
            total_refcount_time: 100,
        };
        let report = summary.report();
        assert!(report.contains("4 total calls"));
        assert!(report.contains("25.00 average cycles"));
    }
}

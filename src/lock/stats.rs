//! Contention statistics for instrumented locks
//!
//! Statistics are a type parameter of the lock, not a runtime flag: with
//! [`NoStats`] the lock carries no counters and never reads the clock.
//! An acquisition whose wait stays at or below the contention threshold
//! counts as uncontended; anything slower is contended and contributes
//! its delay to the total and maximum.

use crate::clock;
use crate::config::{self, StatsFormat};
use serde::Serialize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cycles an acquisition may take and still count as uncontended
pub const DEFAULT_CONTENTION_THRESHOLD: u64 = 250;

static CONTENTION_THRESHOLD: AtomicU64 = AtomicU64::new(DEFAULT_CONTENTION_THRESHOLD);

/// Process-wide threshold used by locks without their own
#[inline]
pub fn contention_threshold() -> u64 {
    CONTENTION_THRESHOLD.load(Ordering::Relaxed)
}

pub fn set_contention_threshold(cycles: u64) {
    CONTENTION_THRESHOLD.store(cycles, Ordering::Relaxed);
}

/// Statistics policy carried by a lock
pub trait LockStats: Send + Sync {
    /// `false` compiles the timing out of `acquire`
    const ENABLED: bool;

    const INIT: Self;

    /// Record one acquisition that waited `delay` cycles
    fn record(&self, delay: u64);

    fn reset(&self);

    fn snapshot(&self) -> LockStatsSnapshot;
}

/// Zero-sized, zero-cost policy
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStats;

impl LockStats for NoStats {
    const ENABLED: bool = false;
    const INIT: Self = NoStats;

    #[inline(always)]
    fn record(&self, _delay: u64) {}

    #[inline(always)]
    fn reset(&self) {}

    #[inline]
    fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot::default()
    }
}

/// Counters updated by the lock holder after each acquisition
#[derive(Debug)]
pub struct ContentionStats {
    threshold: Option<u64>,
    no_contention_count: AtomicU64,
    contention_count: AtomicU64,
    contention_total_delay: AtomicU64,
    contention_max_delay: AtomicU64,
}

impl ContentionStats {
    pub const fn new() -> Self {
        Self::build(None)
    }

    /// Use a fixed threshold instead of the process-wide one
    pub const fn with_threshold(cycles: u64) -> Self {
        Self::build(Some(cycles))
    }

    const fn build(threshold: Option<u64>) -> Self {
        Self {
            threshold,
            no_contention_count: AtomicU64::new(0),
            contention_count: AtomicU64::new(0),
            contention_total_delay: AtomicU64::new(0),
            contention_max_delay: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn threshold(&self) -> u64 {
        self.threshold.unwrap_or_else(contention_threshold)
    }
}

impl Default for ContentionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LockStats for ContentionStats {
    const ENABLED: bool = true;
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = ContentionStats::new();

    #[inline]
    fn record(&self, delay: u64) {
        if delay <= self.threshold() {
            self.no_contention_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.contention_count.fetch_add(1, Ordering::Relaxed);
            self.contention_total_delay.fetch_add(delay, Ordering::Relaxed);
            self.contention_max_delay.fetch_max(delay, Ordering::Relaxed);
        }
    }

    fn reset(&self) {
        self.no_contention_count.store(0, Ordering::Relaxed);
        self.contention_count.store(0, Ordering::Relaxed);
        self.contention_total_delay.store(0, Ordering::Relaxed);
        self.contention_max_delay.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot {
            no_contention_count: self.no_contention_count.load(Ordering::Relaxed),
            contention_count: self.contention_count.load(Ordering::Relaxed),
            contention_total_delay: self.contention_total_delay.load(Ordering::Relaxed),
            contention_max_delay: self.contention_max_delay.load(Ordering::Relaxed),
        }
    }
}

/// Policy selected by the `stats` feature
#[cfg(feature = "stats")]
pub type DefaultStats = ContentionStats;
#[cfg(not(feature = "stats"))]
pub type DefaultStats = NoStats;

/// Point-in-time copy of a lock's counters (delays in cycles)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockStatsSnapshot {
    pub no_contention_count: u64,
    pub contention_count: u64,
    pub contention_total_delay: u64,
    pub contention_max_delay: u64,
}

impl LockStatsSnapshot {
    pub fn total(&self) -> u64 {
        self.no_contention_count + self.contention_count
    }

    pub fn average_delay(&self) -> f64 {
        if self.contention_count == 0 {
            0.0
        } else {
            self.contention_total_delay as f64 / self.contention_count as f64
        }
    }

    /// Human-readable report, one `[description]` prefixed line per figure
    pub fn report(&self, description: &str) -> String {
        let mut lines = vec![
            format!("[{}] {} total locks", description, self.total()),
            format!("[{}] {} locks without contention", description, self.no_contention_count),
            format!("[{}] {} locks with contention", description, self.contention_count),
        ];

        if self.contention_count > 0 {
            lines.push(format!(
                "[{}] {} contention total delay in cycles",
                description, self.contention_total_delay
            ));
            lines.push(format!(
                "[{}] {:.6} contention total delay in cpu-seconds",
                description,
                clock::cycles_to_seconds(self.contention_total_delay)
            ));
            lines.push(format!(
                "[{}] {:.2} contention average delay in cycles",
                description,
                self.average_delay()
            ));
            lines.push(format!(
                "[{}] {} contention max delay in cycles",
                description, self.contention_max_delay
            ));
        }

        lines.join("\n")
    }

    pub fn to_json(&self, description: &str) -> String {
        serde_json::json!({
            "lock": description,
            "total": self.total(),
            "stats": self,
            "contention_total_seconds": clock::cycles_to_seconds(self.contention_total_delay),
            "contention_average_delay": self.average_delay(),
        })
        .to_string()
    }
}

/// Write a report in the configured format
pub fn write_report<W: Write>(
    out: &mut W,
    description: &str,
    snapshot: &LockStatsSnapshot,
) -> io::Result<()> {
    match config::stats_format() {
        StatsFormat::Text => writeln!(out, "{}", snapshot.report(description)),
        StatsFormat::Json => writeln!(out, "{}", snapshot.to_json(description)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_split() {
        let stats = ContentionStats::with_threshold(100);
        stats.record(10);
        stats.record(100);
        stats.record(101);
        stats.record(500);

        let snap = stats.snapshot();
        assert_eq!(snap.no_contention_count, 2);
        assert_eq!(snap.contention_count, 2);
        assert_eq!(snap.contention_total_delay, 601);
        assert_eq!(snap.contention_max_delay, 500);
        assert_eq!(snap.total(), 4);
    }

    #[test]
    fn test_reset() {
        let stats = ContentionStats::with_threshold(0);
        stats.record(42);
        stats.reset();
        assert_eq!(stats.snapshot(), LockStatsSnapshot::default());
    }

    #[test]
    fn test_no_stats_is_empty() {
        assert_eq!(std::mem::size_of::<NoStats>(), 0);
        NoStats.record(1_000_000);
        assert_eq!(NoStats.snapshot().total(), 0);
    }

    #[test]
    fn test_report_lines() {
        let snap = LockStatsSnapshot {
            no_contention_count: 3,
            contention_count: 2,
            contention_total_delay: 1000,
            contention_max_delay: 700,
        };

        let report = snap.report("dict");
        assert!(report.contains("[dict] 5 total locks"));
        assert!(report.contains("[dict] 2 locks with contention"));
        assert!(report.contains("[dict] 500.00 contention average delay in cycles"));
        assert!(report.contains("[dict] 700 contention max delay in cycles"));

        let quiet = LockStatsSnapshot::default().report("idle");
        assert_eq!(quiet.lines().count(), 3);
    }

    #[test]
    fn test_json_report() {
        let snap = LockStatsSnapshot {
            no_contention_count: 1,
            ..Default::default()
        };
        let value: serde_json::Value = serde_json::from_str(&snap.to_json("list")).unwrap();
        assert_eq!(value["lock"], "list");
        assert_eq!(value["total"], 1);
        assert_eq!(value["stats"]["no_contention_count"], 1);
    }
}

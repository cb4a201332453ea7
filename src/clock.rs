//! Cycle clock - cheap high-resolution timestamps for statistics
//!
//! Only differences between two readings are meaningful. Conversion to
//! seconds uses a configured rate, a calibrated rate, or the platform
//! timebase, and is approximate: it is a diagnostic, never a correctness
//! input.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Assumed TSC rate when nothing better is known
pub const DEFAULT_CYCLES_PER_SEC: u64 = 2_600_000_000;

/// 0 means "not configured"
static CYCLES_PER_SEC: AtomicU64 = AtomicU64::new(0);

/// Read the cycle counter
#[inline(always)]
pub fn now() -> u64 {
    imp::now()
}

/// Cycles elapsed since `start` (saturating, the counter may be per-core)
#[inline(always)]
pub fn elapsed_since(start: u64) -> u64 {
    now().saturating_sub(start)
}

/// Conversion rate currently in effect
pub fn cycles_per_second() -> u64 {
    match CYCLES_PER_SEC.load(Ordering::Relaxed) {
        0 => imp::native_frequency(),
        rate => rate,
    }
}

/// Override the conversion rate (0 restores the platform default)
pub fn set_cycles_per_second(rate: u64) {
    CYCLES_PER_SEC.store(rate, Ordering::Relaxed);
}

#[inline]
pub fn cycles_to_seconds(cycles: u64) -> f64 {
    cycles as f64 / cycles_per_second() as f64
}

/// Measure the counter against the monotonic clock over `window` and
/// install the measured rate.
pub fn calibrate(window: Duration) -> u64 {
    let wall = Instant::now();
    let start = now();
    std::thread::sleep(window);
    let cycles = elapsed_since(start);
    let nanos = wall.elapsed().as_nanos().max(1);

    let rate = ((cycles as u128 * 1_000_000_000) / nanos) as u64;
    if rate > 0 {
        set_cycles_per_second(rate);
    }

    debug!(
        cycles_per_sec = rate,
        window_us = window.as_micros() as u64,
        "cycle clock calibrated"
    );
    rate
}

#[cfg(target_arch = "x86_64")]
mod imp {
    #[inline(always)]
    pub fn now() -> u64 {
        // SAFETY: RDTSC is available on every x86_64 CPU
        unsafe { core::arch::x86_64::_rdtsc() }
    }

    pub fn native_frequency() -> u64 {
        super::DEFAULT_CYCLES_PER_SEC
    }
}

#[cfg(target_arch = "aarch64")]
mod imp {
    use core::arch::asm;

    #[inline(always)]
    pub fn now() -> u64 {
        let ticks: u64;
        // SAFETY: the virtual counter is readable from EL0
        unsafe { asm!("mrs {}, cntvct_el0", out(reg) ticks, options(nomem, nostack)) };
        ticks
    }

    pub fn native_frequency() -> u64 {
        let freq: u64;
        // SAFETY: the counter frequency register is readable from EL0
        unsafe { asm!("mrs {}, cntfrq_el0", out(reg) freq, options(nomem, nostack)) };
        if freq == 0 {
            super::DEFAULT_CYCLES_PER_SEC
        } else {
            freq
        }
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod imp {
    use once_cell::sync::Lazy;
    use std::time::Instant;

    static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

    /// Nanoseconds since first use stand in for cycles
    #[inline(always)]
    pub fn now() -> u64 {
        EPOCH.elapsed().as_nanos() as u64
    }

    pub fn native_frequency() -> u64 {
        1_000_000_000
    }
}

//! Cross-thread behavior of the lock layers

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use typthon_sync::lock::{ContentionStats, Lock, NativeLock, NoStats, RecursiveLock};

const THREADS: usize = 8;
const ITERATIONS: usize = 5_000;

#[test]
fn test_native_lock_mutual_exclusion() {
    let lock = Arc::new(NativeLock::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let (lock, inside) = (Arc::clone(&lock), Arc::clone(&inside));
            let total = Arc::clone(&total);
            thread::spawn(move || {
                for _ in 0..ITERATIONS {
                    lock.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::Relaxed), 0);
                    total.fetch_add(1, Ordering::Relaxed);
                    inside.fetch_sub(1, Ordering::Relaxed);
                    unsafe { lock.unlock() };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(total.load(Ordering::Relaxed), THREADS * ITERATIONS);
}

#[test]
fn test_instrumented_lock_protects_plain_data() {
    struct Shared {
        lock: Lock<ContentionStats>,
        value: std::cell::UnsafeCell<u64>,
    }
    unsafe impl Sync for Shared {}

    let shared = Arc::new(Shared {
        lock: Lock::new("plain data"),
        value: std::cell::UnsafeCell::new(0),
    });

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for _ in 0..ITERATIONS {
                    let _guard = shared.lock.lock();
                    unsafe { *shared.value.get() += 1 };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let _guard = shared.lock.lock();
    assert_eq!(unsafe { *shared.value.get() }, (THREADS * ITERATIONS) as u64);
    // Every acquisition was counted one way or the other
    assert_eq!(shared.lock.stats().total(), (THREADS * ITERATIONS) as u64 + 1);
}

#[test]
fn test_contention_counts_blocked_threads() {
    const N: usize = 5;
    let stats = ContentionStats::with_threshold(250);
    let lock = Arc::new(Lock::with_stats("forced contention", stats));
    let ready = Arc::new(Barrier::new(N + 1));

    lock.acquire();
    lock.reset_stats();

    let waiters: Vec<_> = (0..N)
        .map(|_| {
            let (lock, ready) = (Arc::clone(&lock), Arc::clone(&ready));
            thread::spawn(move || {
                ready.wait();
                let _guard = lock.lock();
            })
        })
        .collect();

    ready.wait();
    thread::sleep(Duration::from_millis(150));
    unsafe { lock.release() };

    for waiter in waiters {
        waiter.join().unwrap();
    }

    let stats = lock.stats();
    assert_eq!(stats.contention_count, N as u64);
    assert!(stats.contention_total_delay > 0);
}

#[test]
fn test_recursive_lock_needs_matching_releases() {
    const K: usize = 4;
    let lock = Arc::new(RecursiveLock::<NoStats>::new("k releases"));
    let other_got_in = Arc::new(AtomicBool::new(false));

    for _ in 0..K {
        lock.acquire();
    }
    assert_eq!(lock.depth(), K);

    let other = {
        let (lock, other_got_in) = (Arc::clone(&lock), Arc::clone(&other_got_in));
        thread::spawn(move || {
            lock.acquire();
            other_got_in.store(true, Ordering::SeqCst);
            assert!(lock.is_owned_by_current_thread());
            assert_eq!(lock.depth(), 1);
            unsafe { lock.release() };
        })
    };

    for _ in 0..K - 1 {
        unsafe { lock.release() };
        thread::sleep(Duration::from_millis(20));
        assert!(!other_got_in.load(Ordering::SeqCst));
    }

    unsafe { lock.release() };
    other.join().unwrap();
    assert!(other_got_in.load(Ordering::SeqCst));
    assert!(!lock.is_owned_by_current_thread());
}

#[test]
fn test_recursive_lock_under_load() {
    let lock = Arc::new(RecursiveLock::<NoStats>::new("recursive load"));
    let inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let (lock, inside) = (Arc::clone(&lock), Arc::clone(&inside));
            thread::spawn(move || {
                for i in 0..1_000 {
                    let _outer = lock.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::Relaxed), 0);
                    for _ in 0..(i % 3) {
                        let _nested = lock.lock();
                        assert!(lock.is_owned_by_current_thread());
                    }
                    inside.fetch_sub(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(lock.depth(), 0);
}

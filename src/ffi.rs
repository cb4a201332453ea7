//! C FFI - refcount and statistics entry points for generated code
//!
//! Design: zero-overhead C bindings. Null pointers are tolerated and
//! treated as no-ops, matching the rest of the runtime's C surface.

use crate::refcount::RefCount;
use crate::stats;
use core::ffi::c_void;

/// Deallocation hook invoked when a count reaches zero
pub type DeallocFn = unsafe extern "C" fn(obj: *mut c_void);

/// Increment reference count, returning the new count (0 for null)
///
/// # Safety
/// `count` must be null or point to a live `RefCount`.
#[no_mangle]
pub unsafe extern "C" fn typthon_sync_incref(count: *const RefCount) -> isize {
    match count.as_ref() {
        Some(count) => count.increment(),
        None => 0,
    }
}

/// Decrement reference count; on the zero transition call `dealloc(obj)`
///
/// # Safety
/// `count` must be null or point to a live `RefCount` the caller holds a
/// reference on; `dealloc` must be safe to call with `obj`.
#[no_mangle]
pub unsafe extern "C" fn typthon_sync_decref(
    count: *const RefCount,
    obj: *mut c_void,
    dealloc: Option<DeallocFn>,
) -> isize {
    let Some(count) = count.as_ref() else {
        return 0;
    };

    count.decrement_and(|| {
        if let Some(dealloc) = dealloc {
            dealloc(obj);
        }
    })
}

/// Current count (for debugging/testing); 0 for null
///
/// # Safety
/// `count` must be null or point to a live `RefCount`.
#[no_mangle]
pub unsafe extern "C" fn typthon_sync_refcount(count: *const RefCount) -> isize {
    count.as_ref().map_or(0, RefCount::get)
}

/// Persist the calling thread's refcount stats (host thread teardown)
#[no_mangle]
pub extern "C" fn typthon_sync_persist_thread_stats() {
    stats::flush_current_thread();
}

/// Dump lock and refcount statistics to stdout
#[no_mangle]
pub extern "C" fn typthon_sync_print_stats() {
    crate::registry::report_all();
    stats::print_summary();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FREED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_free(obj: *mut c_void) {
        assert_eq!(obj as usize, 0xdead0);
        FREED.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn test_null_is_noop() {
        unsafe {
            assert_eq!(typthon_sync_incref(core::ptr::null()), 0);
            assert_eq!(typthon_sync_decref(core::ptr::null(), core::ptr::null_mut(), None), 0);
            assert_eq!(typthon_sync_refcount(core::ptr::null()), 0);
        }
    }

    #[test]
    fn test_decref_calls_hook_once() {
        let count = RefCount::new(1);
        let obj = 0xdead0 as *mut c_void;

        unsafe {
            assert_eq!(typthon_sync_incref(&count), 2);
            assert_eq!(typthon_sync_decref(&count, obj, Some(count_free)), 1);
            assert_eq!(FREED.load(Ordering::Relaxed), 0);
            assert_eq!(typthon_sync_decref(&count, obj, Some(count_free)), 0);
            assert_eq!(typthon_sync_refcount(&count), 0);
        }
        assert_eq!(FREED.load(Ordering::Relaxed), 1);
    }
}

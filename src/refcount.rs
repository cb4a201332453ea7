//! Atomic refcount fast path
//!
//! Increment and decrement are single atomic read-modify-write
//! instructions; nothing here takes a lock or blocks. The decrement that
//! observes the transition to zero is unique, and that thread alone runs
//! the deallocation hook.
//!
//! With the `time-refcounts` feature every operation is timed with the
//! cycle clock and recorded into the calling thread's shadow statistics.

use crate::clock;
use crate::stats;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;
use std::sync::atomic::{AtomicIsize, Ordering};
use tracing::trace;

/// Shared reference count
#[derive(Debug)]
#[repr(transparent)]
pub struct RefCount {
    count: AtomicIsize,
}

impl RefCount {
    #[inline]
    pub const fn new(initial: isize) -> Self {
        Self {
            count: AtomicIsize::new(initial),
        }
    }

    /// Current value, for debugging and tests
    #[inline]
    pub fn get(&self) -> isize {
        self.count.load(Ordering::Relaxed)
    }

    /// Add one and return the new count
    #[inline(always)]
    pub fn increment(&self) -> isize {
        if cfg!(feature = "time-refcounts") {
            self.increment_timed()
        } else {
            self.increment_untimed()
        }
    }

    /// Subtract one and return the new count. A result of zero makes the
    /// caller responsible for deallocation.
    #[inline(always)]
    pub fn decrement(&self) -> isize {
        if cfg!(feature = "time-refcounts") {
            self.decrement_timed()
        } else {
            self.decrement_untimed()
        }
    }

    #[inline(always)]
    fn increment_untimed(&self) -> isize {
        let old = self.count.fetch_add(1, Ordering::AcqRel);
        debug_assert!(old < isize::MAX, "refcount overflow");
        old + 1
    }

    #[inline(always)]
    fn decrement_untimed(&self) -> isize {
        // AcqRel: the zero transition sees every write made under the
        // references released before it
        let old = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "refcount underflow");
        old - 1
    }

    /// Increment and record its cycle cost for this thread
    #[inline]
    pub fn increment_timed(&self) -> isize {
        let start = clock::now();
        let count = self.increment_untimed();
        stats::record_local(clock::elapsed_since(start));
        count
    }

    #[inline]
    pub fn decrement_timed(&self) -> isize {
        let start = clock::now();
        let count = self.decrement_untimed();
        stats::record_local(clock::elapsed_since(start));
        count
    }

    /// Decrement, running `dealloc` exactly once if the count hits zero
    #[inline]
    pub fn decrement_and<F: FnOnce()>(&self, dealloc: F) -> isize {
        let count = self.decrement();
        if count == 0 {
            dealloc_cold(dealloc);
        }
        count
    }
}

impl Default for RefCount {
    /// A fresh object starts with one reference
    fn default() -> Self {
        Self::new(1)
    }
}

#[cold]
#[inline(never)]
fn dealloc_cold<F: FnOnce()>(dealloc: F) {
    trace!(target: "refcount", "count reached zero, deallocating");
    dealloc();
}

#[inline(always)]
pub fn increment(count: &RefCount) -> isize {
    count.increment()
}

#[inline(always)]
pub fn decrement<F: FnOnce()>(count: &RefCount, dealloc: F) -> isize {
    count.decrement_and(dealloc)
}

/// An object whose lifetime is driven by its embedded [`RefCount`]
pub trait Refcounted {
    fn refcount(&self) -> &RefCount;

    /// Free the object. Called exactly once, after the count reaches zero.
    ///
    /// # Safety
    /// `this` must point to a live object that nobody references any more.
    unsafe fn dealloc(this: NonNull<Self>);
}

#[inline]
pub fn incref<T: Refcounted + ?Sized>(obj: &T) -> isize {
    obj.refcount().increment()
}

/// Drop one reference, deallocating on the zero transition
///
/// # Safety
/// `obj` must be live and the caller must own one of its references.
#[inline]
pub unsafe fn decref<T: Refcounted>(obj: NonNull<T>) -> isize {
    let count = obj.as_ref().refcount().decrement();
    if count == 0 {
        trace!(target: "refcount", address = ?obj.as_ptr(), "count reached zero, deallocating");
        T::dealloc(obj);
    }
    count
}

/// Owning handle: clone increments, drop decrements
pub struct ObjRef<T: Refcounted> {
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

impl<T: Refcounted> ObjRef<T> {
    /// Adopt one existing reference without incrementing
    ///
    /// # Safety
    /// `ptr` must be live and the caller must transfer one reference.
    #[inline]
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    /// Give up the handle without decrementing
    #[inline]
    pub fn into_raw(this: Self) -> NonNull<T> {
        let ptr = this.ptr;
        core::mem::forget(this);
        ptr
    }

    #[inline]
    pub fn as_ptr(this: &Self) -> *mut T {
        this.ptr.as_ptr()
    }

    #[inline]
    pub fn count(this: &Self) -> isize {
        this.refcount().get()
    }
}

impl<T: Refcounted> Clone for ObjRef<T> {
    #[inline]
    fn clone(&self) -> Self {
        incref(&**self);
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Refcounted> Drop for ObjRef<T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: this handle owns one reference
        unsafe {
            decref(self.ptr);
        }
    }
}

impl<T: Refcounted> Deref for ObjRef<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the object lives while we hold a reference
        unsafe { self.ptr.as_ref() }
    }
}

// Shared across threads like Arc: the count is atomic
unsafe impl<T: Refcounted + Send + Sync> Send for ObjRef<T> {}
unsafe impl<T: Refcounted + Send + Sync> Sync for ObjRef<T> {}

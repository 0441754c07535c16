//! Synchronization primitives for the shared tiers.

use core::ptr::{NonNull, null_mut};
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::thread;

use crate::block::FreeBlock;

/// Test-and-set lock. Waiters yield to the scheduler between attempts, so
/// contention degrades to rescheduling rather than burning a core; there is
/// no bound and no fairness.
pub(crate) struct SpinLock {
  locked: AtomicBool,
}

/// Releases the lock on drop, so every exit path of a critical section
/// unlocks.
pub(crate) struct SpinGuard<'a> {
  lock: &'a SpinLock,
}

impl SpinLock {
  pub(crate) const fn new() -> Self {
    Self {
      locked: AtomicBool::new(false),
    }
  }

  #[inline]
  pub(crate) fn lock(&self) -> SpinGuard<'_> {
    while self
      .locked
      .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      while self.locked.load(Ordering::Relaxed) {
        thread::yield_now();
      }
    }
    SpinGuard { lock: self }
  }
}

impl Drop for SpinGuard<'_> {
  #[inline]
  fn drop(&mut self) {
    self.lock.locked.store(false, Ordering::Release);
  }
}

/// Intrusive Treiber stack of free blocks. Chains are the unit of work; a
/// single block pushes as its own one-element chain.
///
/// `push_chain` is a compare-and-swap loop safe under any number of
/// concurrent producers. `pop` requires a single consumer at a time; the
/// caller serializes poppers (the central tier's class lock does), which is
/// also what rules out the ABA swap without generation counters.
pub(crate) struct AtomicStack {
  head: AtomicPtr<FreeBlock>,
}

impl AtomicStack {
  pub(crate) const fn new() -> Self {
    Self {
      head: AtomicPtr::new(null_mut()),
    }
  }

  /// Splices a pre-linked chain `head ..= tail` onto the stack top. Every
  /// block of the chain must be dead and in no other list.
  pub(crate) unsafe fn push_chain(&self, head: NonNull<FreeBlock>, tail: NonNull<FreeBlock>) {
    let mut top = self.head.load(Ordering::Relaxed);
    loop {
      unsafe { FreeBlock::set_next(tail.as_ptr(), top) };
      match self.head.compare_exchange_weak(
        top,
        head.as_ptr(),
        Ordering::Release,
        Ordering::Relaxed,
      ) {
        Ok(_) => return,
        Err(observed) => top = observed,
      }
    }
  }

  /// Pops the top block with its link word cleared. Single consumer only:
  /// concurrent poppers could both read the same `next` and race the swap.
  pub(crate) unsafe fn pop(&self) -> Option<NonNull<FreeBlock>> {
    let mut top = self.head.load(Ordering::Acquire);
    loop {
      let block = NonNull::new(top)?;
      let next = unsafe { FreeBlock::next(block.as_ptr()) };
      match self
        .head
        .compare_exchange_weak(top, next, Ordering::Acquire, Ordering::Acquire)
      {
        Ok(_) => {
          unsafe { FreeBlock::set_next(block.as_ptr(), null_mut()) };
          return Some(block);
        }
        Err(observed) => top = observed,
      }
    }
  }
}

//! OS memory boundary: the page provider seam and the oversized fallback.

use core::alloc::Layout;
use core::ptr::{NonNull, null_mut};

use crate::{ALIGNMENT, PAGE_SIZE};

/// Source of page-granularity memory backing the page tier.
///
/// `reserve` hands out a page-aligned, zero-initialized region of
/// `pages * PAGE_SIZE` bytes. `release` may be called with any page-aligned
/// fragment of an earlier reservation; span splitting makes fragment-wise
/// release at teardown the norm, so implementations must not assume
/// reservations come back whole.
///
/// Both methods run with pool-internal locks held. An implementation must
/// not call back into a pool it backs (allocating, freeing, reading stats,
/// or dropping a [`PoolBox`](crate::PoolBox)); the pool detects same-thread
/// re-entry and panics instead of deadlocking.
pub trait PageProvider: Send + Sync {
  fn reserve(&self, pages: usize) -> Option<NonNull<u8>>;

  /// # Safety
  /// `addr` must be a page-aligned address inside a region obtained from
  /// `reserve` on this provider, covering `pages` pages that are no longer
  /// read or written by anyone.
  unsafe fn release(&self, addr: NonNull<u8>, pages: usize);
}

/// Anonymous-mapping provider; the default backing for a pool. Fresh
/// mappings are zeroed by the kernel.
pub struct MmapProvider;

impl PageProvider for MmapProvider {
  fn reserve(&self, pages: usize) -> Option<NonNull<u8>> {
    let bytes = pages.checked_mul(PAGE_SIZE)?;
    if bytes == 0 {
      return None;
    }
    let ptr = unsafe {
      libc::mmap(
        null_mut(),
        bytes,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };
    if ptr == libc::MAP_FAILED {
      None
    } else {
      NonNull::new(ptr.cast())
    }
  }

  unsafe fn release(&self, addr: NonNull<u8>, pages: usize) {
    unsafe { libc::munmap(addr.as_ptr().cast(), pages * PAGE_SIZE) };
  }
}

/// Allocation for requests above the class ceiling; never touches the
/// tiers. The caller must free with `oversized_free` and the same size.
#[inline]
pub(crate) fn oversized_alloc(size: usize) -> Option<NonNull<u8>> {
  debug_assert!(size > 0);
  let layout = Layout::from_size_align(size, ALIGNMENT).ok()?;
  NonNull::new(unsafe { std::alloc::alloc(layout) })
}

#[inline]
pub(crate) unsafe fn oversized_free(ptr: NonNull<u8>, size: usize) {
  // The layout was validated when the matching allocation succeeded.
  let layout = unsafe { Layout::from_size_align_unchecked(size, ALIGNMENT) };
  unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
}

//! Per-thread front tier.
//!
//! A `ThreadCache` is owned by exactly one thread at a time, so its lists
//! need no synchronization; ownership of the whole cache may still move
//! between threads (pool teardown collects them), hence `Send`.

use core::ptr::NonNull;

use crate::block::BlockList;
use crate::central_cache::CentralCache;
use crate::error::AllocError;
use crate::page_cache::PageCache;
use crate::platform;
use crate::size_class::size_to_class;
use crate::{CLASS_COUNT, HIGH_WATER, MAX_BYTES};

pub(crate) struct ThreadCache {
  lists: Box<[BlockList]>,
}

// SAFETY: the lists hold dead blocks reachable only through this cache, so
// moving the cache to another thread moves exclusive ownership of every
// linked block with it.
unsafe impl Send for ThreadCache {}

impl ThreadCache {
  pub(crate) fn new() -> Self {
    Self {
      lists: (0..CLASS_COUNT).map(|_| BlockList::new()).collect(),
    }
  }

  /// Fast path: pop from the local class list; on a miss, fetch exactly
  /// one block from the shared tier. Requests above the ceiling bypass the
  /// tiers entirely.
  pub(crate) fn allocate(
    &mut self,
    size: usize,
    central: &CentralCache,
    pages: &PageCache,
  ) -> Result<NonNull<u8>, AllocError> {
    debug_assert!(size > 0);
    if size > MAX_BYTES {
      return platform::oversized_alloc(size).ok_or(AllocError::OutOfMemory);
    }
    let class = size_to_class(size);
    if let Some(block) = self.lists[class].pop() {
      return Ok(block);
    }
    central.fetch_one(class, pages)
  }

  /// Pushes the block onto the local class list, then sheds the excess to
  /// the shared tier once the list climbs past the high-water mark,
  /// keeping a quarter of it.
  ///
  /// # Safety
  /// `ptr` must come from `allocate` with exactly this `size` and must not
  /// be used afterwards.
  pub(crate) unsafe fn deallocate(
    &mut self,
    ptr: NonNull<u8>,
    size: usize,
    central: &CentralCache,
  ) {
    debug_assert!(size > 0);
    if size > MAX_BYTES {
      unsafe { platform::oversized_free(ptr, size) };
      return;
    }
    let class = size_to_class(size);
    let list = &mut self.lists[class];
    unsafe { list.push(ptr) };
    if list.len() > HIGH_WATER {
      let keep = (list.len() / 4).max(1);
      if let Some((head, count)) = list.split_off(keep) {
        unsafe { central.return_range(class, head, count) };
      }
    }
  }

  #[cfg(test)]
  pub(crate) fn list_len(&self, class: usize) -> usize {
    self.lists[class].len()
  }
}

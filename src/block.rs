//! Raw free-block handling.
//!
//! A free block's first word doubles as the link to the next free block of
//! its class; once a block is handed to a caller that word is plain user
//! data again. Every reinterpretation of block memory as a link node lives
//! in this module; the tiers above deal in opaque `NonNull` handles and
//! counts.

use core::ptr::{NonNull, null_mut};

/// Link node overlaid on the first word of a free block.
#[repr(C)]
pub(crate) struct FreeBlock {
  next: *mut FreeBlock,
}

impl FreeBlock {
  /// Reinterprets a dead region's first word as a link node. The region
  /// must be at least one word long and `ALIGNMENT`-aligned.
  #[inline]
  pub(crate) fn from_raw(ptr: NonNull<u8>) -> NonNull<FreeBlock> {
    ptr.cast()
  }

  /// The block's address, for handing back to a caller.
  #[inline]
  pub(crate) fn as_raw(block: NonNull<FreeBlock>) -> NonNull<u8> {
    block.cast()
  }

  #[inline]
  pub(crate) unsafe fn next(block: *mut FreeBlock) -> *mut FreeBlock {
    unsafe { (*block).next }
  }

  #[inline]
  pub(crate) unsafe fn set_next(block: *mut FreeBlock, next: *mut FreeBlock) {
    unsafe { (*block).next = next };
  }
}

/// Detaches the first block of a chain. Returns the block (link word
/// cleared) and the rest of the chain, if any.
#[inline]
pub(crate) unsafe fn split_first(
  head: NonNull<FreeBlock>,
) -> (NonNull<u8>, Option<NonNull<FreeBlock>>) {
  let rest = unsafe { FreeBlock::next(head.as_ptr()) };
  unsafe { FreeBlock::set_next(head.as_ptr(), null_mut()) };
  (FreeBlock::as_raw(head), NonNull::new(rest))
}

/// Walks `count - 1` links from `head` to the chain's final block. The
/// chain must hold at least `count` blocks.
pub(crate) unsafe fn chain_tail(head: NonNull<FreeBlock>, count: usize) -> NonNull<FreeBlock> {
  debug_assert!(count >= 1);
  let mut cursor = head.as_ptr();
  let mut walked = 1;
  while walked < count {
    let next = unsafe { FreeBlock::next(cursor) };
    debug_assert!(!next.is_null());
    cursor = next;
    walked += 1;
  }
  unsafe { NonNull::new_unchecked(cursor) }
}

/// Slices a fresh span into `bytes / slot` equal blocks linked front to
/// back and returns (head, tail, count). Trailing bytes that do not fill a
/// whole slot are left unused inside the span.
pub(crate) unsafe fn carve_chain(
  start: NonNull<u8>,
  bytes: usize,
  slot: usize,
) -> (NonNull<FreeBlock>, NonNull<FreeBlock>, usize) {
  debug_assert!(slot >= size_of::<*mut FreeBlock>());
  debug_assert!(bytes >= slot);
  let count = bytes / slot;
  let base = start.as_ptr();
  let head = FreeBlock::from_raw(start);
  let mut prev = head.as_ptr();
  for i in 1..count {
    let block = unsafe { base.add(i * slot) }.cast::<FreeBlock>();
    unsafe { FreeBlock::set_next(prev, block) };
    prev = block;
  }
  unsafe { FreeBlock::set_next(prev, null_mut()) };
  let tail = unsafe { NonNull::new_unchecked(prev) };
  (head, tail, count)
}

/// LIFO chain of same-class free blocks with a running count. Not
/// synchronized; each list is owned by exactly one thread.
pub(crate) struct BlockList {
  head: *mut FreeBlock,
  len: usize,
}

impl BlockList {
  pub(crate) const fn new() -> Self {
    Self {
      head: null_mut(),
      len: 0,
    }
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.len
  }

  /// Pushes `ptr` as the new head. The region must be dead to the caller
  /// and hold at least one word.
  #[inline]
  pub(crate) unsafe fn push(&mut self, ptr: NonNull<u8>) {
    let block = FreeBlock::from_raw(ptr).as_ptr();
    unsafe { FreeBlock::set_next(block, self.head) };
    self.head = block;
    self.len += 1;
  }

  /// Pops the head, clearing its link word so the caller never sees a
  /// stale pointer in fresh memory.
  #[inline]
  pub(crate) fn pop(&mut self) -> Option<NonNull<u8>> {
    let block = NonNull::new(self.head)?;
    unsafe {
      self.head = FreeBlock::next(block.as_ptr());
      FreeBlock::set_next(block.as_ptr(), null_mut());
    }
    self.len -= 1;
    Some(FreeBlock::as_raw(block))
  }

  /// Detaches everything past the first `keep` blocks, returning the
  /// removed chain and its length. Leaves the list untouched and returns
  /// `None` if it holds `keep` blocks or fewer, or if the chain turns out
  /// shorter than its count during the walk.
  pub(crate) fn split_off(&mut self, keep: usize) -> Option<(NonNull<FreeBlock>, usize)> {
    debug_assert!(keep >= 1);
    if self.len <= keep {
      return None;
    }
    let mut cursor = self.head;
    let mut walked = 1;
    while walked < keep {
      if cursor.is_null() {
        return None;
      }
      cursor = unsafe { FreeBlock::next(cursor) };
      walked += 1;
    }
    if cursor.is_null() {
      return None;
    }
    let detached = unsafe { FreeBlock::next(cursor) };
    let head = NonNull::new(detached)?;
    unsafe { FreeBlock::set_next(cursor, null_mut()) };
    let count = self.len - keep;
    self.len = keep;
    Some((head, count))
  }
}

//! Shared middle tier: one locked free list per size class.
//!
//! List heads are atomic stacks manipulated under the class spinlock, so
//! same-class operations serialize while different classes proceed in
//! parallel. Refills slice a whole span into blocks at once; page-level
//! traffic happens only when a class list runs dry.

use core::ptr::NonNull;

use log::trace;

use crate::block::{self, FreeBlock};
use crate::error::AllocError;
use crate::page_cache::PageCache;
use crate::size_class::class_to_size;
use crate::sync::{AtomicStack, SpinLock};
use crate::{CLASS_COUNT, PAGE_SIZE, SPAN_PAGES};

struct ClassList {
  lock: SpinLock,
  blocks: AtomicStack,
}

impl ClassList {
  const fn new() -> Self {
    Self {
      lock: SpinLock::new(),
      blocks: AtomicStack::new(),
    }
  }
}

pub(crate) struct CentralCache {
  classes: Box<[ClassList]>,
}

impl CentralCache {
  pub(crate) fn new() -> Self {
    Self {
      classes: (0..CLASS_COUNT).map(|_| ClassList::new()).collect(),
    }
  }

  /// Pages to request when refilling a class whose slots are `slot` bytes.
  /// Small classes take a whole batch span to amortize future refills;
  /// classes whose single block outgrows the batch take exactly what one
  /// block needs.
  fn pages_for(slot: usize) -> usize {
    let needed = slot.div_ceil(PAGE_SIZE);
    if needed <= SPAN_PAGES { SPAN_PAGES } else { needed }
  }

  /// Hands exactly one block of `class` to a thread cache, refilling the
  /// class list from a fresh span when it is empty.
  pub(crate) fn fetch_one(
    &self,
    class: usize,
    pages: &PageCache,
  ) -> Result<NonNull<u8>, AllocError> {
    debug_assert!(class < CLASS_COUNT);
    let entry = &self.classes[class];
    let _guard = entry.lock.lock();
    if let Some(head) = unsafe { entry.blocks.pop() } {
      return Ok(FreeBlock::as_raw(head));
    }
    let slot = class_to_size(class);
    let span_pages = Self::pages_for(slot);
    let span = pages.allocate_span(span_pages)?;
    let (head, tail, count) = unsafe { block::carve_chain(span, span_pages * PAGE_SIZE, slot) };
    trace!("class {class}: carved {count} blocks from a {span_pages}-page span");
    let (first, rest) = unsafe { block::split_first(head) };
    if let Some(rest_head) = rest {
      unsafe { entry.blocks.push_chain(rest_head, tail) };
    }
    Ok(first)
  }

  /// Accepts a detached chain of `count` blocks back into `class`'s list.
  ///
  /// # Safety
  /// The chain must hold exactly `count` dead blocks of `class`, linked
  /// front to back and present in no other list.
  pub(crate) unsafe fn return_range(&self, class: usize, head: NonNull<FreeBlock>, count: usize) {
    debug_assert!(class < CLASS_COUNT);
    debug_assert!(count >= 1);
    let entry = &self.classes[class];
    let _guard = entry.lock.lock();
    let tail = unsafe { block::chain_tail(head, count) };
    unsafe { entry.blocks.push_chain(head, tail) };
  }
}

//! Page-granularity span management.
//!
//! The page tier is pure bookkeeping over addresses: it never reads or
//! writes span memory itself. Spans live in two indices, a size-keyed map
//! of free spans used to satisfy requests and an address-keyed map of every
//! span ever carved out, used to validate returned addresses and to find
//! right neighbors for coalescing.

use std::collections::BTreeMap;
use std::ptr::NonNull;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::PAGE_SIZE;
use crate::error::AllocError;
use crate::platform::PageProvider;

/// Snapshot of a pool's page-level activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCacheStats {
  /// Fresh reservations taken from the provider.
  pub os_reserves: usize,
  /// Spans handed back to the provider (teardown, absent trimming).
  pub os_releases: usize,
  /// Spans currently sitting in the free index.
  pub free_spans: usize,
  /// Spans recorded in the address index, free or lent out.
  pub tracked_spans: usize,
}

pub(crate) struct PageCache {
  inner: Mutex<PageCacheInner>,
  provider: Box<dyn PageProvider>,
}

struct PageCacheInner {
  /// page count -> start addresses of free spans of exactly that count.
  free_by_size: BTreeMap<usize, Vec<usize>>,
  /// start address -> page count, for every span carved out so far.
  by_addr: BTreeMap<usize, usize>,
  os_reserves: usize,
  os_releases: usize,
}

impl PageCacheInner {
  /// Unlinks and returns (address, page count) of the smallest free span
  /// covering `min_pages`.
  fn take_smallest(&mut self, min_pages: usize) -> Option<(usize, usize)> {
    let pages = self.free_by_size.range(min_pages..).next().map(|(&p, _)| p)?;
    let bucket = self.free_by_size.get_mut(&pages)?;
    let addr = bucket.pop()?;
    let emptied = bucket.is_empty();
    if emptied {
      self.free_by_size.remove(&pages);
    }
    Some((addr, pages))
  }

  /// Records `addr` as a free span of `pages` pages in both indices.
  fn insert_free(&mut self, addr: usize, pages: usize) {
    self.by_addr.insert(addr, pages);
    self.free_by_size.entry(pages).or_default().push(addr);
  }

  /// Detaches `addr` from the free index if it is currently free. Walks
  /// the bucket, so head and interior entries both detach.
  #[allow(dead_code)]
  fn detach_free(&mut self, addr: usize, pages: usize) -> bool {
    let Some(bucket) = self.free_by_size.get_mut(&pages) else {
      return false;
    };
    let Some(pos) = bucket.iter().position(|&a| a == addr) else {
      return false;
    };
    bucket.remove(pos);
    if bucket.is_empty() {
      self.free_by_size.remove(&pages);
    }
    true
  }
}

impl PageCache {
  pub(crate) fn new(provider: Box<dyn PageProvider>) -> Self {
    Self {
      inner: Mutex::new(PageCacheInner {
        free_by_size: BTreeMap::new(),
        by_addr: BTreeMap::new(),
        os_reserves: 0,
        os_releases: 0,
      }),
      provider,
    }
  }

  /// Hands out a span of exactly `pages` pages, reusing the smallest
  /// suitable free span (splitting off the tail when oversized) before
  /// falling back to a fresh reservation.
  pub(crate) fn allocate_span(&self, pages: usize) -> Result<NonNull<u8>, AllocError> {
    if pages == 0 {
      return Err(AllocError::ZeroSize);
    }
    let mut inner = self.inner.lock();
    if let Some((addr, found)) = inner.take_smallest(pages) {
      if found > pages {
        // Front piece to the caller, remainder back to the free index.
        inner.by_addr.insert(addr, pages);
        inner.insert_free(addr + pages * PAGE_SIZE, found - pages);
      }
      return NonNull::new(addr as *mut u8).ok_or(AllocError::OutOfMemory);
    }
    let span = self.provider.reserve(pages).ok_or(AllocError::OutOfMemory)?;
    inner.os_reserves += 1;
    inner.by_addr.insert(span.as_ptr() as usize, pages);
    debug!(
      "reserved {pages} fresh pages at {:#x}",
      span.as_ptr() as usize
    );
    Ok(span)
  }

  /// Accepts a span back and merges it with its immediate right neighbor
  /// when that neighbor is also free. Left neighbors are never examined.
  /// Unknown addresses are ignored.
  ///
  /// No tier path returns spans piecemeal (teardown releases them
  /// wholesale via `clear`), so this and `detach_free` are reached from
  /// the tests alone.
  ///
  /// # Safety
  /// If `ptr` names a tracked span, its memory must no longer be read or
  /// written; the span may be handed out again by a later `allocate_span`.
  #[allow(dead_code)]
  pub(crate) unsafe fn deallocate_span(&self, ptr: NonNull<u8>, pages: usize) {
    let addr = ptr.as_ptr() as usize;
    let mut inner = self.inner.lock();
    let Some(&recorded) = inner.by_addr.get(&addr) else {
      warn!("ignoring unknown span address {addr:#x}");
      return;
    };
    debug_assert_eq!(recorded, pages, "span length mismatch at {addr:#x}");
    let mut merged = recorded;
    let right = addr + recorded * PAGE_SIZE;
    if let Some(&right_pages) = inner.by_addr.get(&right) {
      if inner.detach_free(right, right_pages) {
        inner.by_addr.remove(&right);
        merged += right_pages;
      }
    }
    inner.insert_free(addr, merged);
  }

  /// Returns every tracked span to the provider and empties both indices.
  /// Every block carved from those spans is invalidated.
  pub(crate) fn clear(&self) {
    let mut inner = self.inner.lock();
    let spans = std::mem::take(&mut inner.by_addr);
    let count = spans.len();
    for (addr, pages) in spans {
      if let Some(ptr) = NonNull::new(addr as *mut u8) {
        unsafe { self.provider.release(ptr, pages) };
        inner.os_releases += 1;
      }
    }
    inner.free_by_size.clear();
    if count > 0 {
      debug!("released {count} spans at teardown");
    }
  }

  pub(crate) fn stats(&self) -> PageCacheStats {
    let inner = self.inner.lock();
    PageCacheStats {
      os_reserves: inner.os_reserves,
      os_releases: inner.os_releases,
      free_spans: inner.free_by_size.values().map(Vec::len).sum(),
      tracked_spans: inner.by_addr.len(),
    }
  }
}

impl Drop for PageCache {
  fn drop(&mut self) {
    self.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Bookkeeping-only provider handing out synthetic page addresses. The
  /// page tier never touches span memory, so no mapping has to exist.
  /// `gap` pages are skipped between reservations: a gap of zero makes
  /// consecutive reservations adjacent, any other value keeps them apart.
  struct FakeProvider {
    cursor: AtomicUsize,
    limit: usize,
    gap: usize,
    reserves: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
  }

  const FAKE_BASE: usize = 0x5000_0000;

  impl FakeProvider {
    fn new(limit: usize, gap: usize) -> Self {
      Self {
        cursor: AtomicUsize::new(0),
        limit,
        gap,
        reserves: Arc::new(AtomicUsize::new(0)),
        releases: Arc::new(AtomicUsize::new(0)),
      }
    }

    fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
      (self.reserves.clone(), self.releases.clone())
    }
  }

  impl PageProvider for FakeProvider {
    fn reserve(&self, pages: usize) -> Option<NonNull<u8>> {
      let page = self.cursor.fetch_add(pages + self.gap, Ordering::Relaxed);
      if page + pages > self.limit {
        return None;
      }
      self.reserves.fetch_add(1, Ordering::Relaxed);
      NonNull::new((FAKE_BASE + page * PAGE_SIZE) as *mut u8)
    }

    unsafe fn release(&self, _addr: NonNull<u8>, _pages: usize) {
      self.releases.fetch_add(1, Ordering::Relaxed);
    }
  }

  fn cache(limit: usize, gap: usize) -> PageCache {
    PageCache::new(Box::new(FakeProvider::new(limit, gap)))
  }

  #[test]
  fn zero_pages_is_an_error() {
    assert_eq!(cache(64, 1).allocate_span(0), Err(AllocError::ZeroSize));
  }

  #[test]
  fn reservation_failure_propagates() {
    let cache = cache(4, 0);
    assert_eq!(cache.allocate_span(8), Err(AllocError::OutOfMemory));
  }

  #[test]
  fn exact_fit_reuses_the_freed_span() {
    let cache = cache(64, 1);
    let span = cache.allocate_span(8).unwrap();
    assert_eq!(
      cache.stats(),
      PageCacheStats {
        os_reserves: 1,
        os_releases: 0,
        free_spans: 0,
        tracked_spans: 1
      }
    );
    unsafe { cache.deallocate_span(span, 8) };
    assert_eq!(cache.stats().free_spans, 1);
    let again = cache.allocate_span(8).unwrap();
    assert_eq!(again, span);
    assert_eq!(cache.stats().os_reserves, 1);
    assert_eq!(cache.stats().free_spans, 0);
  }

  #[test]
  fn oversized_free_span_is_split() {
    let cache = cache(64, 1);
    let span = cache.allocate_span(8).unwrap();
    unsafe { cache.deallocate_span(span, 8) };
    let front = cache.allocate_span(3).unwrap();
    assert_eq!(front, span);
    let stats = cache.stats();
    assert_eq!(stats.os_reserves, 1);
    assert_eq!(stats.free_spans, 1);
    assert_eq!(stats.tracked_spans, 2);
    // The remainder starts right after the front piece and fits exactly.
    let rest = cache.allocate_span(5).unwrap();
    assert_eq!(rest.as_ptr() as usize, span.as_ptr() as usize + 3 * PAGE_SIZE);
    assert_eq!(cache.stats().os_reserves, 1);
  }

  #[test]
  fn smallest_sufficient_span_wins() {
    let cache = cache(64, 1);
    let small = cache.allocate_span(4).unwrap();
    let large = cache.allocate_span(8).unwrap();
    unsafe {
      cache.deallocate_span(small, 4);
      cache.deallocate_span(large, 8);
    }
    // A 3-page request must come out of the 4-page span, not the 8-page.
    let got = cache.allocate_span(3).unwrap();
    assert_eq!(got, small);
    let stats = cache.stats();
    assert_eq!(stats.os_reserves, 2);
    // Left free: the 8-page span and the 1-page remainder of the split.
    assert_eq!(stats.free_spans, 2);
    assert_eq!(stats.tracked_spans, 3);
  }

  #[test]
  fn freeing_right_then_front_merges() {
    let cache = cache(64, 1);
    let span = cache.allocate_span(8).unwrap();
    unsafe { cache.deallocate_span(span, 8) };
    let front = cache.allocate_span(3).unwrap();
    // The 5-page remainder is free; returning the front piece absorbs it.
    unsafe { cache.deallocate_span(front, 3) };
    let stats = cache.stats();
    assert_eq!(stats.free_spans, 1);
    assert_eq!(stats.tracked_spans, 1);
    // The merged span serves the full page count with no new reservation.
    assert_eq!(cache.allocate_span(8).unwrap(), span);
    assert_eq!(cache.stats().os_reserves, 1);
  }

  #[test]
  fn freeing_front_then_right_stays_split() {
    let cache = cache(64, 1);
    let span = cache.allocate_span(8).unwrap();
    unsafe { cache.deallocate_span(span, 8) };
    let front = cache.allocate_span(3).unwrap();
    let rest = cache.allocate_span(5).unwrap();
    unsafe {
      // The right neighbor is live at this point, so nothing merges, and
      // the later free never looks left.
      cache.deallocate_span(front, 3);
      cache.deallocate_span(rest, 5);
    }
    let stats = cache.stats();
    assert_eq!(stats.free_spans, 2);
    assert_eq!(stats.tracked_spans, 2);
    // Neither piece can serve the full span on its own.
    cache.allocate_span(8).unwrap();
    assert_eq!(cache.stats().os_reserves, 2);
  }

  #[test]
  fn adjacent_reservations_merge_too() {
    // With no gap the second reservation starts exactly where the first
    // ends, so the merge rule applies across reservation boundaries.
    let cache = cache(64, 0);
    let first = cache.allocate_span(4).unwrap();
    let second = cache.allocate_span(4).unwrap();
    assert_eq!(
      second.as_ptr() as usize,
      first.as_ptr() as usize + 4 * PAGE_SIZE
    );
    unsafe {
      cache.deallocate_span(second, 4);
      cache.deallocate_span(first, 4);
    }
    let stats = cache.stats();
    assert_eq!(stats.free_spans, 1);
    assert_eq!(stats.tracked_spans, 1);
    assert_eq!(cache.allocate_span(8).unwrap(), first);
  }

  #[test]
  fn unknown_address_is_ignored() {
    let cache = cache(64, 1);
    cache.allocate_span(8).unwrap();
    let before = cache.stats();
    let bogus = NonNull::new(0xdead_f000 as *mut u8).unwrap();
    unsafe { cache.deallocate_span(bogus, 8) };
    assert_eq!(cache.stats(), before);
  }

  #[test]
  fn clear_releases_every_tracked_span() {
    let provider = FakeProvider::new(64, 1);
    let (reserves, releases) = provider.counters();
    let cache = PageCache::new(Box::new(provider));
    let span = cache.allocate_span(8).unwrap();
    unsafe { cache.deallocate_span(span, 8) };
    cache.allocate_span(3).unwrap();
    cache.allocate_span(6).unwrap();
    assert_eq!(reserves.load(Ordering::Relaxed), 2);
    cache.clear();
    let stats = cache.stats();
    assert_eq!(stats.tracked_spans, 0);
    assert_eq!(stats.free_spans, 0);
    // Three records at clear time: the 3-page front, its 5-page
    // remainder, and the 6-page span.
    assert_eq!(releases.load(Ordering::Relaxed), 3);
    assert_eq!(stats.os_releases, 3);
  }

  #[test]
  fn drop_runs_teardown() {
    let provider = FakeProvider::new(64, 1);
    let (_, releases) = provider.counters();
    {
      let cache = PageCache::new(Box::new(provider));
      cache.allocate_span(8).unwrap();
      cache.allocate_span(2).unwrap();
    }
    assert_eq!(releases.load(Ordering::Relaxed), 2);
  }
}

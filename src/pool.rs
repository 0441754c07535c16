//! The pool facade and the typed owning handle.

use core::cell::{Cell, UnsafeCell};
use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use std::sync::Arc;

use thread_local::ThreadLocal;

use crate::ALIGNMENT;
use crate::central_cache::CentralCache;
use crate::error::AllocError;
use crate::page_cache::{PageCache, PageCacheStats};
use crate::platform::{MmapProvider, PageProvider};
use crate::thread_cache::ThreadCache;

struct PoolInner {
  central: CentralCache,
  pages: PageCache,
  caches: ThreadLocal<CacheSlot>,
}

/// Per-thread slot: the cache plus a flag that catches a provider calling
/// back into the pool before the call can alias the cache or self-deadlock
/// on a tier lock.
struct CacheSlot {
  busy: Cell<bool>,
  cache: UnsafeCell<ThreadCache>,
}

struct BusyReset<'a>(&'a Cell<bool>);

impl Drop for BusyReset<'_> {
  fn drop(&mut self) {
    self.0.set(false);
  }
}

/// Handle to one tiered allocator instance.
///
/// Cloning is cheap and every clone shares the same tiers; the pool is
/// explicitly constructed state, passed to whoever allocates from it.
/// Backing spans are returned to the OS when the last handle drops, which
/// invalidates every block still carved from them.
///
/// Each thread that touches the pool lazily gets its own front cache.
/// Blocks parked in the cache of a thread that terminates are not returned
/// to the shared tier; they are reclaimed wholesale at teardown.
#[derive(Clone)]
pub struct Pool {
  inner: Arc<PoolInner>,
}

impl Pool {
  /// A pool backed by anonymous OS mappings.
  pub fn new() -> Self {
    Self::with_provider(Box::new(MmapProvider))
  }

  /// A pool over a caller-supplied page source.
  ///
  /// The provider runs with pool-internal locks held and must not call
  /// back into a pool it backs; same-thread re-entry is detected and
  /// panics instead of deadlocking.
  pub fn with_provider(provider: Box<dyn PageProvider>) -> Self {
    Self {
      inner: Arc::new(PoolInner {
        central: CentralCache::new(),
        pages: PageCache::new(provider),
        caches: ThreadLocal::new(),
      }),
    }
  }

  #[inline]
  fn with_cache<R>(&self, f: impl FnOnce(&mut ThreadCache, &CentralCache, &PageCache) -> R) -> R {
    let slot = self.inner.caches.get_or(|| CacheSlot {
      busy: Cell::new(false),
      cache: UnsafeCell::new(ThreadCache::new()),
    });
    if slot.busy.replace(true) {
      panic!("pool re-entered on its own thread; page providers must not call back into the pool");
    }
    let _reset = BusyReset(&slot.busy);
    // SAFETY: the slot belongs to the calling thread and the busy flag has
    // just ruled out a second entry, so this is the only live reference.
    let cache = unsafe { &mut *slot.cache.get() };
    f(cache, &self.inner.central, &self.inner.pages)
  }

  /// Returns at least `size` bytes, 8-byte aligned. Requests above the
  /// class ceiling are served by the general-purpose fallback instead of
  /// the tiers.
  pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
    if size == 0 {
      return Err(AllocError::ZeroSize);
    }
    self.with_cache(|cache, central, pages| cache.allocate(size, central, pages))
  }

  /// Returns a block to the pool. The block lands in the calling thread's
  /// cache, so freeing on a different thread than the allocating one is
  /// fine.
  ///
  /// # Safety
  /// `ptr` must come from `allocate` on this pool with exactly this
  /// `size`, must be returned only once, and must not be used afterwards.
  pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
    debug_assert!(size > 0);
    self.with_cache(|cache, central, _| unsafe { cache.deallocate(ptr, size, central) });
  }

  /// Moves `value` into pool memory, returning an owning handle that
  /// destructs and frees on drop. Types aligned beyond the pool's 8-byte
  /// grain are rejected at compile time.
  pub fn boxed<T>(&self, value: T) -> Result<PoolBox<'_, T>, AllocError> {
    const { assert!(align_of::<T>() <= ALIGNMENT) };
    if size_of::<T>() == 0 {
      let ptr = NonNull::<T>::dangling();
      unsafe { ptr.as_ptr().write(value) };
      return Ok(PoolBox { ptr, pool: self });
    }
    let raw = self.allocate(size_of::<T>())?;
    let ptr = raw.cast::<T>();
    unsafe { ptr.as_ptr().write(value) };
    Ok(PoolBox { ptr, pool: self })
  }

  /// Page-level counters, mostly interesting to tests and diagnostics.
  pub fn page_stats(&self) -> PageCacheStats {
    // Taking the page mutex from inside a provider call would deadlock on
    // the same thread.
    if self.inner.caches.get().is_some_and(|slot| slot.busy.get()) {
      panic!("pool re-entered on its own thread; page providers must not call back into the pool");
    }
    self.inner.pages.stats()
  }
}

impl Default for Pool {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for Pool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pool").field("pages", &self.page_stats()).finish()
  }
}

/// Owning handle to a value constructed in pool memory. Dropping it runs
/// the destructor in place, then hands the block back to the pool.
///
/// Zero-sized values never touch the pool.
pub struct PoolBox<'p, T> {
  ptr: NonNull<T>,
  pool: &'p Pool,
}

impl<'p, T> PoolBox<'p, T> {
  /// Moves the value out and returns its block to the pool.
  pub fn into_inner(self) -> T {
    let this = ManuallyDrop::new(self);
    unsafe {
      let value = this.ptr.as_ptr().read();
      if size_of::<T>() != 0 {
        this.pool.deallocate(this.ptr.cast(), size_of::<T>());
      }
      value
    }
  }
}

impl<T> Deref for PoolBox<'_, T> {
  type Target = T;

  #[inline]
  fn deref(&self) -> &T {
    unsafe { self.ptr.as_ref() }
  }
}

impl<T> DerefMut for PoolBox<'_, T> {
  #[inline]
  fn deref_mut(&mut self) -> &mut T {
    unsafe { self.ptr.as_mut() }
  }
}

impl<T> Drop for PoolBox<'_, T> {
  fn drop(&mut self) {
    unsafe {
      ptr::drop_in_place(self.ptr.as_ptr());
      if size_of::<T>() != 0 {
        self.pool.deallocate(self.ptr.cast(), size_of::<T>());
      }
    }
  }
}

impl<T: fmt::Debug> fmt::Debug for PoolBox<'_, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    (**self).fmt(f)
  }
}

// SAFETY: a PoolBox is an owning pointer like Box, and the pool handle it
// carries is shareable across threads; cross-thread frees are supported by
// the tiers.
unsafe impl<T: Send> Send for PoolBox<'_, T> {}
unsafe impl<T: Sync> Sync for PoolBox<'_, T> {}

//! A thread-caching, tiered small-object allocator.
//!
//! Allocations up to [`MAX_BYTES`] are served from three tiers: an
//! unsynchronized per-thread cache, a shared central cache with one locked
//! free list per size class, and a page cache that carves and recycles
//! multi-page spans from the OS. Larger requests bypass the tiers through
//! a general-purpose fallback.
//!
//! ```
//! use stratalloc::Pool;
//!
//! let pool = Pool::new();
//! let block = pool.allocate(64)?;
//! unsafe { pool.deallocate(block, 64) };
//!
//! let mut value = pool.boxed(42u64)?;
//! *value += 1;
//! assert_eq!(*value, 43);
//! # Ok::<(), stratalloc::AllocError>(())
//! ```

mod block;
mod central_cache;
mod error;
mod page_cache;
mod platform;
mod pool;
mod size_class;
mod sync;
mod thread_cache;

pub use error::AllocError;
pub use page_cache::PageCacheStats;
pub use platform::{MmapProvider, PageProvider};
pub use pool::{Pool, PoolBox};
pub use size_class::{class_to_size, size_to_class};

// =============================================================================
// Constants
// =============================================================================

/// Block granularity; every slot size and block address is a multiple.
pub const ALIGNMENT: usize = 8;

/// Largest request the tiers serve; anything bigger takes the fallback.
pub const MAX_BYTES: usize = 256 * 1024;

/// Number of size classes, one per `ALIGNMENT` step up to `MAX_BYTES`.
pub const CLASS_COUNT: usize = MAX_BYTES / ALIGNMENT;

/// Bytes per page; span lengths are counted in these.
pub const PAGE_SIZE: usize = 4096;

/// Pages per batch span when the central tier refills a class.
pub const SPAN_PAGES: usize = 8;

/// Per-class thread-cache depth that triggers a shed back to the central
/// tier.
pub const HIGH_WATER: usize = 64;

// =============================================================================
// Compile-Time Assertions
// =============================================================================

const _: () = assert!(ALIGNMENT.is_power_of_two());
// A free block's first word stores the next-link.
const _: () = assert!(ALIGNMENT >= size_of::<*mut u8>());
const _: () = assert!(PAGE_SIZE.is_power_of_two());
const _: () = assert!(PAGE_SIZE % ALIGNMENT == 0);
const _: () = assert!(MAX_BYTES % ALIGNMENT == 0);
const _: () = assert!(MAX_BYTES >= PAGE_SIZE);
const _: () = assert!(SPAN_PAGES >= 1);
const _: () = assert!(HIGH_WATER >= 4);
const _: () = assert!(class_to_size(0) == ALIGNMENT);
const _: () = assert!(class_to_size(CLASS_COUNT - 1) == MAX_BYTES);
const _: () = assert!(size_to_class(1) == 0);
const _: () = assert!(size_to_class(MAX_BYTES) == CLASS_COUNT - 1);

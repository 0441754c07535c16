//! Request-size to size-class mapping.
//!
//! Classes are linear: class `i` serves slots of `(i + 1) * ALIGNMENT`
//! bytes, so every request is rounded up to the next 8-byte boundary and
//! never wastes more than `ALIGNMENT - 1` bytes.

use crate::{ALIGNMENT, CLASS_COUNT, MAX_BYTES};

/// Convert a request size to its class index (inverse of `class_to_size`).
///
/// Callers must have rejected zero and oversized requests already.
#[inline(always)]
pub const fn size_to_class(size: usize) -> usize {
  debug_assert!(size > 0 && size <= MAX_BYTES);
  (size - 1) / ALIGNMENT
}

/// Convert a class index to its slot size (inverse of `size_to_class`).
#[inline(always)]
pub const fn class_to_size(class: usize) -> usize {
  debug_assert!(class < CLASS_COUNT);
  (class + 1) * ALIGNMENT
}

use thiserror::Error;

/// Failures surfaced by the allocation surface.
///
/// Invalid arguments and exhaustion are the only two ways a request can
/// fail; everything else in the tiers is infallible by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  /// A zero byte (or zero page) request.
  #[error("zero-size allocation request")]
  ZeroSize,
  /// The OS refused to provide backing pages, or the oversized fallback
  /// failed.
  #[error("backing memory exhausted")]
  OutOfMemory,
}

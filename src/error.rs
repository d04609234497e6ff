use thiserror::Error;

use crate::block::Offset;

/// Why the program break could not be moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BreakError {
  #[error("the program break cannot move by {0} bytes")]
  Exhausted(usize),
  #[error("a request of {0} bytes does not fit in the address space")]
  Overflow(usize),
  #[error("the heap limit of {limit} bytes would be exceeded")]
  Limit { limit: usize },
  #[error("the program break was moved outside of this heap")]
  Moved,
  #[error("the program break is not word aligned")]
  Misaligned,
}

/// Errors reported by [`Heap`](crate::Heap) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  #[error("out of memory: the heap cannot grow by {requested} bytes")]
  OutOfMemory {
    requested: usize,
    #[source]
    source: BreakError,
  },
  #[error("{0:#x} is not a live allocation of this heap")]
  InvalidPointer(usize),
}

impl AllocError {
  pub fn is_out_of_memory(&self) -> bool {
    matches!(self, Self::OutOfMemory { .. })
  }
}

/// A broken heap invariant, as found by [`Heap::check`](crate::Heap::check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
  #[error("expected a block at offset {expected:#x}, found one at {found:#x}")]
  Gap { expected: Offset, found: Offset },
  #[error("block at offset {0:#x} has a back link that does not match its predecessor")]
  BrokenLink(Offset),
  #[error("block at offset {0:#x} has an unaligned or undersized payload")]
  Misaligned(Offset),
  #[error("block at offset {0:#x} and its predecessor are both free")]
  AdjacentFree(Offset),
  #[error("blocks cover {covered} bytes but the heap spans {len}")]
  Extent { covered: usize, len: usize },
}

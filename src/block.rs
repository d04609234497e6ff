use core::mem;

use crate::{align, align::ALIGNMENT};

/// Byte offset of a block header, counted from the start of the heap.
pub type Offset = usize;

/// Sentinel stored in a link field that points nowhere.
const NIL: usize = usize::MAX;

/// Header written in front of every payload.
///
/// The links are offsets rather than pointers, so a header stays meaningful
/// wherever the heap happens to start.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
  pub size: usize,
  prev: usize,
  next: usize,
  pub is_free: bool,
}

impl Block {
  pub fn new(
    size: usize,
    is_free: bool,
    prev: Option<Offset>,
    next: Option<Offset>,
  ) -> Self {
    Self {
      size,
      prev: prev.unwrap_or(NIL),
      next: next.unwrap_or(NIL),
      is_free,
    }
  }

  pub fn prev(&self) -> Option<Offset> {
    (self.prev != NIL).then_some(self.prev)
  }

  pub fn next(&self) -> Option<Offset> {
    (self.next != NIL).then_some(self.next)
  }

  pub fn set_prev(
    &mut self,
    prev: Option<Offset>,
  ) {
    self.prev = prev.unwrap_or(NIL);
  }

  pub fn set_next(
    &mut self,
    next: Option<Offset>,
  ) {
    self.next = next.unwrap_or(NIL);
  }
}

/// Bytes taken by a header, padded so the payload behind it stays aligned.
pub const HEADER_SIZE: usize = align!(mem::size_of::<Block>());

/// Smallest payload a block may carry.
pub const MIN_PAYLOAD: usize = ALIGNMENT;

/// A split only happens when the remainder can hold a header and a minimal
/// payload; anything smaller would be a sliver nobody could use.
pub const MIN_SPLIT: usize = HEADER_SIZE + MIN_PAYLOAD;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_keeps_payload_aligned() {
    assert_eq!(HEADER_SIZE % ALIGNMENT, 0);
    assert!(HEADER_SIZE >= mem::size_of::<Block>());
    assert!(mem::align_of::<Block>() <= ALIGNMENT);
  }

  #[test]
  fn test_links() {
    let mut block = Block::new(16, false, None, Some(48));

    assert_eq!(block.prev(), None);
    assert_eq!(block.next(), Some(48));

    block.set_prev(Some(0));
    block.set_next(None);

    assert_eq!(block.prev(), Some(0));
    assert_eq!(block.next(), None);
  }
}

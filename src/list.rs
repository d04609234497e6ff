//! The address-ordered block list.
//!
//! ```text
//!   base                                                          end
//!    │                                                              │
//!    ▼                                                              ▼
//!    ┌────────┬──────────┬────────┬──────────────┬────────┬─────────┐
//!    │ header │ payload  │ header │   payload    │ header │ payload │
//!    └────────┴──────────┴────────┴──────────────┴────────┴─────────┘
//!    0        ▲          next     ▲              next
//!             │                   │
//!             └── handed out      └── handed out
//! ```
//!
//! Blocks are addressed by their offset from `base`. Headers are read and
//! written by value, so no reference into the heap ever outlives a call.

use core::ptr::NonNull;

use crate::{
  align::ALIGNMENT,
  block::{Block, HEADER_SIZE, MIN_SPLIT, Offset},
};

/// Outcome of a first-fit search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fit {
  /// The heap holds no blocks at all.
  Empty,
  /// First free block that is large enough.
  Found(Offset),
  /// Nothing fits; the search ended at this tail block.
  Exhausted { last: Offset },
}

pub(crate) struct BlockList {
  base: NonNull<u8>,
  len: usize,
}

impl BlockList {
  pub fn new() -> Self {
    Self {
      base: NonNull::dangling(),
      len: 0,
    }
  }

  /// Address of the first header, or `None` while the heap is empty.
  pub fn base(&self) -> Option<NonNull<u8>> {
    (self.len != 0).then_some(self.base)
  }

  /// One past the last byte covered by blocks.
  pub fn end(&self) -> Option<NonNull<u8>> {
    self
      .base()
      .map(|base| unsafe { base.add(self.len) })
  }

  /// Bytes covered by blocks, headers included.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  fn contains(
    &self,
    offset: Offset,
  ) -> bool {
    offset % ALIGNMENT == 0 && offset.checked_add(HEADER_SIZE).is_some_and(|end| end <= self.len)
  }

  fn header(
    &self,
    offset: Offset,
  ) -> *mut Block {
    debug_assert!(self.contains(offset), "offset {offset:#x} is outside the heap");
    unsafe { self.base.add(offset) }.cast::<Block>().as_ptr()
  }

  pub fn block(
    &self,
    offset: Offset,
  ) -> Block {
    unsafe { self.header(offset).read() }
  }

  fn write(
    &mut self,
    offset: Offset,
    block: Block,
  ) {
    unsafe { self.header(offset).write(block) }
  }

  fn modify(
    &mut self,
    offset: Offset,
    f: impl FnOnce(&mut Block),
  ) {
    let mut block = self.block(offset);
    f(&mut block);
    self.write(offset, block);
  }

  pub fn set_free(
    &mut self,
    offset: Offset,
    is_free: bool,
  ) {
    self.modify(offset, |block| block.is_free = is_free);
  }

  pub fn payload(
    &self,
    offset: Offset,
  ) -> NonNull<u8> {
    debug_assert!(self.contains(offset));
    unsafe { self.base.add(offset + HEADER_SIZE) }
  }

  /// Address of the header at `offset`.
  pub fn address(
    &self,
    offset: Offset,
  ) -> NonNull<u8> {
    unsafe { self.base.add(offset) }
  }

  /// Resolves a payload pointer to the offset of its header.
  ///
  /// This is the only place a payload address is turned back into a header.
  /// The candidate must sit inside the extent and be reachable from `base`;
  /// an arbitrary interior pointer never resolves.
  pub fn locate(
    &self,
    ptr: *const u8,
  ) -> Option<Offset> {
    let base = self.base()?;

    let offset = ptr
      .addr()
      .checked_sub(base.as_ptr().addr())?
      .checked_sub(HEADER_SIZE)?;

    if !self.contains(offset) {
      return None;
    }

    self
      .iter()
      .map(|(candidate, _)| candidate)
      .take_while(|&candidate| candidate <= offset)
      .any(|candidate| candidate == offset)
      .then_some(offset)
  }

  pub fn iter(&self) -> Blocks<'_> {
    Blocks {
      list: self,
      cursor: self.base().map(|_| 0),
    }
  }

  /// First-fit scan from `base`.
  pub fn find(
    &self,
    size: usize,
  ) -> Fit {
    let mut last = None;

    for (offset, block) in self.iter() {
      if block.is_free && block.size >= size {
        return Fit::Found(offset);
      }
      last = Some(offset);
    }

    match last {
      Some(last) => Fit::Exhausted { last },
      None => Fit::Empty,
    }
  }

  /// Starts an empty list at `base`, the start of freshly grown memory.
  pub fn init(
    &mut self,
    base: NonNull<u8>,
  ) {
    debug_assert!(self.is_empty());
    self.base = base;
  }

  /// Appends an allocated block of `size` payload bytes behind `last`. The
  /// memory for it must already be below the break.
  pub fn append(
    &mut self,
    last: Option<Offset>,
    size: usize,
  ) -> Offset {
    let offset = self.len;
    self.len += HEADER_SIZE + size;
    self.write(offset, Block::new(size, false, last, None));

    if let Some(last) = last {
      debug_assert_eq!(self.block(last).next(), None);
      self.modify(last, |block| block.set_next(Some(offset)));
    }

    offset
  }

  /// Grows the tail block by `delta` bytes that were just added to the break.
  pub fn widen_tail(
    &mut self,
    tail: Offset,
    delta: usize,
  ) {
    debug_assert_eq!(self.block(tail).next(), None);
    self.len += delta;
    self.modify(tail, |block| block.size += delta);
  }

  /// Carves `offset` into a block of exactly `size` bytes and a free
  /// remainder behind it. Returns the remainder, or `None` when it would be
  /// smaller than a header plus one alignment unit and the block stays
  /// oversized.
  pub fn split(
    &mut self,
    offset: Offset,
    size: usize,
  ) -> Option<Offset> {
    let mut block = self.block(offset);

    let excess = block.size.checked_sub(size)?;
    if excess < MIN_SPLIT {
      return None;
    }

    let rest = offset + HEADER_SIZE + size;
    let remainder = Block::new(excess - HEADER_SIZE, true, Some(offset), block.next());

    if let Some(next) = block.next() {
      self.modify(next, |next| next.set_prev(Some(rest)));
    }

    block.size = size;
    block.set_next(Some(rest));

    self.write(offset, block);
    self.write(rest, remainder);

    Some(rest)
  }

  /// Absorbs the free block following `offset` into it. Returns `offset`,
  /// which still names the merged block.
  pub fn fuse(
    &mut self,
    offset: Offset,
  ) -> Offset {
    let mut block = self.block(offset);

    let Some(next_offset) = block.next() else {
      return offset;
    };

    let next = self.block(next_offset);
    debug_assert!(next.is_free, "fusing with an allocated block");

    block.size += HEADER_SIZE + next.size;
    block.set_next(next.next());

    if let Some(after) = next.next() {
      self.modify(after, |after| after.set_prev(Some(offset)));
    }

    self.write(offset, block);

    offset
  }

  /// Drops the tail block at `offset` from the list. The heap becomes empty
  /// when it was the only block.
  ///
  /// `prev` is the tail's predecessor, read before the tail's memory was
  /// given back. The tail header itself is never touched here.
  pub fn truncate(
    &mut self,
    offset: Offset,
    prev: Option<Offset>,
  ) {
    debug_assert!(prev.is_none_or(|prev| prev < offset));

    if let Some(prev) = prev {
      self.modify(prev, |prev| prev.set_next(None));
    }

    self.len = offset;
  }
}

/// Walks the list in address order.
pub(crate) struct Blocks<'a> {
  list: &'a BlockList,
  cursor: Option<Offset>,
}

impl Iterator for Blocks<'_> {
  type Item = (Offset, Block);

  fn next(&mut self) -> Option<Self::Item> {
    let offset = self.cursor.filter(|&offset| self.list.contains(offset))?;
    let block = self.list.block(offset);

    // Links only point forward; anything else would loop.
    self.cursor = block.next().filter(|&next| next > offset);

    Some((offset, block))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::brk::{ProgramBreak, Region};

  fn list_with(
    region: &mut Region,
    sizes: &[usize],
  ) -> (BlockList, Vec<Offset>) {
    let mut list = BlockList::new();
    let mut offsets = Vec::new();
    let mut last = None;

    for &size in sizes {
      let previous = region.grow(HEADER_SIZE + size).unwrap();
      if list.is_empty() {
        list.init(previous);
      }
      let offset = list.append(last, size);
      offsets.push(offset);
      last = Some(offset);
    }

    (list, offsets)
  }

  #[test]
  fn test_append_links_in_address_order() {
    let mut region = Region::with_capacity(1024);
    let (list, offsets) = list_with(&mut region, &[8, 16, 24]);

    assert_eq!(offsets, vec![0, HEADER_SIZE + 8, 2 * HEADER_SIZE + 24]);
    assert_eq!(list.len(), 3 * HEADER_SIZE + 48);

    let blocks: Vec<_> = list.iter().collect();
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].1.prev(), None);
    assert_eq!(blocks[1].1.prev(), Some(offsets[0]));
    assert_eq!(blocks[2].1.next(), None);
  }

  #[test]
  fn test_find_first_fit() {
    let mut region = Region::with_capacity(1024);
    let (mut list, offsets) = list_with(&mut region, &[8, 32, 16, 64]);

    assert_eq!(list.find(8), Fit::Exhausted { last: offsets[3] });

    list.set_free(offsets[1], true);
    list.set_free(offsets[3], true);

    assert_eq!(list.find(16), Fit::Found(offsets[1]));
    assert_eq!(list.find(48), Fit::Found(offsets[3]));
    assert_eq!(list.find(128), Fit::Exhausted { last: offsets[3] });

    assert_eq!(BlockList::new().find(8), Fit::Empty);
  }

  #[test]
  fn test_split_relinks_remainder() {
    let mut region = Region::with_capacity(1024);
    let (mut list, offsets) = list_with(&mut region, &[128, 8]);

    let rest = list.split(offsets[0], 16).unwrap();

    assert_eq!(rest, HEADER_SIZE + 16);
    assert_eq!(list.block(offsets[0]).size, 16);
    assert_eq!(list.block(offsets[0]).next(), Some(rest));

    let remainder = list.block(rest);
    assert!(remainder.is_free);
    assert_eq!(remainder.size, 128 - 16 - HEADER_SIZE);
    assert_eq!(remainder.prev(), Some(offsets[0]));
    assert_eq!(remainder.next(), Some(offsets[1]));
    assert_eq!(list.block(offsets[1]).prev(), Some(rest));
  }

  #[test]
  fn test_split_refuses_slivers() {
    let mut region = Region::with_capacity(1024);
    let size = 16 + MIN_SPLIT - ALIGNMENT;
    let (mut list, offsets) = list_with(&mut region, &[size]);

    assert_eq!(list.split(offsets[0], 16), None);
    assert_eq!(list.block(offsets[0]).size, size);

    assert_eq!(list.split(offsets[0], size - MIN_SPLIT), Some(size - MIN_SPLIT + HEADER_SIZE));
    assert_eq!(list.block(HEADER_SIZE + size - MIN_SPLIT).size, ALIGNMENT);
  }

  #[test]
  fn test_fuse_absorbs_next() {
    let mut region = Region::with_capacity(1024);
    let (mut list, offsets) = list_with(&mut region, &[8, 16, 24]);

    list.set_free(offsets[1], true);

    assert_eq!(list.fuse(offsets[0]), offsets[0]);

    let merged = list.block(offsets[0]);
    assert_eq!(merged.size, 8 + HEADER_SIZE + 16);
    assert_eq!(merged.next(), Some(offsets[2]));
    assert_eq!(list.block(offsets[2]).prev(), Some(offsets[0]));
    assert_eq!(list.iter().count(), 2);
  }

  #[test]
  fn test_locate_only_resolves_payloads() {
    let mut region = Region::with_capacity(1024);
    let (list, offsets) = list_with(&mut region, &[64, 8]);

    for &offset in &offsets {
      assert_eq!(list.locate(list.payload(offset).as_ptr()), Some(offset));
    }

    let interior = unsafe { list.payload(offsets[0]).add(HEADER_SIZE + ALIGNMENT) };
    assert_eq!(list.locate(interior.as_ptr()), None);
    assert_eq!(list.locate(list.address(0).as_ptr()), None);
    assert_eq!(list.locate(core::ptr::null()), None);

    let end = list.end().unwrap();
    assert_eq!(list.locate(end.as_ptr()), None);
  }

  #[test]
  fn test_truncate_to_empty() {
    let mut region = Region::with_capacity(1024);
    let (mut list, offsets) = list_with(&mut region, &[8, 8]);

    list.truncate(offsets[1], Some(offsets[0]));
    assert_eq!(list.len(), HEADER_SIZE + 8);
    assert_eq!(list.block(offsets[0]).next(), None);

    list.truncate(offsets[0], None);
    assert!(list.is_empty());
    assert_eq!(list.base(), None);
    assert_eq!(list.iter().count(), 0);
  }

  #[test]
  fn test_truncate_leaves_tail_header_alone() {
    let mut region = Region::with_capacity(1024);
    let (mut list, offsets) = list_with(&mut region, &[8, 16]);

    // The tail's memory may already be gone; scribble over its header.
    let tail = list.header(offsets[1]).cast::<u8>();
    unsafe { core::ptr::write_bytes(tail, 0xA5, HEADER_SIZE) };

    list.truncate(offsets[1], Some(offsets[0]));

    assert_eq!(list.len(), HEADER_SIZE + 8);
    assert_eq!(list.block(offsets[0]).next(), None);
    assert_eq!(list.iter().map(|(offset, _)| offset).collect::<Vec<_>>(), [offsets[0]]);
  }
}

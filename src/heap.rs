use core::{fmt, ptr, ptr::NonNull};

use log::{debug, trace, warn};

#[cfg(any(target_os = "linux", target_os = "android"))]
use crate::brk::Sbrk;
use crate::{
  align::{ALIGNMENT, checked_align},
  block::{HEADER_SIZE, MIN_PAYLOAD, Offset},
  brk::ProgramBreak,
  config::Config,
  error::{AllocError, BreakError, Corruption},
  list::{BlockList, Fit},
};

/// A block as seen from outside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Offset of the block header from the heap base.
  pub offset: usize,
  pub payload: NonNull<u8>,
  pub size: usize,
  pub is_free: bool,
}

/// Snapshot of how the heap is carved up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes taken from the break, headers included.
  pub heap_bytes: usize,
  pub blocks: usize,
  pub free_blocks: usize,
  pub allocated_bytes: usize,
  pub free_bytes: usize,
}

/// First-fit allocator over one contiguous range obtained from a
/// [`ProgramBreak`].
///
/// A heap has a single owner: every operation takes `&mut self`. Share it
/// between threads by wrapping it in a lock.
pub struct Heap<B: ProgramBreak> {
  blocks: BlockList,
  brk: B,
  config: Config,
}

// The heap exclusively owns the memory between its base and the break.
unsafe impl<B: ProgramBreak + Send> Send for Heap<B> {}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Heap<Sbrk> {
  /// A heap on top of the process break.
  ///
  /// # Safety
  ///
  /// Same contract as [`Sbrk::new`].
  pub unsafe fn sbrk() -> Self {
    Self::new(unsafe { Sbrk::new() })
  }
}

impl<B: ProgramBreak> Heap<B> {
  pub fn new(brk: B) -> Self {
    Self::with_config(brk, Config::default())
  }

  pub fn with_config(
    brk: B,
    config: Config,
  ) -> Self {
    Self {
      blocks: BlockList::new(),
      brk,
      config,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn program_break(&self) -> &B {
    &self.brk
  }

  /// Bytes taken from the break, headers included.
  pub fn heap_size(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }

  /// Address of the first block header, `None` while the heap holds nothing.
  pub fn base(&self) -> Option<NonNull<u8>> {
    self.blocks.base()
  }

  fn request(size: usize) -> Result<usize, AllocError> {
    checked_align(size.max(MIN_PAYLOAD)).ok_or(AllocError::OutOfMemory {
      requested: size,
      source: BreakError::Overflow(size),
    })
  }

  /// Hands out at least `size` bytes, word aligned. A zero size still gets
  /// one word.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let aligned = Self::request(size)?;

    let block = match self.blocks.find(aligned) {
      Fit::Found(offset) => {
        self.blocks.split(offset, aligned);
        self.blocks.set_free(offset, false);
        offset
      }
      Fit::Exhausted { last } => self.extend(Some(last), aligned)?,
      Fit::Empty => self.extend(None, aligned)?,
    };

    let payload = self.blocks.payload(block);
    trace!("allocate({size}) -> {payload:?}");

    Ok(payload)
  }

  /// Returns an allocation to the heap.
  ///
  /// Null, foreign, interior and already released pointers are ignored: the
  /// heap never writes to memory it cannot prove is a live block.
  pub fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    let Some(block) = self.owned(ptr) else {
      warn!("release({ptr:?}) ignored: not a live allocation of this heap");
      return;
    };

    trace!("release({ptr:?})");
    self.retire(block);
  }

  /// Resizes an allocation, in place when the block or its free neighbour
  /// has room, otherwise by moving it.
  ///
  /// A null `ptr` allocates. A pointer that is not a live allocation fails
  /// with [`AllocError::InvalidPointer`] without touching anything. When a
  /// move runs out of memory the original allocation stays valid.
  pub fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if ptr.is_null() {
      return self.allocate(size);
    }

    let block = self
      .owned(ptr)
      .ok_or(AllocError::InvalidPointer(ptr.addr()))?;
    let aligned = Self::request(size)?;

    let current = self.blocks.block(block);
    let payload = self.blocks.payload(block);

    if current.size >= aligned {
      self.shrink_in_place(block, aligned);
      trace!("reallocate({ptr:?}, {size}) shrank in place");
      return Ok(payload);
    }

    if let Some(next) = current.next() {
      let neighbour = self.blocks.block(next);

      if neighbour.is_free && current.size + HEADER_SIZE + neighbour.size >= aligned {
        self.blocks.fuse(block);
        self.shrink_in_place(block, aligned);
        trace!("reallocate({ptr:?}, {size}) grew in place");
        return Ok(payload);
      }
    }

    let moved = self.allocate(aligned)?;

    unsafe {
      ptr::copy_nonoverlapping(payload.as_ptr(), moved.as_ptr(), current.size.min(size));
    }

    self.retire(block);
    trace!("reallocate({ptr:?}, {size}) moved to {moved:?}");

    Ok(moved)
  }

  /// Whether `ptr` is the payload address of a live allocation.
  pub fn is_owned(
    &self,
    ptr: *const u8,
  ) -> bool {
    self.owned(ptr).is_some()
  }

  /// Payload bytes available behind a live allocation.
  pub fn usable_size(
    &self,
    ptr: *const u8,
  ) -> Option<usize> {
    self.owned(ptr).map(|block| self.blocks.block(block).size)
  }

  fn owned(
    &self,
    ptr: *const u8,
  ) -> Option<Offset> {
    self
      .blocks
      .locate(ptr)
      .filter(|&block| !self.blocks.block(block).is_free)
  }

  /// Takes `size` more bytes from the break for a block behind `last`.
  fn extend(
    &mut self,
    last: Option<Offset>,
    size: usize,
  ) -> Result<Offset, AllocError> {
    if let Some(tail) = last {
      let block = self.blocks.block(tail);

      // A free tail only survives when trimming is off or the break moved.
      if block.is_free {
        let delta = size - block.size;
        self.grow(delta)?;
        self.blocks.widen_tail(tail, delta);
        self.blocks.set_free(tail, false);
        return Ok(tail);
      }
    }

    let increment = HEADER_SIZE
      .checked_add(size)
      .ok_or(AllocError::OutOfMemory {
        requested: size,
        source: BreakError::Overflow(size),
      })?;

    self.grow(increment)?;

    Ok(self.blocks.append(last, size))
  }

  /// Moves the break up by `increment` bytes, which must land directly
  /// behind the heap.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<(), AllocError> {
    let oom = |source| AllocError::OutOfMemory {
      requested: increment,
      source,
    };

    if let Some(limit) = self.config.limit {
      let total = self.blocks.len().checked_add(increment);

      if total.is_none_or(|total| total > limit) {
        return Err(oom(BreakError::Limit { limit }));
      }
    }

    let previous = self.brk.grow(increment).map_err(oom)?;

    match self.blocks.end() {
      None if previous.as_ptr().addr() % ALIGNMENT != 0 => {
        self.rollback(previous, increment);
        return Err(oom(BreakError::Misaligned));
      }
      None => self.blocks.init(previous),
      Some(end) if end == previous => {}
      Some(end) => {
        warn!("break at {previous:?} is not the heap end {end:?}");
        self.rollback(previous, increment);
        return Err(oom(BreakError::Moved));
      }
    }

    debug!("heap grew by {increment} bytes at {previous:?}");

    Ok(())
  }

  fn rollback(
    &mut self,
    previous: NonNull<u8>,
    increment: usize,
  ) {
    let top = unsafe { previous.add(increment) };

    if let Err(err) = self.brk.shrink(top, previous) {
      warn!("could not give {increment} bytes at {previous:?} back: {err}");
    }
  }

  /// Marks `block` free and merges it with its free neighbours, left first,
  /// then gives it back to the break if it ended up last.
  fn retire(
    &mut self,
    block: Offset,
  ) {
    self.blocks.set_free(block, true);

    let mut current = block;

    if let Some(prev) = self.blocks.block(current).prev() {
      if self.blocks.block(prev).is_free {
        current = self.blocks.fuse(prev);
      }
    }

    if let Some(next) = self.blocks.block(current).next() {
      if self.blocks.block(next).is_free {
        current = self.blocks.fuse(current);
      }
    }

    if self.config.trim && self.blocks.block(current).next().is_none() {
      self.trim(current);
    }
  }

  fn shrink_in_place(
    &mut self,
    block: Offset,
    size: usize,
  ) {
    if let Some(rest) = self.blocks.split(block, size) {
      self.retire(rest);
    }
  }

  /// Lowers the break to the start of the free tail block.
  fn trim(
    &mut self,
    tail: Offset,
  ) {
    let Some(top) = self.blocks.end() else {
      return;
    };
    let new_top = self.blocks.address(tail);
    // The tail header is unreadable once the break has moved below it.
    let prev = self.blocks.block(tail).prev();

    match self.brk.shrink(top, new_top) {
      Ok(()) => {
        self.blocks.truncate(tail, prev);
        debug!("heap shrank to {} bytes", self.blocks.len());
      }
      Err(err) => debug!("free tail at {tail:#x} kept: {err}"),
    }
  }

  /// Every block in address order.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.blocks.iter().map(|(offset, block)| BlockInfo {
      offset,
      payload: self.blocks.payload(offset),
      size: block.size,
      is_free: block.is_free,
    })
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(
      HeapStats {
        heap_bytes: self.blocks.len(),
        ..HeapStats::default()
      },
      |mut stats, block| {
        stats.blocks += 1;

        if block.is_free {
          stats.free_blocks += 1;
          stats.free_bytes += block.size;
        } else {
          stats.allocated_bytes += block.size;
        }

        stats
      },
    )
  }

  /// Walks the whole list and verifies the heap invariants: blocks tile the
  /// heap without gaps, back links match, sizes are aligned and no two
  /// neighbours are both free.
  pub fn check(&self) -> Result<(), Corruption> {
    let mut expected = 0;
    let mut prev: Option<(Offset, bool)> = None;

    for (offset, block) in self.blocks.iter() {
      if offset != expected {
        return Err(Corruption::Gap {
          expected,
          found: offset,
        });
      }

      if block.prev() != prev.map(|(offset, _)| offset) {
        return Err(Corruption::BrokenLink(offset));
      }

      if block.size < MIN_PAYLOAD || block.size % ALIGNMENT != 0 {
        return Err(Corruption::Misaligned(offset));
      }

      if block.is_free && prev.is_some_and(|(_, is_free)| is_free) {
        return Err(Corruption::AdjacentFree(offset));
      }

      expected = offset + HEADER_SIZE + block.size;
      prev = Some((offset, block.is_free));
    }

    if expected != self.blocks.len() {
      return Err(Corruption::Extent {
        covered: expected,
        len: self.blocks.len(),
      });
    }

    Ok(())
  }
}

impl<B: ProgramBreak> Drop for Heap<B> {
  fn drop(&mut self) {
    let (Some(base), Some(top)) = (self.blocks.base(), self.blocks.end()) else {
      return;
    };

    match self.brk.shrink(top, base) {
      Ok(()) => debug!("heap gave {} bytes back", self.blocks.len()),
      Err(err) => warn!("heap at {base:?} leaked {} bytes: {err}", self.blocks.len()),
    }
  }
}

impl<B: ProgramBreak> fmt::Display for Heap<B> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    if self.is_empty() {
      return f.write_str("(empty)");
    }

    for (i, block) in self.blocks().enumerate() {
      if i > 0 {
        f.write_str(" ")?;
      }

      let state = if block.is_free { "free" } else { "used" };
      write!(f, "[{:#x} {} {}]", block.offset, state, block.size)?;
    }

    Ok(())
  }
}

impl<B: ProgramBreak + fmt::Debug> fmt::Debug for Heap<B> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Heap")
      .field("base", &self.base())
      .field("size", &self.heap_size())
      .field("brk", &self.brk)
      .field("config", &self.config)
      .finish()
  }
}

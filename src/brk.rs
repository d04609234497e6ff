//! Heap extenders: where the memory behind a [`Heap`](crate::Heap) comes from.

use core::{fmt, ptr, ptr::NonNull};

#[cfg(any(target_os = "linux", target_os = "android"))]
use libc::{brk, c_void, intptr_t, sbrk};
use log::trace;

use crate::{align::ALIGNMENT, error::BreakError};

/// A contiguous memory boundary that moves up to hand out memory and back
/// down to take it back, in the manner of `brk(2)`.
///
/// # Safety
///
/// Every address returned by [`grow`](ProgramBreak::grow) must be
/// [`ALIGNMENT`]-aligned and start `increment` bytes of writable memory that
/// nothing else touches until [`shrink`](ProgramBreak::shrink) gives them
/// back. The heap relies on this to write its headers.
pub unsafe trait ProgramBreak {
  /// Moves the break up by `increment` bytes and returns the previous break.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, BreakError>;

  /// Moves the break from `top` back down to `new_top`.
  ///
  /// `top` is where the caller last left the break. Implementations refuse to
  /// shrink when the break is somewhere else.
  fn shrink(
    &mut self,
    top: NonNull<u8>,
    new_top: NonNull<u8>,
  ) -> Result<(), BreakError>;
}

unsafe impl<B: ProgramBreak + ?Sized> ProgramBreak for &mut B {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, BreakError> {
    (**self).grow(increment)
  }

  fn shrink(
    &mut self,
    top: NonNull<u8>,
    new_top: NonNull<u8>,
  ) -> Result<(), BreakError> {
    (**self).shrink(top, new_top)
  }
}

/// The process break itself, moved with `sbrk(2)` and `brk(2)`.
///
/// Only built for Linux and Android, where both calls take and return
/// `void *` and `brk` reports failure with `-1`.
#[cfg(any(target_os = "linux", target_os = "android"))]
#[derive(Debug)]
pub struct Sbrk {
  /// Start of every padded growth still below the break, paired with the
  /// unaligned break it began at.
  padded: Vec<(usize, usize)>,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Sbrk {
  /// # Safety
  ///
  /// The caller must make sure nothing else lowers the program break below
  /// memory this backend has handed out, and that at most one heap uses
  /// `Sbrk` at any time.
  pub unsafe fn new() -> Self {
    Self { padded: Vec::new() }
  }

  /// The current program break, `sbrk(0)`.
  pub fn current(&self) -> *mut u8 {
    unsafe { sbrk(0) }.cast()
  }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe impl ProgramBreak for Sbrk {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, BreakError> {
    let current = self.current();
    let padding = current.align_offset(ALIGNMENT);

    let total = increment
      .checked_add(padding)
      .and_then(|total| intptr_t::try_from(total).ok())
      .ok_or(BreakError::Overflow(increment))?;

    let previous = unsafe { sbrk(total) };

    if previous == usize::MAX as *mut c_void {
      return Err(BreakError::Exhausted(increment));
    }

    trace!("sbrk({total}) moved the break from {previous:?}");

    if previous.cast::<u8>() != current {
      // Someone moved the break between the two calls, so the padding is off.
      unsafe { sbrk(-total) };
      return Err(BreakError::Moved);
    }

    let start =
      NonNull::new(current.wrapping_add(padding)).ok_or(BreakError::Exhausted(increment))?;

    if padding != 0 {
      self.padded.push((start.as_ptr().addr(), current.addr()));
    }

    Ok(start)
  }

  fn shrink(
    &mut self,
    top: NonNull<u8>,
    new_top: NonNull<u8>,
  ) -> Result<(), BreakError> {
    if self.current() != top.as_ptr() {
      return Err(BreakError::Moved);
    }

    // Shrinking back to the start of a padded growth gives the padding back.
    let new_addr = new_top.as_ptr().addr();
    let target = match self.padded.iter().find(|&&(start, _)| start == new_addr) {
      Some(&(_, unaligned)) => new_top.as_ptr().with_addr(unaligned),
      None => new_top.as_ptr(),
    };

    if unsafe { brk(target.cast()) } != 0 {
      let decrement = top.as_ptr().addr().saturating_sub(target.addr());
      return Err(BreakError::Exhausted(decrement));
    }

    self.padded.retain(|&(start, _)| start < new_addr);

    trace!("brk moved the break from {top:?} down to {target:?}");

    Ok(())
  }
}

/// Byte written over memory a [`Region`] takes back.
pub(crate) const POISON: u8 = 0xA5;

/// A private break over one fixed, pre-allocated buffer.
///
/// Growing past the capacity fails the way `sbrk` fails when the process
/// runs out of address space, which makes out-of-memory paths testable.
/// Memory given back by [`shrink`](ProgramBreak::shrink) is overwritten with
/// `0xA5` bytes, so anything still reading above the break sees garbage.
pub struct Region {
  memory: NonNull<usize>,
  words: usize,
  brk: usize,
}

// The buffer is owned exclusively by the region.
unsafe impl Send for Region {}

impl Region {
  /// Creates a region able to hand out `bytes` bytes, rounded up to whole
  /// words.
  pub fn with_capacity(bytes: usize) -> Self {
    let words = bytes.div_ceil(ALIGNMENT);
    let memory: Box<[usize]> = vec![0; words].into_boxed_slice();

    Self {
      memory: NonNull::from(Box::leak(memory)).cast(),
      words,
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.words * ALIGNMENT
  }

  /// Bytes currently below the break.
  pub fn used(&self) -> usize {
    self.brk
  }

  fn start(&self) -> NonNull<u8> {
    self.memory.cast()
  }
}

unsafe impl ProgramBreak for Region {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, BreakError> {
    let top = self
      .brk
      .checked_add(increment)
      .ok_or(BreakError::Overflow(increment))?;

    if top > self.capacity() {
      return Err(BreakError::Exhausted(increment));
    }

    let previous = unsafe { self.start().add(self.brk) };
    self.brk = top;

    Ok(previous)
  }

  fn shrink(
    &mut self,
    top: NonNull<u8>,
    new_top: NonNull<u8>,
  ) -> Result<(), BreakError> {
    let start = self.start().as_ptr().addr();

    if top.as_ptr().addr() != start + self.brk {
      return Err(BreakError::Moved);
    }

    let brk = new_top
      .as_ptr()
      .addr()
      .checked_sub(start)
      .filter(|&brk| brk <= self.brk)
      .ok_or(BreakError::Moved)?;

    unsafe { ptr::write_bytes(new_top.as_ptr(), POISON, self.brk - brk) };
    self.brk = brk;

    Ok(())
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    let memory = ptr::slice_from_raw_parts_mut(self.memory.as_ptr(), self.words);
    drop(unsafe { Box::from_raw(memory) });
  }
}

impl fmt::Debug for Region {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Region")
      .field("start", &self.start())
      .field("capacity", &self.capacity())
      .field("used", &self.brk)
      .finish()
  }
}

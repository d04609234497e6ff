#![cfg(any(target_os = "linux", target_os = "android"))]

//! Runs in its own process so nothing else moves the break meanwhile.

use brkalloc::{Heap, align::ALIGNMENT};

#[test]
fn padding_goes_back_with_the_heap() {
  // Leave the break one byte past a word boundary.
  let aligned = unsafe { libc::sbrk(0) }.cast::<u8>();
  let skew = ALIGNMENT - aligned.addr() % ALIGNMENT + 1;
  unsafe { libc::sbrk(skew as libc::intptr_t) };
  let start = unsafe { libc::sbrk(0) }.cast::<u8>();
  assert_ne!(start.addr() % ALIGNMENT, 0);

  let mut heap = unsafe { Heap::sbrk() };

  let a = heap.allocate(24).unwrap();
  let b = heap.allocate(512).unwrap();
  assert_eq!(a.as_ptr().addr() % ALIGNMENT, 0);

  heap.release(a.as_ptr());
  heap.release(b.as_ptr());

  assert!(heap.is_empty());
  assert_eq!(heap.program_break().current(), start);

  let c = heap.allocate(8).unwrap();
  assert_eq!(c.as_ptr().addr() % ALIGNMENT, 0);
  drop(heap);

  assert_eq!(unsafe { libc::sbrk(0) }.cast::<u8>(), start);
  unsafe { libc::sbrk(-(skew as libc::intptr_t)) };
}

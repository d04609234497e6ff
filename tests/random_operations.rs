use std::ptr::{self, NonNull};

use brkalloc::{Heap, Region, align::ALIGNMENT};
use rand::{Rng, SeedableRng, rngs::StdRng};

struct Live {
  ptr: NonNull<u8>,
  len: usize,
  fill: u8,
}

impl Live {
  fn bytes(&self) -> &[u8] {
    unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
  }

  fn paint(&self) {
    unsafe { ptr::write_bytes(self.ptr.as_ptr(), self.fill, self.len) };
  }

  fn is_intact(&self) -> bool {
    self.bytes().iter().all(|&byte| byte == self.fill)
  }
}

fn assert_disjoint(live: &[Live]) {
  let mut ranges: Vec<_> = live
    .iter()
    .map(|live| (live.ptr.as_ptr().addr(), live.len.max(1)))
    .collect();
  ranges.sort_unstable();

  for pair in ranges.windows(2) {
    assert!(pair[0].0 + pair[0].1 <= pair[1].0, "{pair:x?} overlap");
  }
}

fn run(seed: u64) {
  let mut rng = StdRng::seed_from_u64(seed);
  let mut heap = Heap::new(Region::with_capacity(4 << 20));
  let mut live: Vec<Live> = Vec::new();

  for step in 0..1500 {
    let op = rng.gen_range(0..10);

    if op < 4 || live.is_empty() {
      let len = rng.gen_range(0..512);
      let ptr = heap.allocate(len).unwrap();
      let new = Live {
        ptr,
        len,
        fill: rng.gen_range(1..=255),
      };
      new.paint();
      live.push(new);
    } else if op < 7 {
      let old = live.swap_remove(rng.gen_range(0..live.len()));
      assert!(old.is_intact(), "seed {seed} step {step}: block overwritten");

      let size = heap.stats().heap_bytes;
      heap.release(old.ptr.as_ptr());
      assert!(heap.heap_size() <= size);
    } else {
      let index = rng.gen_range(0..live.len());
      let len = rng.gen_range(0..768);
      let kept = live[index].len.min(len);
      let fill = live[index].fill;

      let ptr = heap.reallocate(live[index].ptr.as_ptr(), len).unwrap();
      let moved = Live { ptr, len, fill };

      assert!(
        moved.bytes()[..kept].iter().all(|&byte| byte == fill),
        "seed {seed} step {step}: reallocate lost contents"
      );

      live[index] = Live {
        fill: fill.wrapping_add(1).max(1),
        ..moved
      };
      live[index].paint();
    }

    heap
      .check()
      .unwrap_or_else(|err| panic!("seed {seed} step {step}: {err}\n{heap}"));

    for live in &live {
      assert_eq!(live.ptr.as_ptr().addr() % ALIGNMENT, 0);
      assert!(heap.is_owned(live.ptr.as_ptr()));
      assert!(heap.usable_size(live.ptr.as_ptr()).unwrap() >= live.len);
    }

    if step % 100 == 0 {
      assert_disjoint(&live);
      assert!(live.iter().all(Live::is_intact));
    }
  }

  assert_disjoint(&live);

  for live in live.drain(..) {
    assert!(live.is_intact());
    heap.release(live.ptr.as_ptr());
    heap.check().unwrap();
  }

  assert!(heap.is_empty());
  assert_eq!(heap.program_break().used(), 0);
}

#[test]
fn random_operations_keep_the_heap_consistent() {
  for seed in 0..4 {
    run(seed);
  }
}

#[test]
fn released_memory_is_reused_before_growing() {
  let mut rng = StdRng::seed_from_u64(42);
  let mut heap = Heap::new(Region::with_capacity(1 << 20));

  let ptrs: Vec<_> = (0..64)
    .map(|_| heap.allocate(rng.gen_range(1..256)).unwrap())
    .collect();
  let size = heap.heap_size();

  for ptr in ptrs.iter().step_by(2) {
    heap.release(ptr.as_ptr());
  }

  // Everything freed had room for at least one byte.
  for _ in 0..32 {
    heap.allocate(1).unwrap();
  }

  assert_eq!(heap.heap_size(), size);
  heap.check().unwrap();
}

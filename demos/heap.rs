// Everything below drives the process break, which only Linux and Android expose.
#![cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code, unused_imports))]

use std::{alloc::Layout, error::Error, io::Read, ptr};

use brkalloc::{Heap, ProgramBreak};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Prints the heap's log lines to stderr.
struct StderrLogger;

impl Log for StderrLogger {
  fn enabled(
    &self,
    metadata: &Metadata,
  ) -> bool {
    metadata.level() <= Level::Debug
  }

  fn log(
    &self,
    record: &Record,
  ) {
    if self.enabled(record.metadata()) {
      eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
    }
  }

  fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break and the block map.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn print_heap<B: ProgramBreak>(
  label: &str,
  heap: &Heap<B>,
) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { libc::sbrk(0) },
  );
  println!("[{label}] blocks: {heap}");
}

fn print_alloc(
  layout: Layout,
  addr: *mut u8,
) {
  println!("Allocated {} bytes, address = {:?}", layout.size(), addr);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn main() -> Result<(), Box<dyn Error>> {
  if log::set_logger(&LOGGER).is_ok() {
    log::set_max_level(LevelFilter::Debug);
  }

  // SAFETY: nothing else in this program calls brk, and the system
  // allocator never lowers the break below memory it did not take itself.
  let mut heap = unsafe { Heap::sbrk() };

  print_heap("start", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate space for a u32. The first allocation grows the break.
  // --------------------------------------------------------------------
  let layout_u32 = Layout::new::<u32>();
  let first_block = heap.allocate(layout_u32.size())?;
  println!("\n[1] Allocate u32");
  print_alloc(layout_u32, first_block.as_ptr());

  let first_ptr = first_block.cast::<u32>();
  unsafe { first_ptr.write(0xDEADBEEF) };
  println!("[1] Value written to first_block = 0x{:X}", unsafe { first_ptr.read() });

  print_heap("1", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 12 bytes. The size is padded to whole words.
  // --------------------------------------------------------------------
  let layout_12_bytes = Layout::array::<u8>(12)?;
  let second_block = heap.allocate(layout_12_bytes.size())?;
  println!("\n[2] Allocate [u8; 12]");
  print_alloc(layout_12_bytes, second_block.as_ptr());

  unsafe { ptr::write_bytes(second_block.as_ptr(), 0xAB, layout_12_bytes.size()) };
  println!(
    "[2] Usable size = {:?}",
    heap.usable_size(second_block.as_ptr())
  );

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Allocate a u64 to check alignment.
  // --------------------------------------------------------------------
  let layout_u64 = Layout::new::<u64>();
  let third_block = heap.allocate(layout_u64.size())?;
  println!("\n[3] Allocate u64 (observe alignment)");
  print_alloc(layout_u64, third_block.as_ptr());

  let addr_third = third_block.as_ptr().addr();
  println!(
    "[3] Address = {:#X}, addr % align = {}",
    addr_third,
    addr_third % layout_u64.align()
  );

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Allocate an array of u16 so there is a block behind the others.
  // --------------------------------------------------------------------
  let layout_u16_array = Layout::new::<[u16; 16]>();
  let fourth_block = heap.allocate(layout_u16_array.size())?;
  println!("\n[4] Allocate [u16; 16]");
  print_alloc(layout_u16_array, fourth_block.as_ptr());

  print_heap("4", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Release the first block. It is not the tail, so it stays in the
  //    list as a free block.
  // --------------------------------------------------------------------
  heap.release(first_block.as_ptr());
  println!("\n[5] Released first_block at {:?}", first_block);
  print_heap("5", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Allocate 2 bytes: first fit hands back the freed block.
  // --------------------------------------------------------------------
  let fifth_block = heap.allocate(2)?;
  println!("\n[6] Allocate [u8; 2] (check reuse of freed block)");
  println!(
    "[6] fifth_block == first_block? {}",
    if fifth_block == first_block {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 7) Release the third and then the second block: they merge into one.
  // --------------------------------------------------------------------
  heap.release(third_block.as_ptr());
  heap.release(second_block.as_ptr());
  println!("\n[7] Released second and third block");
  print_heap("7", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 8) Grow the reused block. Its free neighbour has room, so it grows in
  //    place and keeps its address.
  // --------------------------------------------------------------------
  let grown = heap.reallocate(fifth_block.as_ptr(), 24)?;
  println!(
    "\n[8] Reallocate to 24 bytes: {:?} -> {:?}",
    fifth_block, grown
  );
  print_heap("8", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 9) Allocate a large block to observe heap growth, then release it and
  //    watch the break move back down.
  // --------------------------------------------------------------------
  print_heap("before large alloc", &heap);

  let layout_big = Layout::array::<u8>(64 * 1024)?;
  let big_block = heap.allocate(layout_big.size())?;
  println!("\n[9] Allocate large 64 KiB block");
  print_alloc(layout_big, big_block.as_ptr());
  print_heap("after large alloc", &heap);

  heap.release(big_block.as_ptr());
  print_heap("after large release", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 10) Foreign pointers are ignored.
  // --------------------------------------------------------------------
  let mut local = 0u8;
  heap.release(&mut local);
  println!(
    "\n[10] reallocate(foreign) = {:?}",
    heap.reallocate(&mut local, 8)
  );

  println!("\n[11] {:?}", heap.stats());
  heap.check()?;

  // Dropping the heap moves the break back to where it started.
  drop(heap);
  println!("[11] End of example, program break = {:?}", unsafe { libc::sbrk(0) });

  Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn main() {
  eprintln!("this demo needs sbrk(2), available on Linux and Android");
}

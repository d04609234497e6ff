//! # brkalloc - A First-Fit Heap over the Program Break
//!
//! This crate provides a small **first-fit free-list allocator** that carves
//! allocations out of one contiguous range obtained by moving a program
//! break, the way `malloc` did on top of `sbrk(2)`.
//!
//! ## Overview
//!
//! Every allocation is a block: a header followed by its payload. Blocks tile
//! the heap end to end, in address order, with no gaps between them:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                             HEAP MEMORY                              │
//!   │                                                                      │
//!   │   ┌────┬─────┬────┬─────────┬────┬─────┬────┬──────────────┐         │
//!   │   │ H  │ A1  │ H  │  free   │ H  │ A2  │ H  │      A3      │         │
//!   │   └────┴─────┴────┴─────────┴────┴─────┴────┴──────────────┘         │
//!   │   ▲                                                        ▲         │
//!   │   │                                                        │         │
//!   │  base                                                   Program      │
//!   │                                                          Break       │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   allocate: first free block that fits, else grow the break.
//!   release:  mark free, merge with free neighbours, trim the tail.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - Alignment unit and the align! macro
//!   ├── block      - Block header layout (internal)
//!   ├── list       - Address-ordered block list: find, split, fuse (internal)
//!   ├── brk        - Heap extenders: Sbrk and Region
//!   ├── config     - Heap limit and tail trimming
//!   ├── error      - AllocError, BreakError, Corruption
//!   └── heap       - Heap: allocate, reallocate, release
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkalloc::{Heap, Region};
//!
//! let mut heap = Heap::new(Region::with_capacity(4096));
//!
//! let ptr = heap.allocate(8).unwrap().cast::<u64>();
//! unsafe { ptr.write(42) };
//!
//! let ptr = heap.reallocate(ptr.as_ptr().cast(), 64).unwrap().cast::<u64>();
//! assert_eq!(unsafe { ptr.read() }, 42);
//!
//! heap.release(ptr.as_ptr().cast());
//! assert!(heap.is_empty());
//! ```
//!
//! ## How It Works
//!
//! A released block is merged with a free predecessor first and then with a
//! free successor, so no two neighbours are ever both free:
//!
//! ```text
//!   release(B) with A and C free:
//!
//!   ┌───┬────────┬───┬────────┬───┬────────┬───┬────────┐
//!   │ H │ A free │ H │ B used │ H │ C free │ H │ D used │
//!   └───┴────────┴───┴────────┴───┴────────┴───┴────────┘
//!                          │
//!                          ▼
//!   ┌───┬──────────────────────────────────────┬───┬────────┐
//!   │ H │          A + B + C, free             │ H │ D used │
//!   └───┴──────────────────────────────────────┴───┴────────┘
//! ```
//!
//! When the block that ends up free is the last one, the break moves back
//! down to its header and the memory goes back to the operating system.
//!
//! Pointers handed to `release` and `reallocate` are checked by walking the
//! list: only the exact payload address of a live block is accepted, so
//! foreign, interior or already released pointers are never written through.
//!
//! ## Limitations
//!
//! - **Single owner**: no internal locking, wrap the heap in a lock to share it
//! - **One arena**: a heap owns exactly one contiguous range
//! - **Linear search**: first fit walks the whole list
//!
//! ## Safety
//!
//! The heap itself only hands out raw pointers; reading and writing through
//! them is up to the caller. Building a heap on the real program break
//! (`Sbrk`, Linux and Android only) is unsafe because nothing else in the
//! process may lower the break underneath it.

pub mod align;
mod block;
mod brk;
mod config;
mod error;
mod heap;
mod list;

pub use block::HEADER_SIZE;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use brk::Sbrk;
pub use brk::{ProgramBreak, Region};
pub use config::Config;
pub use error::{AllocError, BreakError, Corruption};
pub use heap::{BlockInfo, Heap, HeapStats};

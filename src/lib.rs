//! # segalloc - A Segregated Free-List Memory Allocator
//!
//! This crate implements a classic dynamic memory allocator over a
//! contiguous, grow-only heap region: boundary-tagged blocks, immediate
//! coalescing on release, and a segregated collection of explicit free
//! lists searched first-fit.
//!
//! ## Overview
//!
//! ```text
//!   Heap Region Concept:
//!
//!   ┌────────────────────────────────────────────────────────────────────┐
//!   │                          HEAP MEMORY                               │
//!   │                                                                    │
//!   │  ┌────┬────────┬──────────┬────────┬──────────────────────┬────┐  │
//!   │  │PRO │ used   │  free    │ used   │        free          │EPI │  │
//!   │  └────┴────────┴──────────┴────────┴──────────────────────┴────┘  │
//!   │    ▲               │                          │              ▲    │
//!   │    │               └──────────┐   ┌───────────┘              │    │
//!   │ prologue                      ▼   ▼                       epilogue│
//!   │ sentinel               size-class buckets                sentinel │
//!   │                ┌──────┬──────┬──────┬─────┬──────┐                │
//!   │                │ ≤28  │ ≤64  │ ≤96  │ ... │  ∞   │                │
//!   │                └──────┴──────┴──────┴─────┴──────┘                │
//!   │                                                                    │
//!   └────────────────────────────────────────────────────────────────────┘
//!
//!   Free blocks are chained per size class; released blocks merge with
//!   free neighbors immediately, so no two adjacent blocks are ever
//!   both free.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment constant and the align! macro
//!   ├── tags       - Boundary-tag word (size + ALLOC bit)
//!   ├── region     - Grow-only region providers (sbrk, fixed arena)
//!   └── seglist    - SegListAllocator: the heap itself
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{ArenaRegion, SegListAllocator};
//!
//! let mut allocator = SegListAllocator::new(ArenaRegion::with_capacity(64 * 1024));
//!
//! unsafe {
//!     // Allocate 24 bytes and use them.
//!     let ptr = allocator.allocate(24);
//!     assert!(!ptr.is_null());
//!     ptr.write(42);
//!
//!     // Release them again.
//!     allocator.release(ptr);
//! }
//! ```
//!
//! ## How It Works
//!
//! Every block carries a 4-byte header and an identical footer packing
//! the block size with an allocated bit. An allocation rounds the request
//! up to a block size, walks the free list of the matching size class
//! (and every larger class) first-fit, and splits the chosen block when
//! the tail can stand on its own as a new free block. A release rewrites
//! the tags as free, fuses the block with any free neighbor in constant
//! time via the boundary tags, and files the result back into its
//! bucket. When no free block fits, the allocator grows the region —
//! through `sbrk` in [`SbrkRegion`], or inside a fixed buffer in
//! [`ArenaRegion`] — and the fresh space coalesces with a free block at
//! the old tail.
//!
//! ## Features
//!
//! - **Segregated fits**: fourteen size classes keep searches short
//! - **Immediate coalescing**: fragmentation is folded back on release
//! - **Compact metadata**: 32-bit self-relative offsets instead of
//!   pointers, capping the heap at 2 GiB and halving link storage
//! - **Pluggable region**: any grow-only provider works; `sbrk` and a
//!   fixed arena ship in the crate
//! - **Consistency checker**: verifies the heap invariants on demand
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Grow-only**: Memory is never returned to the provider
//! - **8-byte alignment only**: No stronger alignment requests
//! - **Not hardened**: Corrupted metadata is undefined behavior outside
//!   the debug checker
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory
//! management. All allocation and deallocation operations require
//! `unsafe` blocks, and callers must uphold the usual rules: no use
//! after release, no double release of a pointer that has been reused,
//! and no pointers from other allocators.

pub mod align;
mod region;
mod seglist;
mod tags;

pub use region::{ArenaRegion, Region, SbrkRegion};
pub use seglist::{
  BUCKET_BOUNDS, CHUNKSIZE, DSIZE, HeapStats, HeapViolation, MIN_BLOCK, NUM_CLASSES,
  SegListAllocator, WSIZE,
};
pub use tags::Tag;

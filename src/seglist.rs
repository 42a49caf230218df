//! # Segregated Free-List Allocator
//!
//! The heap is one contiguous region of blocks framed by boundary tags.
//! Released blocks are coalesced with free neighbors immediately and filed
//! into one of fourteen size-class buckets; allocation searches the
//! requested class and every larger one first-fit, splitting the chosen
//! block in place when the remainder can stand on its own.
//!
//! ## Block layout
//!
//! Every block, allocated or free, carries a 4-byte header and a mirror
//! footer encoding the total block size and the ALLOC bit:
//!
//! ```text
//!    offset  0       4                     size-8  size-4
//!           +-------+------------------------+-------+
//!           |  HDR  |        payload         |  FTR  |
//!           +-------+------------------------+-------+
//!                   ▲
//!                   └── payload address handed to the client (8-aligned)
//! ```
//!
//! Free blocks reuse the first two payload words as doubly linked list
//! links. The links are **self-relative** signed 32-bit offsets: adding
//! SUC to the block's payload offset yields the successor's payload
//! offset, likewise PRD for the predecessor, and `0` marks the end of the
//! list on either side. The minimum block size of 16 bytes guarantees the
//! two link words fit even in the smallest free block.
//!
//! ```text
//!           +-------+-------+-------+-----------+-------+
//!           |  HDR  |  SUC  |  PRD  |  unused   |  FTR  |
//!           +-------+-------+-------+-----------+-------+
//! ```
//!
//! ## Sentinels
//!
//! A three-word prologue (header/link/header, marked allocated) sits at
//! the low end of the heap and a zero-size allocated epilogue header at
//! the high end, so neighbor inspection during coalescing never needs a
//! bounds check: stepping off either end lands on a block that reads
//! allocated. When the heap grows, the old epilogue word becomes the new
//! free block's header and a fresh epilogue is written at the new high
//! word.
//!
//! ## Addressing
//!
//! All block addresses are 32-bit signed payload offsets from the heap
//! base. That caps the heap at 2 GiB, halves the metadata compared to
//! pointer-width links, and lets the links live in any heap byte without
//! fighting pointer provenance.

use std::ptr;

use log::{debug, error, warn};

use crate::{align, region::Region, tags::Tag};

/// Header/footer width in bytes (one word).
pub const WSIZE: i32 = 4;

/// Doubleword size in bytes: the payload granule and alignment unit.
pub const DSIZE: i32 = 8;

/// Smallest block the heap can carve: header, footer, and the two
/// free-list link words.
pub const MIN_BLOCK: i32 = 16;

/// Default unit the heap grows by when search fails.
pub const CHUNKSIZE: i32 = 4096;

/// Inclusive upper bounds on total block size for the finite size
/// classes; one more unbounded class follows the last entry. A block
/// belongs to the lowest-indexed class whose bound covers it. The
/// partition is a tuning knob — correctness only needs monotonicity.
pub const BUCKET_BOUNDS: [i32; 13] = [
  28, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536, 2048, 4096,
];

/// Number of size classes, the unbounded tail included.
pub const NUM_CLASSES: usize = BUCKET_BOUNDS.len() + 1;

/// Prologue sentinel size: header/link/header.
const PROLOGUE_SIZE: i32 = 3 * WSIZE;

/// The empty-bucket and end-of-list sentinel. Offset 0 is the prologue
/// header, never a payload, so it is free to mean "none".
const NIL: i32 = 0;

/// Size-class index for a block size. Callers guarantee `size` is at
/// least [`MIN_BLOCK`]; requests below that are rejected before indexing.
fn class_of(size: i32) -> usize {
  debug_assert!(size >= MIN_BLOCK);
  for (class, bound) in BUCKET_BOUNDS.iter().enumerate() {
    if size <= *bound {
      return class;
    }
  }
  NUM_CLASSES - 1
}

/// Rounds a requested payload size up to a block size: room for the two
/// tag words, then up to the doubleword granule. `None` when the result
/// would not fit the signed 32-bit offset scheme.
fn round_request(size: usize) -> Option<i32> {
  if size <= DSIZE as usize {
    return Some(MIN_BLOCK);
  }
  if size > (i32::MAX - 2 * DSIZE) as usize {
    return None;
  }
  Some(align!(size + DSIZE as usize) as i32)
}

/// Byte tallies of the current heap, gathered by [`SegListAllocator::stats`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct HeapStats {
  /// Total bytes acquired from the region provider.
  pub heap_bytes: usize,
  /// Bytes sitting in free blocks, tag words included.
  pub free_bytes: usize,
  /// Number of free blocks.
  pub free_blocks: usize,
  /// Number of allocated blocks, sentinels excluded.
  pub allocated_blocks: usize,
}

/// A violated heap invariant, found by [`SegListAllocator::check_heap`].
/// Block fields are payload offsets from the heap base.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HeapViolation {
  /// The prologue sentinel words no longer read as an allocated
  /// three-word block.
  BadPrologue,
  /// A block whose header and footer disagree.
  TagMismatch { block: i32 },
  /// A payload offset not congruent to 0 mod 8.
  MisalignedPayload { block: i32 },
  /// A block size below the minimum, not a multiple of 8, or running
  /// past the end of the heap.
  BadBlockSize { block: i32, size: i32 },
  /// Two adjacent blocks both free — coalescing was missed.
  AdjacentFree { block: i32 },
  /// The forward walk did not terminate at a zero-size allocated header.
  BadEpilogue { offset: i32 },
  /// A list element whose ALLOC bit is set.
  AllocatedOnList { class: usize, block: i32 },
  /// A list element filed under the wrong size class.
  WrongClass { class: usize, block: i32 },
  /// SUC/PRD links that are not mutual inverses, or a link pointing
  /// outside the heap.
  BrokenLink { class: usize, block: i32 },
  /// The free blocks seen by the heap walk and the elements reachable
  /// from the bucket heads disagree in number.
  ListCountMismatch { walked: usize, listed: usize },
}

/// A segregated free-list allocator over a grow-only [`Region`].
///
/// The allocator owns its region and all bookkeeping lives inside the
/// heap itself plus the fixed vector of bucket heads below; nothing is
/// allocated elsewhere. The region is acquired lazily: the first call to
/// [`allocate`](Self::allocate) lays out the initial heap.
///
/// # Thread safety
///
/// None. The allocator assumes a single mutator; wrap it externally if
/// it must be shared.
pub struct SegListAllocator<R: Region> {
  region: R,

  /// Heap base address. Null until bootstrap; fixed afterwards.
  base: *mut u8,

  /// One past the high end of the heap, as a byte offset from `base`.
  /// The epilogue header occupies the word below it.
  hi: i32,

  /// Per-class list heads, as payload offsets. [`NIL`] marks an empty
  /// bucket.
  buckets: [i32; NUM_CLASSES],
}

impl<R: Region> SegListAllocator<R> {
  /// Creates an allocator over `region`. No memory is acquired until the
  /// first allocation.
  pub fn new(region: R) -> Self {
    Self {
      region,
      base: ptr::null_mut(),
      hi: 0,
      buckets: [NIL; NUM_CLASSES],
    }
  }

  /// The underlying region provider.
  pub fn region(&self) -> &R {
    &self.region
  }

  // ------------------------------------------------------------------
  // Word access. Offsets are byte offsets from `base`; every header,
  // footer, and link word lives at a word-aligned offset inside the heap.
  // ------------------------------------------------------------------

  fn word(&self, offset: i32) -> u32 {
    debug_assert!(offset >= 0 && offset + WSIZE <= self.hi);
    unsafe { self.base.offset(offset as isize).cast::<u32>().read() }
  }

  fn put_word(
    &mut self,
    offset: i32,
    word: u32,
  ) {
    debug_assert!(offset >= 0 && offset + WSIZE <= self.hi);
    unsafe { self.base.offset(offset as isize).cast::<u32>().write(word) }
  }

  fn tag(&self, offset: i32) -> Tag {
    Tag::from_raw(self.word(offset))
  }

  // ------------------------------------------------------------------
  // Block navigation over boundary tags. `bp` is always a payload offset.
  // ------------------------------------------------------------------

  fn block_tag(&self, bp: i32) -> Tag {
    self.tag(bp - WSIZE)
  }

  fn block_size(&self, bp: i32) -> i32 {
    self.block_tag(bp).size()
  }

  fn block_allocated(&self, bp: i32) -> bool {
    self.block_tag(bp).allocated()
  }

  fn next_block(&self, bp: i32) -> i32 {
    bp + self.block_size(bp)
  }

  /// Backward navigation reads the previous block's footer, the word
  /// just below our header. The prologue guarantees it always exists.
  fn prev_block(&self, bp: i32) -> i32 {
    bp - self.tag(bp - DSIZE).size()
  }

  /// Writes matching header and footer for a block of `size` at `bp`.
  fn set_tags(
    &mut self,
    bp: i32,
    size: i32,
    allocated: bool,
  ) {
    let tag = Tag::pack(size, allocated);
    self.put_word(bp - WSIZE, tag.raw());
    self.put_word(bp + size - DSIZE, tag.raw());
  }

  // ------------------------------------------------------------------
  // Free-list links. SUC sits at payload+0, PRD at payload+4, both as
  // self-relative deltas with 0 meaning "none".
  // ------------------------------------------------------------------

  fn successor(&self, bp: i32) -> i32 {
    let delta = self.word(bp) as i32;
    if delta == 0 { NIL } else { bp + delta }
  }

  fn predecessor(&self, bp: i32) -> i32 {
    let delta = self.word(bp + WSIZE) as i32;
    if delta == 0 { NIL } else { bp + delta }
  }

  fn set_successor(
    &mut self,
    bp: i32,
    to: i32,
  ) {
    let delta = if to == NIL { 0 } else { to - bp };
    self.put_word(bp, delta as u32);
  }

  fn set_predecessor(
    &mut self,
    bp: i32,
    to: i32,
  ) {
    let delta = if to == NIL { 0 } else { to - bp };
    self.put_word(bp + WSIZE, delta as u32);
  }

  /// Pushes a free block at the head of its bucket.
  fn insert(&mut self, bp: i32) {
    let class = class_of(self.block_size(bp));
    let head = self.buckets[class];
    if head != NIL {
      self.set_predecessor(head, bp);
      self.set_successor(bp, head);
    } else {
      self.set_successor(bp, NIL);
    }
    self.set_predecessor(bp, NIL);
    self.buckets[class] = bp;
  }

  /// Unlinks a free block from its bucket. The singleton case must be
  /// settled before any link write, or the write lands on `bp` itself.
  fn remove(&mut self, bp: i32) {
    let class = class_of(self.block_size(bp));
    match (self.predecessor(bp), self.successor(bp)) {
      (NIL, NIL) => self.buckets[class] = NIL,
      (NIL, successor) => {
        self.buckets[class] = successor;
        self.set_predecessor(successor, NIL);
      }
      (predecessor, NIL) => self.set_successor(predecessor, NIL),
      (predecessor, successor) => {
        self.set_successor(predecessor, successor);
        self.set_predecessor(successor, predecessor);
      }
    }
  }

  // ------------------------------------------------------------------
  // Core algorithms.
  // ------------------------------------------------------------------

  /// Fuses a just-freed block with any free neighbors and files the
  /// result in its bucket. `bp`'s tags must already read free and the
  /// block must not be on any list. Returns the resulting block.
  ///
  /// The sentinels make both neighbor reads unconditional: the prologue
  /// stops the backward merge and the epilogue the forward one, both by
  /// reading as allocated.
  fn coalesce(&mut self, bp: i32) -> i32 {
    let prev = self.prev_block(bp);
    let next = self.next_block(bp);
    let prev_free = !self.block_allocated(prev);
    let next_free = !self.block_allocated(next);

    let merged = match (prev_free, next_free) {
      (false, false) => bp,
      (false, true) => {
        self.remove(next);
        let size = self.block_size(bp) + self.block_size(next);
        self.set_tags(bp, size, false);
        bp
      }
      (true, false) => {
        self.remove(prev);
        let size = self.block_size(prev) + self.block_size(bp);
        self.set_tags(prev, size, false);
        prev
      }
      (true, true) => {
        self.remove(prev);
        self.remove(next);
        let size = self.block_size(prev) + self.block_size(bp) + self.block_size(next);
        self.set_tags(prev, size, false);
        prev
      }
    };

    self.insert(merged);
    merged
  }

  /// Carves an allocation of `asize` bytes out of free block `bp`,
  /// splitting off the tail as a new free block when the remainder can
  /// stand on its own (the split threshold equals the minimum block
  /// size, so the remainder is always a valid block).
  fn place(
    &mut self,
    bp: i32,
    asize: i32,
  ) {
    let csize = self.block_size(bp);
    self.remove(bp);
    if csize - asize >= MIN_BLOCK {
      self.set_tags(bp, asize, true);
      let rest = bp + asize;
      self.set_tags(rest, csize - asize, false);
      self.coalesce(rest);
    } else {
      self.set_tags(bp, csize, true);
    }
  }

  /// First-fit search: the home class of `asize`, then every larger
  /// class. Walking upward matters — a block of 200 bytes lives in the
  /// ≤256 bucket, and a request for 192 must find it when the ≤192
  /// bucket is empty.
  fn find_fit(&self, asize: i32) -> Option<i32> {
    if asize < MIN_BLOCK {
      return None;
    }
    for class in class_of(asize)..NUM_CLASSES {
      let mut bp = self.buckets[class];
      while bp != NIL {
        if self.block_size(bp) >= asize {
          return Some(bp);
        }
        bp = self.successor(bp);
      }
    }
    None
  }

  /// Lays out the initial heap in a fresh CHUNKSIZE region: prologue
  /// sentinel, one spanning free block, epilogue sentinel.
  fn bootstrap(&mut self) -> bool {
    let Some(base) = self.region.grow(CHUNKSIZE as usize) else {
      return false;
    };
    debug_assert!(base as usize % align::ALIGNMENT == 0);
    self.base = base;
    self.hi = CHUNKSIZE;

    let prologue = Tag::pack(PROLOGUE_SIZE, true);
    self.put_word(0, prologue.raw());
    self.put_word(WSIZE, 0);
    self.put_word(2 * WSIZE, prologue.raw());

    let bp = PROLOGUE_SIZE + WSIZE;
    self.set_tags(bp, CHUNKSIZE - PROLOGUE_SIZE - WSIZE, false);
    self.put_word(self.hi - WSIZE, Tag::pack(0, true).raw());
    self.insert(bp);

    debug!("bootstrapped {} byte heap at {:p}", CHUNKSIZE, self.base);
    true
  }

  /// Appends fresh free space at the high end. The old epilogue word
  /// becomes the new block's header; the result is coalesced, so a free
  /// block at the old tail merges with the extension.
  fn extend(&mut self, bytes: i32) -> Option<i32> {
    let bytes = align!(bytes as usize) as i32;
    let new_hi = self.hi.checked_add(bytes)?;

    let grown = self.region.grow(bytes as usize)?;
    debug_assert_eq!(grown as usize, self.base as usize + self.hi as usize);

    let bp = self.hi;
    self.hi = new_hi;
    self.set_tags(bp, bytes, false);
    self.put_word(self.hi - WSIZE, Tag::pack(0, true).raw());

    debug!("grew heap by {} bytes to {}", bytes, self.hi);
    Some(self.coalesce(bp))
  }

  // ------------------------------------------------------------------
  // Client operations.
  // ------------------------------------------------------------------

  /// Allocates a block with at least `size` writable payload bytes,
  /// aligned to 8. Returns null when `size` is zero or the region
  /// provider refuses to grow.
  ///
  /// # Safety
  ///
  /// The returned pointer is valid until passed to
  /// [`release`](Self::release) or [`reallocate`](Self::reallocate) on
  /// this allocator, and only as long as the allocator itself is alive.
  /// The caller must not write more than `size` bytes through it.
  pub unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
    if self.base.is_null() && !self.bootstrap() {
      return ptr::null_mut();
    }
    if size == 0 {
      return ptr::null_mut();
    }
    let Some(asize) = round_request(size) else {
      return ptr::null_mut();
    };

    let bp = match self.find_fit(asize) {
      Some(bp) => bp,
      None => match self.extend(asize.max(CHUNKSIZE)) {
        Some(bp) => bp,
        None => return ptr::null_mut(),
      },
    };
    self.place(bp, asize);

    unsafe { self.base.offset(bp as isize) }
  }

  /// Allocates room for `count` elements of `size` bytes each and zeroes
  /// the whole payload. Overflow of `count * size` fails the allocation.
  ///
  /// # Safety
  ///
  /// Same contract as [`allocate`](Self::allocate).
  pub unsafe fn zero_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    let Some(total) = count.checked_mul(size) else {
      return ptr::null_mut();
    };
    let payload = unsafe { self.allocate(total) };
    if !payload.is_null() {
      let bp = self.offset_of(payload);
      let usable = (self.block_size(bp) - DSIZE) as usize;
      unsafe { ptr::write_bytes(payload, 0, usable) };
    }
    payload
  }

  /// Resizes an allocation. Null `address` acts as allocate; zero `size`
  /// acts as release and returns null. Otherwise the payload moves to a
  /// fresh block and the first `min(old payload size, size)` bytes are
  /// preserved. When the new allocation fails, the original block is
  /// left untouched and null is returned.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer from this allocator. The
  /// old pointer is invalid after a successful move.
  pub unsafe fn reallocate(
    &mut self,
    address: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if size == 0 {
        self.release(address);
        return ptr::null_mut();
      }
      if address.is_null() {
        return self.allocate(size);
      }

      let new = self.allocate(size);
      if new.is_null() {
        return ptr::null_mut();
      }

      let old_payload = (self.block_size(self.offset_of(address)) - DSIZE) as usize;
      ptr::copy_nonoverlapping(address, new, old_payload.min(size));
      self.release(address);
      new
    }
  }

  /// Releases an allocation: the tags are rewritten free and the block
  /// is coalesced with any free neighbors. Null is a no-op, and so is a
  /// block whose header already reads free — a best-effort double-free
  /// guard, not a guarantee for pointers this allocator never issued.
  ///
  /// # Safety
  ///
  /// `address` must be null or a pointer from this allocator that the
  /// caller will not touch again.
  pub unsafe fn release(&mut self, address: *mut u8) {
    if address.is_null() || self.base.is_null() {
      return;
    }
    let bp = self.offset_of(address);
    if !self.block_allocated(bp) {
      warn!("release of already-free block at offset {}", bp);
      return;
    }
    let size = self.block_size(bp);
    self.set_tags(bp, size, false);
    self.coalesce(bp);
  }

  /// Usable payload bytes behind a live allocation; at least what was
  /// requested.
  ///
  /// # Safety
  ///
  /// `address` must be a live pointer from this allocator.
  pub unsafe fn payload_size(&self, address: *mut u8) -> usize {
    (self.block_size(self.offset_of(address)) - DSIZE) as usize
  }

  fn offset_of(&self, address: *mut u8) -> i32 {
    debug_assert!(!self.base.is_null());
    (address as usize - self.base as usize) as i32
  }

  // ------------------------------------------------------------------
  // Debug paths: statistics and the consistency checker. Neither runs
  // as part of any client operation.
  // ------------------------------------------------------------------

  /// Walks the heap and tallies block counts and free space.
  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats::default();
    if self.base.is_null() {
      return stats;
    }
    stats.heap_bytes = self.hi as usize;

    let mut bp = PROLOGUE_SIZE + WSIZE;
    while self.block_size(bp) > 0 {
      if self.block_allocated(bp) {
        stats.allocated_blocks += 1;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += self.block_size(bp) as usize;
      }
      bp = self.next_block(bp);
    }
    stats
  }

  /// Verifies the heap invariants — mirrored tags, contiguity, no
  /// adjacent free pair, list membership and link mutuality, class
  /// filing, payload alignment — and returns the first violation found.
  /// A heap that was never bootstrapped is trivially consistent.
  ///
  /// Meant for tests and ad-hoc debugging; never called on the hot path.
  pub fn check_heap(&self) -> Result<(), HeapViolation> {
    if self.base.is_null() {
      return Ok(());
    }
    let result = self
      .check_blocks()
      .and_then(|free_blocks| self.check_lists(free_blocks));
    if let Err(violation) = result {
      error!("heap check failed: {:?}", violation);
      return Err(violation);
    }
    Ok(())
  }

  /// Forward walk over every block. Returns the number of free blocks so
  /// the list check can reconcile membership.
  fn check_blocks(&self) -> Result<usize, HeapViolation> {
    let prologue = Tag::pack(PROLOGUE_SIZE, true);
    if self.tag(0) != prologue || self.tag(2 * WSIZE) != prologue {
      return Err(HeapViolation::BadPrologue);
    }

    let mut free_blocks = 0;
    let mut prev_free = false;
    let mut bp = PROLOGUE_SIZE + WSIZE;
    while bp != self.hi {
      if bp % DSIZE != 0 {
        return Err(HeapViolation::MisalignedPayload { block: bp });
      }
      let header = self.block_tag(bp);
      let size = header.size();
      if size < MIN_BLOCK || size % DSIZE != 0 {
        return Err(HeapViolation::BadBlockSize { block: bp, size });
      }
      let end = match bp.checked_add(size) {
        Some(end) if end <= self.hi => end,
        _ => return Err(HeapViolation::BadBlockSize { block: bp, size }),
      };
      if self.tag(end - DSIZE) != header {
        return Err(HeapViolation::TagMismatch { block: bp });
      }
      if !header.allocated() {
        if prev_free {
          return Err(HeapViolation::AdjacentFree { block: bp });
        }
        free_blocks += 1;
      }
      prev_free = !header.allocated();
      bp = end;
    }

    if self.tag(self.hi - WSIZE) != Tag::pack(0, true) {
      return Err(HeapViolation::BadEpilogue {
        offset: self.hi - WSIZE,
      });
    }
    Ok(free_blocks)
  }

  /// Walks every bucket, checking membership, class filing, and link
  /// mutuality. `free_walked` bounds the traversal, so a cycle or a
  /// double filing surfaces as a count mismatch instead of spinning.
  fn check_lists(&self, free_walked: usize) -> Result<(), HeapViolation> {
    let mut listed = 0;
    for class in 0..NUM_CLASSES {
      let mut prev = NIL;
      let mut bp = self.buckets[class];
      while bp != NIL {
        if listed >= free_walked + 1 {
          return Err(HeapViolation::ListCountMismatch {
            walked: free_walked,
            listed,
          });
        }
        if bp % DSIZE != 0 || bp < PROLOGUE_SIZE + WSIZE || bp > self.hi - DSIZE {
          return Err(HeapViolation::BrokenLink { class, block: bp });
        }
        if self.block_allocated(bp) {
          return Err(HeapViolation::AllocatedOnList { class, block: bp });
        }
        let size = self.block_size(bp);
        if size < MIN_BLOCK || class_of(size) != class {
          return Err(HeapViolation::WrongClass { class, block: bp });
        }
        if self.predecessor(bp) != prev {
          return Err(HeapViolation::BrokenLink { class, block: bp });
        }
        listed += 1;
        prev = bp;
        bp = self.successor(bp);
      }
    }
    if listed != free_walked {
      return Err(HeapViolation::ListCountMismatch {
        walked: free_walked,
        listed,
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::ArenaRegion;

  /// Helper: an allocator over a deterministic fixed-capacity region.
  fn heap(capacity: usize) -> SegListAllocator<ArenaRegion> {
    SegListAllocator::new(ArenaRegion::with_capacity(capacity))
  }

  /// Helper: payload offset of a returned pointer.
  fn offset_of(
    allocator: &SegListAllocator<ArenaRegion>,
    address: *mut u8,
  ) -> i32 {
    (address as usize - allocator.base as usize) as i32
  }

  /// Helper: check that a pointer is aligned to `align` bytes.
  fn is_aligned(
    address: *mut u8,
    align: usize,
  ) -> bool {
    (address as usize) % align == 0
  }

  const FIRST_BP: i32 = PROLOGUE_SIZE + WSIZE;

  #[test]
  fn rounding_adds_overhead_and_granule() {
    assert_eq!(round_request(1), Some(16));
    assert_eq!(round_request(8), Some(16));
    assert_eq!(round_request(9), Some(24));
    assert_eq!(round_request(24), Some(32));
    assert_eq!(round_request(4072), Some(4080));
    assert_eq!(round_request(usize::MAX), None);
  }

  #[test]
  fn classes_cover_the_partition() {
    assert_eq!(class_of(16), 0);
    assert_eq!(class_of(28), 0);
    assert_eq!(class_of(32), 1);
    assert_eq!(class_of(192), 4);
    assert_eq!(class_of(200), 5);
    assert_eq!(class_of(4096), 12);
    assert_eq!(class_of(4104), NUM_CLASSES - 1);
    assert_eq!(class_of(1 << 20), NUM_CLASSES - 1);
  }

  #[test]
  fn allocate_zero_returns_null() {
    let mut allocator = heap(8192);
    unsafe {
      assert!(allocator.allocate(0).is_null());
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn release_of_null_is_a_noop() {
    let mut allocator = heap(8192);
    unsafe {
      allocator.release(std::ptr::null_mut());
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn bootstrap_lays_out_one_spanning_free_block() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.allocate(24);
      assert!(!p.is_null());
      allocator.release(p);
    }

    let stats = allocator.stats();
    assert_eq!(stats.heap_bytes, CHUNKSIZE as usize);
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(
      stats.free_bytes,
      (CHUNKSIZE - PROLOGUE_SIZE - WSIZE) as usize
    );
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn single_alloc_release_reuses_the_block() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.allocate(24);
      assert!(!p.is_null());
      allocator.release(p);
      let q = allocator.allocate(24);
      assert_eq!(q, p);
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn split_leaves_the_expected_remainder() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.allocate(24);
      let bp = offset_of(&allocator, p);
      assert_eq!(bp, FIRST_BP);
      assert_eq!(allocator.block_size(bp), 32);

      let rest = allocator.next_block(bp);
      assert!(!allocator.block_allocated(rest));
      assert_eq!(allocator.block_size(rest), 4048);
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn forward_coalesce_merges_released_neighbors() {
    let mut allocator = heap(8192);
    unsafe {
      let a = allocator.allocate(32);
      let b = allocator.allocate(32);
      let _c = allocator.allocate(32);
      allocator.release(b);
      allocator.release(a);

      let before = allocator.hi;
      let merged = allocator.allocate(64);
      assert_eq!(allocator.hi, before, "no heap extension expected");
      assert!(merged <= a);
      assert_eq!(merged, a);
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn release_at_old_tail_coalesces_across_extension() {
    let mut allocator = heap(16384);
    unsafe {
      // Fills the initial chunk exactly: 4072 rounds to the whole 4080.
      let tail = allocator.allocate(4072);
      assert_eq!(allocator.hi, CHUNKSIZE);

      // Forces an extension by CHUNKSIZE; the placed block sits at the
      // start of the fresh space.
      let q = allocator.allocate(1000);
      assert_eq!(allocator.hi, 2 * CHUNKSIZE);
      assert_eq!(offset_of(&allocator, q), CHUNKSIZE);

      allocator.release(q);
      allocator.release(tail);

      // The old tail block and the whole fresh extension fused into one.
      let bp = offset_of(&allocator, tail);
      assert_eq!(allocator.block_size(bp), 4080 + 4096);
      assert_eq!(
        allocator.tag(bp + allocator.block_size(bp) - DSIZE),
        allocator.block_tag(bp)
      );
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn bucket_crossing_refiles_the_remainder() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.allocate(200);
      let bp = offset_of(&allocator, p);
      assert_eq!(bp, FIRST_BP);
      assert_eq!(allocator.block_size(bp), 208);

      let rest = allocator.next_block(bp);
      assert!(!allocator.block_allocated(rest));
      assert_eq!(allocator.block_size(rest), 4080 - 208);
      assert_eq!(allocator.buckets[class_of(4080 - 208)], rest);
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn search_walks_higher_classes_on_an_empty_home_bucket() {
    let mut allocator = heap(8192);
    unsafe {
      let a = allocator.allocate(192); // 200-byte block, ≤256 class
      let _separator = allocator.allocate(8);
      allocator.release(a);

      // 184 rounds to 192, whose home class (≤192) is empty; the fit
      // must come from the ≤256 bucket.
      let b = allocator.allocate(184);
      assert_eq!(b, a);
      // 200 − 192 leaves no room to split.
      assert_eq!(allocator.block_size(offset_of(&allocator, b)), 200);
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn reallocate_grow_preserves_the_prefix() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.allocate(24);
      for i in 0..24 {
        p.add(i).write((i % 256) as u8);
      }

      let q = allocator.reallocate(p, 100);
      assert!(!q.is_null());
      for i in 0..24 {
        assert_eq!(q.add(i).read(), (i % 256) as u8);
      }
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn reallocate_shrink_copies_only_the_new_size() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.allocate(64);
      for i in 0..64 {
        p.add(i).write(i as u8);
      }

      let q = allocator.reallocate(p, 16);
      assert!(!q.is_null());
      for i in 0..16 {
        assert_eq!(q.add(i).read(), i as u8);
      }
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn reallocate_null_acts_as_allocate() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.reallocate(std::ptr::null_mut(), 24);
      assert!(!p.is_null());
      assert!(is_aligned(p, align::ALIGNMENT));
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn reallocate_to_zero_acts_as_release() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.allocate(24);
      assert!(allocator.reallocate(p, 0).is_null());
      let q = allocator.allocate(24);
      assert_eq!(q, p);
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn reallocate_failure_leaves_the_original_untouched() {
    let mut allocator = heap(4096);
    unsafe {
      let p = allocator.allocate(1000);
      for i in 0..1000 {
        p.add(i).write((i % 251) as u8);
      }

      // The region is exhausted; a bigger block cannot exist.
      let q = allocator.reallocate(p, 4000);
      assert!(q.is_null());
      for i in 0..1000 {
        assert_eq!(p.add(i).read(), (i % 251) as u8);
      }
      assert_eq!(allocator.payload_size(p), 1000);
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn double_release_is_tolerated() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.allocate(24);
      allocator.release(p);
      allocator.release(p);
      assert_eq!(allocator.check_heap(), Ok(()));

      let q = allocator.allocate(24);
      assert_eq!(q, p);
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn every_payload_is_doubleword_aligned() {
    let mut allocator = heap(1 << 16);
    let mut live = Vec::new();
    unsafe {
      for size in 1..=200usize {
        let p = allocator.allocate(size);
        assert!(!p.is_null());
        assert!(
          is_aligned(p, align::ALIGNMENT),
          "allocation of {} must be {}-byte aligned, got {:p}",
          size,
          align::ALIGNMENT,
          p
        );
        assert!(allocator.payload_size(p) >= size);
        live.push(p);
      }
      for p in live {
        allocator.release(p);
      }
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn live_payloads_do_not_overlap() {
    let mut allocator = heap(1 << 16);
    let sizes = [24usize, 1, 100, 8, 333, 48, 4000, 16];
    let mut live = Vec::new();
    unsafe {
      for (pattern, size) in sizes.iter().enumerate() {
        let p = allocator.allocate(*size);
        assert!(!p.is_null());
        ptr::write_bytes(p, pattern as u8 + 1, *size);
        live.push((p, *size, pattern as u8 + 1));
      }

      // Every payload still carries its own pattern.
      for (p, size, pattern) in &live {
        for i in 0..*size {
          assert_eq!(p.add(i).read(), *pattern);
        }
      }

      // Release the even-indexed blocks, then verify the others again.
      for (index, (p, _, _)) in live.iter().enumerate() {
        if index % 2 == 0 {
          allocator.release(*p);
        }
      }
      for (index, (p, size, pattern)) in live.iter().enumerate() {
        if index % 2 != 0 {
          for i in 0..*size {
            assert_eq!(p.add(i).read(), *pattern);
          }
          allocator.release(*p);
        }
      }
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn releasing_everything_coalesces_to_one_block() {
    let mut allocator = heap(1 << 16);
    let mut live = Vec::new();
    unsafe {
      for round in 0..3 {
        for size in [16usize, 500, 32, 2000, 8, 1200] {
          live.push(allocator.allocate(size + round));
        }
        // Free in a scrambled order.
        live.swap(0, 4);
        live.swap(1, 3);
        for p in live.drain(..) {
          allocator.release(p);
        }
      }
    }

    let stats = allocator.stats();
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(
      stats.free_bytes,
      stats.heap_bytes - (PROLOGUE_SIZE + WSIZE) as usize
    );
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn zero_allocate_zeroes_the_full_payload() {
    let mut allocator = heap(8192);
    unsafe {
      // Dirty a block first so the zeroing is observable on reuse.
      let p = allocator.allocate(24);
      ptr::write_bytes(p, 0xff, 24);
      allocator.release(p);

      let q = allocator.zero_allocate(3, 8);
      assert_eq!(q, p);
      let usable = allocator.payload_size(q);
      assert!(usable >= 24);
      for i in 0..usable {
        assert_eq!(q.add(i).read(), 0);
      }
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn zero_allocate_overflow_saturates_to_failure() {
    let mut allocator = heap(8192);
    unsafe {
      assert!(allocator.zero_allocate(usize::MAX, 2).is_null());
      assert!(allocator.zero_allocate(2, usize::MAX).is_null());
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn allocation_fails_when_the_region_is_exhausted() {
    let mut allocator = heap(4096);
    unsafe {
      let p = allocator.allocate(4072);
      assert!(!p.is_null());
      assert!(allocator.allocate(8).is_null());

      // Releasing makes the space allocatable again.
      allocator.release(p);
      assert!(!allocator.allocate(4072).is_null());
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn bootstrap_failure_surfaces_as_no_allocation() {
    let mut allocator = heap(0);
    unsafe {
      assert!(allocator.allocate(8).is_null());
    }
    assert_eq!(allocator.check_heap(), Ok(()));
  }

  #[test]
  fn checker_detects_a_corrupted_footer() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.allocate(24);
      let bp = offset_of(&allocator, p);

      let footer = bp + allocator.block_size(bp) - DSIZE;
      allocator.put_word(footer, Tag::pack(64, true).raw());
      assert_eq!(
        allocator.check_heap(),
        Err(HeapViolation::TagMismatch { block: bp })
      );
    }
  }

  #[test]
  fn checker_detects_a_stray_list_entry() {
    let mut allocator = heap(8192);
    unsafe {
      let p = allocator.allocate(24);
      let bp = offset_of(&allocator, p);

      // File the allocated block into a bucket by hand.
      allocator.set_successor(bp, NIL);
      allocator.set_predecessor(bp, NIL);
      allocator.buckets[class_of(allocator.block_size(bp))] = bp;
      assert_eq!(
        allocator.check_heap(),
        Err(HeapViolation::AllocatedOnList { class: 1, block: bp })
      );
    }
  }

  #[test]
  fn checker_passes_after_a_mixed_workload() {
    let mut allocator = heap(1 << 18);
    let mut live = Vec::new();
    unsafe {
      for i in 0..200usize {
        let size = (i * 37) % 900 + 1;
        let p = allocator.allocate(size);
        assert!(!p.is_null());
        ptr::write_bytes(p, (i % 255) as u8, size);
        live.push(p);
        if i % 3 == 0 {
          let victim = live.remove(live.len() / 2);
          allocator.release(victim);
        }
        if i % 7 == 0 && !live.is_empty() {
          let victim = live.remove(0);
          let grown = allocator.reallocate(victim, ((i * 53) % 700) + 1);
          assert!(!grown.is_null());
          live.push(grown);
        }
      }
      assert_eq!(allocator.check_heap(), Ok(()));

      for p in live {
        allocator.release(p);
      }
    }
    assert_eq!(allocator.check_heap(), Ok(()));
    assert_eq!(allocator.stats().free_blocks, 1);
  }
}

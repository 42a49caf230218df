//! Heap-region providers.
//!
//! The allocator manages blocks inside one contiguous byte region that only
//! ever grows at its high end. Where that region comes from is behind the
//! [`Region`] trait: [`SbrkRegion`] extends the program's data segment with
//! the `sbrk` system call, and [`ArenaRegion`] hands out suffixes of a
//! fixed-capacity buffer, which keeps tests deterministic and lets the
//! allocator run inside a pre-carved memory range.
//!
//! ```text
//!   low()                                high()
//!    │                                     │
//!    ▼                                     ▼
//!   ┌─────────────────────────────────────┐
//!   │        region bytes so far          │ ← grow(n) appends here
//!   └─────────────────────────────────────┘
//! ```

use std::ptr;

use libc::{c_void, intptr_t, sbrk};

use crate::align::ALIGNMENT;

/// A contiguous, grow-only byte region.
///
/// Implementations must return extensions that are contiguous with the
/// bytes handed out before, and the first `grow` must return an address
/// aligned to [`ALIGNMENT`] — every block address in the heap inherits its
/// alignment from that base.
pub trait Region {
  /// Grows the region by `bytes` at its high end and returns the address
  /// of the newly appended bytes, or `None` if the provider refuses.
  fn grow(&mut self, bytes: usize) -> Option<*mut u8>;

  /// Low address of the region. Fixed after the first successful `grow`;
  /// null before it.
  fn low(&self) -> *mut u8;

  /// One past the current high address of the region.
  fn high(&self) -> *mut u8;
}

/// A region that grows the program's data segment via `sbrk(2)`.
///
/// The program break is aligned to [`ALIGNMENT`] before the first
/// extension, so the base satisfies the alignment contract of [`Region`].
///
/// # Caveats
///
/// Extensions are contiguous only as long as nothing else moves the
/// program break: this provider must be the sole `sbrk` caller in the
/// process, and it is single-threaded only.
pub struct SbrkRegion {
  base: *mut u8,
  len: usize,
}

impl SbrkRegion {
  pub fn new() -> Self {
    Self {
      base: ptr::null_mut(),
      len: 0,
    }
  }
}

impl Region for SbrkRegion {
  fn grow(&mut self, bytes: usize) -> Option<*mut u8> {
    let increment = intptr_t::try_from(bytes).ok()?;

    unsafe {
      if self.base.is_null() {
        // Align the break before the first extension so every block
        // address inherits the doubleword alignment.
        let brk = sbrk(0);
        if brk == usize::MAX as *mut c_void {
          return None;
        }
        let misalign = brk as usize % ALIGNMENT;
        if misalign != 0 && sbrk((ALIGNMENT - misalign) as intptr_t) == usize::MAX as *mut c_void {
          return None;
        }
      }

      // sbrk returns the OLD program break, i.e. the start of the new bytes,
      // and (void*)-1 on failure.
      let old = sbrk(increment);
      if old == usize::MAX as *mut c_void {
        return None;
      }

      if self.base.is_null() {
        self.base = old as *mut u8;
      }
      self.len += bytes;

      Some(old as *mut u8)
    }
  }

  fn low(&self) -> *mut u8 {
    self.base
  }

  fn high(&self) -> *mut u8 {
    if self.base.is_null() {
      return ptr::null_mut();
    }
    unsafe { self.base.add(self.len) }
  }
}

/// A region backed by a fixed-capacity buffer owned by the provider.
///
/// `grow` hands out consecutive suffixes of the buffer and refuses once
/// the capacity is exhausted, which makes out-of-memory behavior easy to
/// exercise. The backing store is a `Box<[u64]>`, so the base address is
/// aligned to [`ALIGNMENT`] and stable for the provider's lifetime.
pub struct ArenaRegion {
  buf: Box<[u64]>,
  len: usize,
}

impl ArenaRegion {
  /// Creates a region with a fixed capacity of `bytes`, rounded up to the
  /// doubleword granule.
  pub fn with_capacity(bytes: usize) -> Self {
    let words = bytes.div_ceil(ALIGNMENT);
    Self {
      buf: vec![0u64; words].into_boxed_slice(),
      len: 0,
    }
  }

  /// Total bytes this region can ever hand out.
  pub fn capacity(&self) -> usize {
    self.buf.len() * ALIGNMENT
  }
}

impl Region for ArenaRegion {
  fn grow(&mut self, bytes: usize) -> Option<*mut u8> {
    if bytes > self.capacity() - self.len {
      return None;
    }
    let at = unsafe { self.buf.as_mut_ptr().cast::<u8>().add(self.len) };
    self.len += bytes;
    Some(at)
  }

  fn low(&self) -> *mut u8 {
    self.buf.as_ptr().cast::<u8>().cast_mut()
  }

  fn high(&self) -> *mut u8 {
    unsafe { self.low().add(self.len) }
  }
}

use std::ptr;

use segalloc::{Region, SbrkRegion, SegListAllocator};

/// Prints the allocator's view of the heap: how much it holds, how much
/// of that is free, and how the blocks split between used and free.
fn print_heap_state(
  label: &str,
  allocator: &SegListAllocator<SbrkRegion>,
) {
  let stats = allocator.stats();
  println!(
    "[{}] heap = {} bytes ({:?}..{:?}), free = {} bytes in {} block(s), {} allocated block(s)",
    label,
    stats.heap_bytes,
    allocator.region().low(),
    allocator.region().high(),
    stats.free_bytes,
    stats.free_blocks,
    stats.allocated_blocks,
  );
}

fn main() {
  // The allocator over the program break. Nothing is acquired until the
  // first allocation lays out the initial heap.
  let mut allocator = SegListAllocator::new(SbrkRegion::new());

  unsafe {
    // --------------------------------------------------------------------
    // 1) Allocate 24 bytes. The first call bootstraps the heap: one
    //    4 KiB chunk with the sentinel blocks at both ends.
    // --------------------------------------------------------------------
    let first = allocator.allocate(24);
    println!("\n[1] Allocate 24 bytes -> {:?}", first);
    print_heap_state("1", &allocator);

    // Write something into the allocated memory to show it's usable.
    ptr::write_bytes(first, 0xAB, 24);
    println!("[1] Initialized the block with 0xAB");

    // --------------------------------------------------------------------
    // 2) Allocate a few more blocks of different size classes.
    // --------------------------------------------------------------------
    let second = allocator.allocate(100);
    let third = allocator.allocate(500);
    println!("\n[2] Allocate 100 bytes -> {:?}, 500 bytes -> {:?}", second, third);
    print_heap_state("2", &allocator);

    // --------------------------------------------------------------------
    // 3) Release the middle block and allocate 100 again: the freed
    //    block comes straight back out of its bucket.
    // --------------------------------------------------------------------
    allocator.release(second);
    let again = allocator.allocate(100);
    println!(
      "\n[3] Released and re-allocated 100 bytes -> {:?} ({})",
      again,
      if again == second {
        "reused the freed block"
      } else {
        "placed elsewhere"
      }
    );
    print_heap_state("3", &allocator);

    // --------------------------------------------------------------------
    // 4) Zero-allocate an array of 16 × 8 bytes and verify the zeroing.
    // --------------------------------------------------------------------
    let zeroed = allocator.zero_allocate(16, 8);
    let all_zero = (0..128).all(|i| zeroed.add(i).read() == 0);
    println!("\n[4] zero_allocate(16, 8) -> {:?}, payload all zero: {}", zeroed, all_zero);

    // --------------------------------------------------------------------
    // 5) Grow the first block with reallocate; the prefix survives the
    //    move.
    // --------------------------------------------------------------------
    let grown = allocator.reallocate(first, 200);
    println!(
      "\n[5] reallocate(first, 200) -> {:?}, first byte still 0x{:02X}",
      grown,
      grown.read()
    );
    print_heap_state("5", &allocator);

    // --------------------------------------------------------------------
    // 6) Allocate something larger than the remaining space to force a
    //    heap extension.
    // --------------------------------------------------------------------
    let big = allocator.allocate(64 * 1024);
    println!("\n[6] Allocate 64 KiB -> {:?}", big);
    print_heap_state("6", &allocator);

    // --------------------------------------------------------------------
    // 7) Release everything. Coalescing folds the heap back into a
    //    handful of free blocks, and the checker confirms the
    //    invariants held up.
    // --------------------------------------------------------------------
    allocator.release(third);
    allocator.release(again);
    allocator.release(zeroed);
    allocator.release(grown);
    allocator.release(big);
    print_heap_state("7", &allocator);
    match allocator.check_heap() {
      Ok(()) => println!("[7] heap check passed"),
      Err(violation) => println!("[7] heap check FAILED: {:?}", violation),
    }
  }
}

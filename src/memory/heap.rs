//! Kernel heap.
//!
//! `alloc::collections`/`alloc::boxed` back the PCB table's queues
//! and a handful of driver buffers. The heap itself is just a run of
//! frames carved out of the same physical allocator everything else
//! uses (§4.A: "the single source of both kernel objects ... and
//! user pages") and handed to `linked_list_allocator`, which does the
//! size-class bookkeeping the frame allocator deliberately doesn't.

use linked_list_allocator::LockedHeap;

use crate::memory::frame;
use crate::memory::layout::PAGE_SIZE;

// Host unit tests run against `std`, which already installs its own
// allocator; only claim the global slot on the real no_std target.
#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(test)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Number of frames carved out for the kernel heap at boot.
const HEAP_FRAMES: usize = 256; // 1 MiB

/// Reserves `HEAP_FRAMES` contiguous-by-allocation-order frames from
/// the page allocator and hands them to the global allocator. Must
/// run after `frame::kinit` and before any `alloc`-using code.
pub fn init() {
    // kalloc doesn't guarantee contiguity across calls in general,
    // but immediately after kinit the free list is a straight run in
    // ascending address order (§4.A), so the first HEAP_FRAMES pops
    // are contiguous.
    let mut base = None;
    let mut count = 0usize;
    for _ in 0..HEAP_FRAMES {
        let pa = frame::kalloc().expect("kernel heap: out of frames during boot reservation");
        if base.is_none() {
            base = Some(pa);
        }
        count += 1;
    }
    let base = base.expect("HEAP_FRAMES must be nonzero");
    let size = count * PAGE_SIZE;
    // SAFETY: base..base+size is a run of frames this function just
    // took out of the frame allocator and that nothing else
    // references; handing it to the allocator as its backing region
    // is exactly what `init` is documented to require.
    unsafe {
        ALLOCATOR.lock().init(base as *mut u8, size);
    }
    log::info!("kernel heap: {} KiB at {:#x}", size / 1024, base);
}

//! The platform's physical address map (§6, "Target platform") and
//! the derived virtual layout the VMM identity-maps at boot (§4.B).

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

pub const RAM_BASE: usize = 0x8000_0000;
pub const RAM_SIZE: usize = 128 * 1024 * 1024;
pub const RAM_END: usize = RAM_BASE + RAM_SIZE;

pub const UART_BASE: usize = 0x1000_0000;
pub const UART_SIZE: usize = PAGE_SIZE;

pub const VIRTIO_MMIO_BASE: usize = 0x1000_1000;
pub const VIRTIO_MMIO_END: usize = 0x1000_9000;

pub const CLINT_BASE: usize = 0x0200_0000;
pub const CLINT_END: usize = 0x0201_0000;
pub const CLINT_MTIME_OFFSET: usize = 0xBFF8;
pub const CLINT_MTIMECMP0_OFFSET: usize = 0x4000;

pub const PLIC_BASE: usize = 0x0c00_0000;
pub const PLIC_SIZE: usize = 2 * 1024 * 1024;

/// Base virtual address of pid 1's per-process heap; pid `p`'s heap
/// starts at `HEAP_USER_BASE + p * PER_PROC_HEAP` (§3).
pub const HEAP_USER_BASE: usize = 0x8040_0000;
/// Per-process heap allowance, in bytes.
pub const PER_PROC_HEAP: usize = 8 * 1024;

/// Rounds `addr` up to the next page boundary.
pub const fn align_up_page(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Rounds `addr` down to a page boundary.
pub const fn align_down_page(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

pub const fn is_page_aligned(addr: usize) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}

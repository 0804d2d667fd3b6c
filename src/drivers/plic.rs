//! Platform-Level Interrupt Controller glue (§4.F).
//!
//! Register layout grounded in the teacher's `plic.rs`: QEMU virt's
//! PLIC is the same SiFive PLIC the teacher targets, just accessed
//! here through the claim/complete/enable/threshold/priority
//! operations §4.F names rather than the teacher's free functions.

use crate::memory::layout::PLIC_BASE;

const PRIORITY_OFFSET: usize = 0x00_0000;
const PENDING_OFFSET: usize = 0x00_1000;
const ENABLE_OFFSET: usize = 0x00_2000;
const THRESHOLD_OFFSET: usize = 0x20_0000;
const CLAIM_OFFSET: usize = 0x20_0004;

fn priority_reg() -> *mut u32 {
    (PLIC_BASE + PRIORITY_OFFSET) as *mut u32
}

fn pending_reg() -> *const u32 {
    (PLIC_BASE + PENDING_OFFSET) as *const u32
}

fn enable_reg() -> *mut u32 {
    (PLIC_BASE + ENABLE_OFFSET) as *mut u32
}

fn threshold_reg() -> *mut u32 {
    (PLIC_BASE + THRESHOLD_OFFSET) as *mut u32
}

fn claim_reg() -> *mut u32 {
    (PLIC_BASE + CLAIM_OFFSET) as *mut u32
}

/// Lowers the global threshold to 0 (accept everything) and enables
/// IRQs 1..=10 (virtio 1-8, UART 10) at priority 1, matching the
/// platform's fixed interrupt map (§6).
pub fn init() {
    // SAFETY: PLIC_BASE is identity-mapped RW by `vmm_init` before
    // this runs.
    unsafe {
        threshold_reg().write_volatile(0);
        for id in 1..=10u32 {
            priority_reg().add(id as usize).write_volatile(1);
            let enables = enable_reg();
            enables.write_volatile(enables.read_volatile() | (1 << id));
        }
    }
    log::info!("plic: enabled IRQs 1..=10 at threshold 0");
}

/// Claims the highest-priority pending IRQ, or `None` if none is
/// pending (the PLIC hardwires id 0 to "nothing", §4.F).
pub fn claim() -> Option<u32> {
    // SAFETY: see `init`.
    let id = unsafe { claim_reg().read_volatile() };
    if id == 0 {
        None
    } else {
        Some(id)
    }
}

/// Acknowledges `irq`, claimed via [`claim`] (§4.F).
pub fn complete(irq: u32) {
    // SAFETY: see `init`.
    unsafe {
        claim_reg().write_volatile(irq);
    }
}

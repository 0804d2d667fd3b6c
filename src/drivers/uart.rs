//! 16550-compatible UART driver (§6: `uart_init`, `uart_putc`,
//! `uart_getc_blocking`).
//!
//! Grounded in the teacher's register-level `Uart` driver, but
//! restructured around a static input ring buffer and an RX
//! interrupt handler (the teacher's `console.rs` buffering idea)
//! instead of synchronous polling, since `read` (§4.E, syscall 2) is
//! specified as a genuine suspension point (§5, point 5).

use alloc::collections::VecDeque;
use core::convert::TryInto;

use spin::Mutex;

use crate::memory::layout::UART_BASE;
use crate::sched::ops;

const REG_RBR_THR_DLL: usize = 0;
const REG_IER_DLM: usize = 1;
const REG_FCR: usize = 2;
const REG_LCR: usize = 3;
const REG_LSR: usize = 5;

const LSR_DATA_READY: u8 = 1 << 0;

const IN_BUFFER_CAP: usize = 1024;

static IN_BUFFER: Mutex<VecDeque<u8>> = Mutex::new(VecDeque::new());

fn reg(offset: usize) -> *mut u8 {
    (UART_BASE + offset) as *mut u8
}

/// Programs word length, FIFOs, RX interrupts, and a nominal baud
/// divisor (QEMU's model ignores the latter, but real 16550 hardware
/// doesn't, so it's set anyway).
pub fn init() {
    // SAFETY: UART_BASE is identity-mapped RW by `vmm_init` before
    // this runs, and this is the only code that touches these
    // registers at boot.
    unsafe {
        reg(REG_LCR).write_volatile((1 << 0) | (1 << 1));
        reg(REG_FCR).write_volatile(1 << 0);
        reg(REG_IER_DLM).write_volatile(1 << 0);

        let divisor: u16 = 592;
        let divisor_least: u8 = (divisor & 0xff).try_into().unwrap();
        let divisor_most: u8 = (divisor >> 8).try_into().unwrap();
        let lcr = reg(REG_LCR).read_volatile();
        reg(REG_LCR).write_volatile(lcr | 1 << 7);
        reg(REG_RBR_THR_DLL).write_volatile(divisor_least);
        reg(REG_IER_DLM).write_volatile(divisor_most);
        reg(REG_LCR).write_volatile(lcr);
    }
    log::info!("uart: initialized at {:#x}", UART_BASE);
}

pub fn putc(c: u8) {
    // SAFETY: UART_BASE is identity-mapped RW; single hart, so no
    // concurrent writer.
    unsafe {
        reg(REG_RBR_THR_DLL).write_volatile(c);
    }
}

fn getc_nonblocking_hw() -> Option<u8> {
    // SAFETY: see `putc`.
    unsafe {
        if reg(REG_LSR).read_volatile() & LSR_DATA_READY == 0 {
            None
        } else {
            Some(reg(REG_RBR_THR_DLL).read_volatile())
        }
    }
}

/// Drains every byte the hardware FIFO currently holds into the ring
/// buffer, then wakes every blocked process (§5, suspension point 5).
/// Called from the trap dispatcher on PLIC IRQ 1..=8 — in practice
/// only the UART's own IRQ line of that range fires this, since the
/// block device's completions are handled by `drivers::block`.
pub fn handle_interrupt() {
    let mut woke_any = false;
    {
        let mut buf = IN_BUFFER.lock();
        while let Some(c) = getc_nonblocking_hw() {
            if buf.len() < IN_BUFFER_CAP {
                buf.push_back(c);
            }
            woke_any = true;
        }
    }
    if woke_any {
        crate::sched::wake_all_blocked();
    }
}

/// Blocking read of a single byte (§6: `uart_getc_blocking`). Parks
/// the caller on `blocked_list` whenever the ring buffer is empty.
pub fn getc_blocking() -> u8 {
    loop {
        if let Some(b) = IN_BUFFER.lock().pop_front() {
            return b;
        }
        ops::proc_suspend_current();
    }
}

/// Pops a byte already sitting in the ring buffer without blocking.
/// Used by `read` (§4.E syscall 2) to drain whatever else is
/// immediately available once the first byte has arrived, rather than
/// blocking again for a full `n`-byte buffer.
pub fn getc_nonblocking() -> Option<u8> {
    IN_BUFFER.lock().pop_front()
}

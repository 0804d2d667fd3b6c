//! Trap dispatch (§4.C).
//!
//! `trap.S`'s vector saves the twelve caller-saved registers into a
//! 128-byte frame on the trapped stack and tail-calls
//! [`m_trap_dispatch`] with the frame pointer. This function reads
//! `mcause`/`mepc`/`mtval`/`mstatus`, runs the state machine the
//! teacher's `m_trap` runs (distinguish interrupt vs exception off
//! the top bit of `mcause`, switch on the low bits), and returns the
//! `mepc` the vector should resume at.

pub mod frame;

use crate::cpu;
use crate::drivers::{block, plic, uart};
use crate::error::KernelError;
use crate::sched::{self, ops};
use crate::syscall;
use crate::trap::frame::TrapFrame;

const CAUSE_MACHINE_TIMER: usize = 7;
const CAUSE_MACHINE_EXTERNAL: usize = 11;

const EXC_ILLEGAL_INSTRUCTION: usize = 2;
const EXC_BREAKPOINT: usize = 3;
const EXC_ECALL_FROM_U: usize = 8;
const EXC_ECALL_FROM_S: usize = 9;
const EXC_ECALL_FROM_M: usize = 11;
const EXC_INSTRUCTION_PAGE_FAULT: usize = 12;
const EXC_LOAD_PAGE_FAULT: usize = 13;
const EXC_STORE_PAGE_FAULT: usize = 15;

/// The machine-mode trap dispatcher (§4.C's state machine:
/// `ENTER -> SAVE_FRAME -> DISPATCH -> {ADVANCE_PC | REWRITE_PC |
/// TERMINATE | SCHEDULE} -> RESTORE_FRAME -> MRET`). `SAVE_FRAME` and
/// `RESTORE_FRAME`/`MRET` are `trap.S`'s job; this function is
/// `DISPATCH` and everything it can decide inline.
///
/// # Safety
/// Called only from `m_trap_vector` with `frame` pointing at the
/// 128-byte region that vector just saved on the trapped stack.
#[no_mangle]
unsafe extern "C" fn m_trap_dispatch(frame: *mut TrapFrame) -> usize {
    let mepc = cpu::mepc_read();
    let mtval = cpu::mtval_read();
    let mcause = cpu::mcause_read();
    let mstatus = cpu::mstatus_read();

    let is_interrupt = mcause >> 63 & 1 == 1;
    let code = mcause & 0xfff;

    if crate::config::TRAP_DEBUG {
        log::trace!(
            "trap: cause={:#x} (interrupt={}) epc={:#x} tval={:#x}",
            code,
            is_interrupt,
            mepc,
            mtval
        );
    }

    if is_interrupt {
        dispatch_interrupt(code, mepc)
    } else {
        dispatch_exception(code, mepc, mtval, mstatus, frame)
    }
}

fn dispatch_interrupt(code: usize, mepc: usize) -> usize {
    match code {
        CAUSE_MACHINE_TIMER => {
            cpu::set_next_timer_interrupt();
            sched::schedule();
            mepc
        }
        CAUSE_MACHINE_EXTERNAL => {
            if let Some(irq) = plic::claim() {
                match irq {
                    1..=8 => block::handle_interrupt(),
                    10 => uart::handle_interrupt(),
                    _ => log::warn!("trap: unknown external IRQ {}", irq),
                }
                plic::complete(irq);
            }
            mepc
        }
        other => {
            log::error!("trap: unhandled interrupt cause {}, halting hart", other);
            loop {
                cpu::wfi();
            }
        }
    }
}

fn dispatch_exception(code: usize, mepc: usize, mtval: usize, mstatus: usize, frame: *mut TrapFrame) -> usize {
    match code {
        EXC_ECALL_FROM_U | EXC_ECALL_FROM_S | EXC_ECALL_FROM_M => {
            // SAFETY: frame points at the 128-byte region the vector
            // just populated; it stays valid for the duration of this
            // call.
            let frame_ref = unsafe { &*frame };
            sched::mirror_trapframe_to_current(frame_ref, mepc, mstatus);

            let syscall_number = frame_ref.a7;
            if syscall_number == syscall::SYS_EXEC {
                let name_ptr = frame_ref.a0 as *const u8;
                match syscall::sys_exec_lookup(name_ptr) {
                    Ok(entry) => {
                        // SAFETY: frame is the live trap frame about
                        // to be restored by trap.S; a0/a1 are simple
                        // usize fields.
                        unsafe {
                            (*frame).a0 = 0;
                            (*frame).a1 = 0;
                        }
                        return entry;
                    }
                    Err(KernelError::ExecTargetNotFound) => {
                        // SAFETY: see above.
                        unsafe {
                            (*frame).a0 = (-1isize) as usize;
                        }
                        return mepc + 4;
                    }
                    Err(_) => {
                        unsafe {
                            (*frame).a0 = (-1isize) as usize;
                        }
                        return mepc + 4;
                    }
                }
            }

            let ret = syscall::dispatch(frame_ref, mepc);
            // SAFETY: see above.
            unsafe {
                (*frame).a0 = ret as usize;
            }
            mepc + 4
        }
        EXC_BREAKPOINT
        | EXC_ILLEGAL_INSTRUCTION
        | EXC_INSTRUCTION_PAGE_FAULT
        | EXC_LOAD_PAGE_FAULT
        | EXC_STORE_PAGE_FAULT => {
            log::warn!(
                "trap: fatal exception {} for pid {} at {:#x} (tval={:#x}), terminating process",
                code,
                sched::current_pid(),
                mepc,
                mtval
            );
            terminate_current_or_halt()
        }
        other => {
            log::error!("trap: unhandled exception cause {} at {:#x} (tval={:#x})", other, mepc, mtval);
            terminate_current_or_halt()
        }
    }
}

/// §7: "terminate via exit path; if no current process exists, the
/// hart halts." `ops::proc_exit` never returns (it diverges through
/// `schedule`'s context switch), so this function's return type is
/// only reachable when IDLE itself faults, which should not happen in
/// practice but is handled the same way the teacher's unknown-trap
/// path is: log and park.
fn terminate_current_or_halt() -> usize {
    if sched::current_pid() == crate::sched::pcb::IDLE_PID {
        log::error!("trap: fault in IDLE, halting hart");
        loop {
            cpu::wfi();
        }
    }
    ops::proc_exit();
}

//! Process control block and saved register state (§3).

use crate::memory::layout::{HEAP_USER_BASE, PAGE_SIZE, PER_PROC_HEAP};

pub const MAX_PROCS: usize = 64;
pub const NAME_LEN: usize = 20; // 19 chars + NUL, per §3.
pub const IDLE_PID: usize = 0;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// The kernel-thread resume point `switch_context` saves/restores
/// (§6: "context-switch ABI"). Its layout (ra, sp, then twelve
/// callee-saved registers) must match the offsets `switch.S` uses.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct SwitchFrame {
    pub ra: usize,
    pub sp: usize,
    /// s0..s11. `s[2]` doubles as the mepc the `forkret`/
    /// `resume_prebuilt` trampolines load before their first `mret`
    /// (see those trampolines in `switch.S`).
    pub s: [usize; 12],
}

impl SwitchFrame {
    pub const fn zeroed() -> Self {
        SwitchFrame { ra: 0, sp: 0, s: [0; 12] }
    }
}

/// Saved register image (§3): the kernel-thread resume point plus a
/// mirror of the trap frame as of the last ecall, refreshed by the
/// trap dispatcher on every syscall entry so that a synchronous
/// `fork()` sees the live caller rather than a stale snapshot from
/// the last preemption.
#[derive(Clone, Copy, Debug)]
pub struct RegState {
    pub switch: SwitchFrame,
    pub ra: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
    /// Pre-trap sp (frame pointer + 128), mirrored on ecall entry.
    pub sp: usize,
    pub sepc: usize,
    pub mstatus: usize,
}

impl RegState {
    pub const fn zeroed() -> Self {
        RegState {
            switch: SwitchFrame::zeroed(),
            ra: 0,
            t0: 0,
            t1: 0,
            t2: 0,
            a0: 0,
            a1: 0,
            a2: 0,
            a3: 0,
            a4: 0,
            a5: 0,
            a6: 0,
            a7: 0,
            sp: 0,
            sepc: 0,
            mstatus: 0,
        }
    }
}

#[derive(Clone, Copy)]
pub struct ProcName {
    bytes: [u8; NAME_LEN],
}

impl ProcName {
    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; NAME_LEN];
        let src = name.as_bytes();
        let n = src.len().min(NAME_LEN - 1);
        bytes[..n].copy_from_slice(&src[..n]);
        ProcName { bytes }
    }

    pub fn as_str(&self) -> &str {
        let len = self.bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.bytes[..len]).unwrap_or("?")
    }
}

impl core::fmt::Debug for ProcName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// One process control block (§3). Lives in the fixed table the
/// `World` owns; sets are represented as index queues over that
/// table rather than intrusive `next` pointers (§9's recommendation
/// (b), chosen because it maps cleanly onto Rust ownership: the table
/// owns every `Pcb`, and "in at most one set" becomes a property of
/// which queue holds the index, not a convention callers must honor).
#[derive(Clone, Copy, Debug)]
pub struct Pcb {
    pub pid: usize,
    pub ppid: usize,
    pub name: ProcName,
    pub state: ProcState,
    pub priority: u8,
    pub entrypoint: usize,
    pub regs: RegState,
    pub stacktop: usize,
    pub brk_base: usize,
    pub brk_size: usize,
}

impl Pcb {
    pub const fn empty() -> Self {
        Pcb {
            pid: 0,
            ppid: 0,
            name: ProcName { bytes: [0; NAME_LEN] },
            state: ProcState::Terminated,
            priority: 0,
            entrypoint: 0,
            regs: RegState::zeroed(),
            stacktop: 0,
            brk_base: 0,
            brk_size: 0,
        }
    }

    /// The deterministic per-process heap base (§3).
    pub fn heap_base_for(pid: usize) -> usize {
        HEAP_USER_BASE + pid * PER_PROC_HEAP
    }

    pub fn heap_pages(&self) -> usize {
        self.brk_size.div_ceil(PAGE_SIZE)
    }
}

//! Kernel-internal error types.
//!
//! The core never unwinds or long-jumps out of a trap: every operation
//! either succeeds with a defined value or fails locally and returns a
//! distinguishable sentinel (§7). `KernelError` is the typed form used
//! between Rust functions; the syscall layer is the one place that
//! flattens it back down to the NULL/−1 sentinels the ABI promises
//! user code.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// `kalloc` found the free list empty.
    OutOfFrames,
    /// A virtual or physical address failed the 4 KiB alignment check
    /// a given operation requires.
    Misaligned { addr: usize },
    /// `vmm_translate` (or an internal walk) found no valid leaf PTE.
    Unmapped { va: usize },
    /// An intermediate page-table level could not be allocated.
    PageTableAllocFailed,
    ProcessNotFound { pid: usize },
    /// `proc_kill(0)`: IDLE may never be killed.
    CannotKillIdle,
    /// `proc_fork` ran out of frames partway through duplicating the
    /// caller; the caller observes this as fork() returning NULL and
    /// every partial allocation has already been unwound.
    ForkAllocFailed,
    /// `sys_exec_lookup` found no program registered under that name.
    ExecTargetNotFound,
    NoChildren,
    /// The process table (`World::procs`) has no free slot.
    ProcessTableFull,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfFrames => write!(f, "physical frame allocator exhausted"),
            KernelError::Misaligned { addr } => write!(f, "address {:#x} is not page-aligned", addr),
            KernelError::Unmapped { va } => write!(f, "virtual address {:#x} is unmapped", va),
            KernelError::PageTableAllocFailed => write!(f, "failed to allocate a page-table page"),
            KernelError::ProcessNotFound { pid } => write!(f, "no process with pid {}", pid),
            KernelError::CannotKillIdle => write!(f, "pid 0 (IDLE) cannot be killed"),
            KernelError::ForkAllocFailed => write!(f, "fork: allocation failed, rolled back"),
            KernelError::ExecTargetNotFound => write!(f, "exec: no such program"),
            KernelError::NoChildren => write!(f, "wait: caller has no children"),
            KernelError::ProcessTableFull => write!(f, "process table full"),
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Flattens a `KernelResult<usize>` into the `isize` sentinel the
/// syscall ABI returns in a0 (§4.E): the value on success, −1 on any
/// failure. Used by syscalls whose only failure mode is "−1".
pub fn sentinel_isize(r: KernelResult<usize>) -> isize {
    match r {
        Ok(v) => v as isize,
        Err(_) => -1,
    }
}

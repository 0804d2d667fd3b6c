//! Numbered syscall dispatch (§4.E).
//!
//! Mirrors the teacher's `do_syscall`: the number rides in a7,
//! arguments in a0-a5, the return value goes back in a0. Exec is the
//! one exception — it rewrites mepc instead, so the trap dispatcher
//! calls [`sys_exec_lookup`] directly rather than going through
//! [`dispatch`] (§4.C).

use crate::drivers::uart;
use crate::error::{sentinel_isize, KernelError};
use crate::fs;
use crate::sched::ops;
use crate::trap::frame::TrapFrame;

pub const SYS_WRITE: usize = 1;
pub const SYS_READ: usize = 2;
pub const SYS_EXIT: usize = 3;
pub const SYS_GETPID: usize = 4;
pub const SYS_FORK: usize = 5;
pub const SYS_WAIT: usize = 6;
pub const SYS_EXEC: usize = 7;
pub const SYS_SBRK: usize = 8;
pub const SYS_PS: usize = 9;
pub const SYS_KILL: usize = 10;

/// Dispatches every syscall except `exec` (§4.C handles that one
/// inline so it can rewrite mepc). Returns the 64-bit value the trap
/// dispatcher writes back into a0.
pub fn dispatch(frame: &TrapFrame, mepc: usize) -> i64 {
    match frame.a7 {
        SYS_WRITE => sys_write(frame.a0 as *const u8, frame.a1) as i64,
        SYS_READ => sys_read(frame.a0 as *mut u8, frame.a1) as i64,
        // Never returns.
        SYS_EXIT => ops::proc_exit(),
        SYS_GETPID => crate::sched::current_pid() as i64,
        SYS_FORK => sentinel_isize(ops::proc_fork(mepc)) as i64,
        SYS_WAIT => sentinel_isize(ops::proc_wait_and_reap()) as i64,
        SYS_SBRK => sentinel_isize(ops::proc_sbrk(frame.a0)) as i64,
        SYS_PS => {
            ops::ps_dump();
            0
        }
        SYS_KILL => match ops::proc_kill(frame.a0) {
            Ok(()) => 0,
            Err(_) => -1,
        },
        other => {
            log::warn!("syscall: unknown number {}", other);
            -1
        }
    }
}

/// `write(buf, n)`: writes `n` bytes from a user buffer to the UART,
/// returns the count (§4.E). The identity-mapped, permissive address
/// space (§1 non-goals) means `buf` can be dereferenced directly.
fn sys_write(buf: *const u8, n: usize) -> usize {
    // SAFETY: the kernel and every process share one identity-mapped,
    // RW address space (§1); `buf` is trusted the way the rest of
    // this syscall layer trusts user pointers.
    let bytes = unsafe { core::slice::from_raw_parts(buf, n) };
    for &b in bytes {
        uart::putc(b);
    }
    n
}

/// `read(buf, n)`: blocking UART read of up to `n` bytes (§4.E).
/// Blocks only until the first byte arrives (parking the caller on
/// `blocked_list`; the PLIC UART ISR wakes it back up, §5 suspension
/// point 5), then drains whatever else is already buffered, up to
/// `n`, without blocking again — a line shorter than the caller's
/// buffer returns early rather than waiting to fill it.
fn sys_read(buf: *mut u8, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    // SAFETY: see `sys_write`.
    let bytes = unsafe { core::slice::from_raw_parts_mut(buf, n) };
    bytes[0] = uart::getc_blocking();
    let mut count = 1;
    while count < n {
        match uart::getc_nonblocking() {
            Some(b) => {
                bytes[count] = b;
                count += 1;
            }
            None => break,
        }
    }
    count
}

/// Resolves an `exec` target by name, looked up through the
/// filesystem (§4.E, §6: `fs_lookup`). Called directly from the trap
/// dispatcher, not through [`dispatch`].
///
/// # Safety
/// `name_ptr` must point at a NUL-terminated string in the shared
/// address space.
pub unsafe fn sys_exec_lookup(name_ptr: *const u8) -> crate::error::KernelResult<usize> {
    let name = read_cstr(name_ptr);
    fs::fs_lookup(name).ok_or(KernelError::ExecTargetNotFound)
}

/// Reads a NUL-terminated string out of the shared address space, up
/// to a generous bound, without allocating.
unsafe fn read_cstr(ptr: *const u8) -> &'static str {
    const MAX_LEN: usize = 64;
    let mut len = 0;
    while len < MAX_LEN && *ptr.add(len) != 0 {
        len += 1;
    }
    let slice = core::slice::from_raw_parts(ptr, len);
    core::str::from_utf8(slice).unwrap_or("")
}

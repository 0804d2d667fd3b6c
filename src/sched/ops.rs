//! Process lifecycle operations (§4.D: creation, fork, exit/reap,
//! kill, suspend, shutdown).

use crate::cpu;
use crate::error::{KernelError, KernelResult};
use crate::memory::layout::PAGE_SIZE;
use crate::memory::vmm::{self, MapFlags};
use crate::memory::frame;
use crate::sched::pcb::{Pcb, ProcName, ProcState, RegState, SwitchFrame, IDLE_PID};
use crate::sched::{self, World};
use crate::sync::IrqGuard;
use crate::trap::frame::TrapFrame;

/// Builds a PCB with a fresh kernel stack whose `SwitchFrame` bootstraps
/// through `forkret` into `entry` (§4.D, `proc_create` steps 2-3).
/// Shared by `proc_create` and IDLE's own installation in `sched::init`.
pub(crate) fn build_fresh_pcb(pid: usize, ppid: usize, name: &str, entry: usize, priority: u8) -> KernelResult<Pcb> {
    let stack_pa = frame::kalloc_zeroed()?;
    let stacktop = stack_pa + PAGE_SIZE;

    let mut regs = RegState::zeroed();
    regs.switch = SwitchFrame {
        ra: forkret_addr(),
        sp: stacktop,
        s: {
            let mut s = [0usize; 12];
            s[2] = entry;
            s
        },
    };
    regs.sepc = entry;
    regs.mstatus = cpu::initial_mstatus();

    Ok(Pcb {
        pid,
        ppid,
        name: ProcName::new(name),
        state: ProcState::Ready,
        priority,
        entrypoint: entry,
        regs,
        stacktop,
        brk_base: 0,
        brk_size: 0,
    })
}

fn forkret_addr() -> usize {
    extern "C" {
        fn forkret();
    }
    forkret as usize
}

fn resume_prebuilt_addr() -> usize {
    extern "C" {
        fn resume_prebuilt();
    }
    resume_prebuilt as usize
}

/// `proc_create(name, entry, priority) -> PCB | NULL` (§4.D).
pub fn proc_create(name: &str, entry: usize, priority: u8) -> KernelResult<usize> {
    let _guard = IrqGuard::acquire();
    sched::with_world(|world| {
        let idx = world.alloc_slot()?;
        let pid = world.alloc_pid();
        let pcb = build_fresh_pcb(pid, 0, name, entry, priority)?;
        world.slots[idx] = Some(pcb);
        world.ready_enqueue(idx);
        Ok(idx)
    })
}

/// `proc_fork(mepc) -> PCB | NULL` (§4.D). Runs inside the ecall path
/// for the syscall's own caller, so `sched::mirror_trapframe_to_current`
/// has already refreshed the parent's `RegState` with its live
/// registers before this is called.
pub fn proc_fork(mepc: usize) -> KernelResult<usize> {
    let _guard = IrqGuard::acquire();
    sched::with_world(|world| {
        let parent_idx = world.current.ok_or(KernelError::ProcessNotFound { pid: 0 })?;
        let (ppid, parent_name, priority, entrypoint, parent_regs, parent_brk_base, parent_brk_size) = {
            let parent = world.slots[parent_idx].as_ref().unwrap();
            (
                parent.pid,
                parent.name,
                parent.priority,
                parent.entrypoint,
                parent.regs,
                parent.brk_base,
                parent.brk_size,
            )
        };

        let child_idx = world.alloc_slot()?;
        let child_pid = world.alloc_pid();

        let rollback_table_slot = |world: &mut World, idx: usize, pid: usize| {
            world.slots[idx] = None;
            world.release_pid(pid);
        };

        let stack_pa = match frame::kalloc_zeroed() {
            Ok(pa) => pa,
            Err(e) => {
                rollback_table_slot(world, child_idx, child_pid);
                return Err(e);
            }
        };
        let stacktop = stack_pa + PAGE_SIZE;

        // Build the child's initial trap frame at the top of its
        // stack, mirroring the parent's live registers with a0
        // cleared (child's fork() return value) and mepc advanced
        // past the ecall (§4.D step 3).
        let frame_va = stacktop - TrapFrame::SIZE;
        let child_frame = frame_va as *mut TrapFrame;
        // SAFETY: stack_pa is a freshly allocated, exclusively owned
        // frame, identity-mapped RAM, large enough to hold one
        // TrapFrame at its top.
        unsafe {
            child_frame.write(TrapFrame::from_regs(
                parent_regs.ra,
                parent_regs.t0,
                parent_regs.t1,
                parent_regs.t2,
                0,
                parent_regs.a1,
                parent_regs.a2,
                parent_regs.a3,
                parent_regs.a4,
                parent_regs.a5,
                parent_regs.a6,
                parent_regs.a7,
            ));
        }

        let mut regs = parent_regs;
        regs.a0 = 0;
        regs.sepc = mepc + 4;
        regs.switch = SwitchFrame {
            ra: resume_prebuilt_addr(),
            sp: frame_va,
            s: {
                let mut s = [0usize; 12];
                s[2] = mepc + 4;
                s
            },
        };

        let mut child = Pcb {
            pid: child_pid,
            ppid,
            name: parent_name,
            state: ProcState::Ready,
            priority,
            entrypoint,
            regs,
            stacktop,
            brk_base: 0,
            brk_size: 0,
        };

        if parent_brk_size > 0 {
            child.brk_base = Pcb::heap_base_for(child_pid);
            child.brk_size = parent_brk_size;
            let pages = parent_brk_size.div_ceil(PAGE_SIZE);
            let mut mapped = 0usize;
            let mut fork_failed = false;
            for i in 0..pages {
                let child_va = child.brk_base + i * PAGE_SIZE;
                let parent_va = parent_brk_base + i * PAGE_SIZE;
                match vmm::vmm_map_page(child_va, MapFlags::PRESENT | MapFlags::RW | MapFlags::USER) {
                    Ok(child_pa) => {
                        // SAFETY: child_pa was just freshly mapped
                        // and is exclusively owned by this process;
                        // parent_va is the parent's own live,
                        // page-aligned heap page, identity-mapped.
                        unsafe {
                            core::ptr::copy_nonoverlapping(
                                parent_va as *const u8,
                                child_pa as *mut u8,
                                PAGE_SIZE,
                            );
                        }
                        mapped += 1;
                    }
                    Err(_) => {
                        fork_failed = true;
                        break;
                    }
                }
            }
            if fork_failed {
                for i in 0..mapped {
                    let _ = vmm::vmm_unmap(child.brk_base + i * PAGE_SIZE, true);
                }
                frame::kfree(stack_pa);
                rollback_table_slot(world, child_idx, child_pid);
                return Err(KernelError::ForkAllocFailed);
            }
        }

        world.slots[child_idx] = Some(child);
        world.ready_enqueue(child_idx);
        Ok(child_idx)
    })
}

/// `proc_exit()` (§4.D). Never returns: control leaves through
/// `schedule`'s context switch into whatever runs next.
pub fn proc_exit() -> ! {
    {
        let _guard = IrqGuard::acquire();
        sched::with_world(|world| {
            if let Some(idx) = world.current {
                let (pid, ppid) = {
                    let p = world.slots[idx].as_mut().unwrap();
                    p.state = ProcState::Terminated;
                    (p.pid, p.ppid)
                };
                world.zombie_push_front(idx);
                if let Some(parent_idx) = world.slot_of_pid(ppid) {
                    if world.blocked_remove(parent_idx) {
                        world.slots[parent_idx].as_mut().unwrap().state = ProcState::Ready;
                        world.ready_enqueue(parent_idx);
                    }
                }
                let _ = pid;
            }
        });
    }
    sched::schedule();
    loop {
        cpu::wfi();
    }
}

/// `proc_wait_and_reap() -> pid | -1` (§4.D).
pub fn proc_wait_and_reap() -> KernelResult<usize> {
    loop {
        let found = {
            let _guard = IrqGuard::acquire();
            sched::with_world(|world| {
                let current_pid = world.current_pcb().map(|p| p.pid);
                let current_pid = match current_pid {
                    Some(pid) => pid,
                    None => return Err(KernelError::NoChildren),
                };
                if let Some(idx) = world.find_zombie_child_of(current_pid) {
                    world.zombie_remove(idx);
                    let reaped_pid = reclaim_slot(world, idx);
                    return Ok(Some(reaped_pid));
                }
                let has_any_child = world.slots.iter().flatten().any(|p| p.ppid == current_pid);
                if !has_any_child {
                    return Err(KernelError::NoChildren);
                }
                Ok(None)
            })
        };

        match found {
            Ok(Some(pid)) => return Ok(pid),
            Err(e) => return Err(e),
            Ok(None) => {
                suspend_current_on_blocked_list();
                sched::schedule();
            }
        }
    }
}

fn suspend_current_on_blocked_list() {
    let _guard = IrqGuard::acquire();
    sched::with_world(|world| {
        if let Some(idx) = world.current {
            world.slots[idx].as_mut().unwrap().state = ProcState::Blocked;
            world.blocked_push(idx);
        }
    });
}

/// `proc_suspend_current()` (§4.D).
pub fn proc_suspend_current() {
    suspend_current_on_blocked_list();
    sched::schedule();
}

/// Frees every resource a terminated PCB holds (kernel stack, user
/// heap pages) and returns the slot to the table. Returns the pid
/// that was freed.
pub(crate) fn reclaim_slot(world: &mut World, idx: usize) -> usize {
    let pcb = world.slots[idx].take().expect("reclaim_slot on an empty slot");
    frame::kfree(pcb.stacktop - PAGE_SIZE);
    for i in 0..pcb.heap_pages() {
        let va = pcb.brk_base + i * PAGE_SIZE;
        let _ = vmm::vmm_unmap(va, true);
    }
    world.release_pid(pcb.pid);
    pcb.pid
}

/// `proc_kill(pid) -> 0 | -1` (§4.D).
pub fn proc_kill(pid: usize) -> KernelResult<()> {
    if pid == IDLE_PID {
        return Err(KernelError::CannotKillIdle);
    }
    let _guard = IrqGuard::acquire();
    let is_current = sched::with_world(|world| world.current_pcb().map(|p| p.pid) == Some(pid));
    if is_current {
        drop(_guard);
        proc_exit();
    }

    sched::with_world(|world| {
        let idx = world.slot_of_pid(pid).ok_or(KernelError::ProcessNotFound { pid })?;
        world.ready_remove(idx);
        world.blocked_remove(idx);
        world.zombie_remove(idx);
        reclaim_slot(world, idx);
        Ok(())
    })
}

/// `proc_shutdown_all()` (§4.D). Caller must already hold the
/// interrupt gate and must not call `schedule` afterward.
pub fn proc_shutdown_all() {
    sched::with_world(|world| {
        let current = world.current;
        let victims: alloc::vec::Vec<usize> = (0..world.slots.len())
            .filter(|&idx| idx != IDLE_PID && Some(idx) != current && world.slots[idx].is_some())
            .collect();
        for idx in victims {
            world.ready_remove(idx);
            world.blocked_remove(idx);
            world.zombie_remove(idx);
            reclaim_slot(world, idx);
        }
    });
}

/// `sbrk(n) -> old_break` (§4.E). Grows the caller's heap by `n`
/// bytes, page by page, via `vmm_map_page`; returns the break as it
/// stood before the growth.
pub fn proc_sbrk(n: usize) -> KernelResult<usize> {
    let _guard = IrqGuard::acquire();
    sched::with_world(|world| {
        let idx = world.current.ok_or(KernelError::ProcessNotFound { pid: 0 })?;
        let (pid, brk_base, old_size) = {
            let p = world.slots[idx].as_ref().unwrap();
            (p.pid, p.brk_base, p.brk_size)
        };
        let brk_base = if brk_base == 0 { Pcb::heap_base_for(pid) } else { brk_base };
        let old_break = brk_base + old_size;

        let pages_before = old_size.div_ceil(PAGE_SIZE);
        let pages_after = (old_size + n).div_ceil(PAGE_SIZE);
        let mut mapped = 0usize;
        for i in pages_before..pages_after {
            let va = brk_base + i * PAGE_SIZE;
            if vmm::vmm_map_page(va, MapFlags::PRESENT | MapFlags::RW | MapFlags::USER).is_err() {
                for j in pages_before..pages_before + mapped {
                    let _ = vmm::vmm_unmap(brk_base + j * PAGE_SIZE, true);
                }
                return Err(KernelError::OutOfFrames);
            }
            mapped += 1;
        }

        let p = world.slots[idx].as_mut().unwrap();
        p.brk_base = brk_base;
        p.brk_size = old_size + n;
        Ok(old_break)
    })
}

/// Dumps the process table to the UART for the `ps` syscall (§4.E).
pub fn ps_dump() {
    sched::with_world(|world| {
        crate::println!("PID  PPID STATE       NAME");
        for slot in world.slots.iter().flatten() {
            crate::println!(
                "{:<4} {:<4} {:<11?} {}",
                slot.pid,
                slot.ppid,
                slot.state,
                slot.name.as_str()
            );
        }
    });
}

//! Scheduler and process sets (§4.D).
//!
//! Per §9's design notes, the source's scattered globals (`current`,
//! `ready_queue`, `blocked_list`, `zombie_list`, `next_pid`) are
//! collected into one `World` value behind a single lock, and its
//! intrusive `next`-pointer sets are replaced by index queues over a
//! fixed `Pcb` table (§9 option (b)).

pub mod ops;
pub mod pcb;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::cpu;
use crate::error::{KernelError, KernelResult};
use crate::sched::pcb::{Pcb, ProcState, SwitchFrame, IDLE_PID, MAX_PROCS};
use crate::sync::IrqGuard;
use crate::trap::frame::TrapFrame;

extern "C" {
    fn switch_context(old: *mut SwitchFrame, new: *const SwitchFrame);
}

pub struct World {
    slots: [Option<Pcb>; MAX_PROCS],
    ready_queue: VecDeque<usize>,
    blocked_list: Vec<usize>,
    zombie_list: Vec<usize>,
    current: Option<usize>,
    next_pid: usize,
}

impl World {
    fn new() -> Self {
        World {
            slots: [None; MAX_PROCS],
            ready_queue: VecDeque::new(),
            blocked_list: Vec::new(),
            zombie_list: Vec::new(),
            current: None,
            next_pid: 1,
        }
    }

    fn alloc_slot(&mut self) -> KernelResult<usize> {
        self.slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(KernelError::ProcessTableFull)
    }

    fn alloc_pid(&mut self) -> usize {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// §3: "On reap, if the reaped pid equals next_pid − 1, next_pid
    /// is decremented to permit immediate reuse."
    fn release_pid(&mut self, pid: usize) {
        if pid + 1 == self.next_pid {
            self.next_pid -= 1;
        }
    }

    fn slot_of_pid(&self, pid: usize) -> Option<usize> {
        self.slots.iter().position(|s| matches!(s, Some(p) if p.pid == pid))
    }

    fn current_pcb(&self) -> Option<&Pcb> {
        self.current.and_then(|idx| self.slots[idx].as_ref())
    }

    fn current_pcb_mut(&mut self) -> Option<&mut Pcb> {
        self.current.and_then(move |idx| self.slots[idx].as_mut())
    }
}

lazy_static! {
    static ref WORLD: Mutex<World> = Mutex::new(World::new());
}

/// Releases `WORLD`'s lock without running the normal unlock path.
///
/// `schedule` takes the lock, decides on a switch, and then calls
/// into `switch_context`, which may not return into this function at
/// all (a fresh or forked process instead diverges into `forkret`/
/// `resume_prebuilt`). Either way the lock must be released exactly
/// once per switch, so `schedule` forgets its guard before the switch
/// and this function (called from both the post-switch line in
/// `schedule` and the two trampolines in `switch.S`) is the one place
/// that actually clears it.
///
/// # Safety
/// Must only be called when `WORLD` is genuinely held by the switch
/// that is completing, with no other reference to its data alive.
#[no_mangle]
extern "C" fn scheduler_unlock() {
    unsafe {
        WORLD.force_unlock();
    }
}

/// Installs the IDLE process (pid 0) and its `wfi` loop body.
/// Interrupts are off for the whole of boot, so no locking concerns
/// here beyond the ordinary `Mutex` API.
pub fn init() {
    extern "C" fn idle_loop() -> ! {
        loop {
            cpu::wfi();
        }
    }

    let mut world = WORLD.lock();
    let idx = world.alloc_slot().expect("process table too small for IDLE");
    debug_assert_eq!(idx, IDLE_PID);
    let idle = ops::build_fresh_pcb(IDLE_PID, 0, "IDLE", idle_loop as usize, 0)
        .expect("failed to allocate IDLE's kernel stack");
    world.slots[idx] = Some(idle);
    log::info!("scheduler: IDLE installed at pid 0");
}

/// Mirrors the live trap frame back into the current process's
/// `RegState` (§4.C: "so that a subsequent fork observes the live
/// caller's register state rather than a stale snapshot"). Called by
/// the trap dispatcher on every ecall entry, before syscall dispatch.
pub fn mirror_trapframe_to_current(frame: &TrapFrame, epc: usize, mstatus: usize) {
    let mut world = WORLD.lock();
    if let Some(p) = world.current_pcb_mut() {
        p.regs.ra = frame.ra;
        p.regs.t0 = frame.t0;
        p.regs.t1 = frame.t1;
        p.regs.t2 = frame.t2;
        p.regs.a0 = frame.a0;
        p.regs.a1 = frame.a1;
        p.regs.a2 = frame.a2;
        p.regs.a3 = frame.a3;
        p.regs.a4 = frame.a4;
        p.regs.a5 = frame.a5;
        p.regs.a6 = frame.a6;
        p.regs.a7 = frame.a7;
        p.regs.sp = frame as *const TrapFrame as usize + TrapFrame::SIZE;
        p.regs.sepc = epc;
        p.regs.mstatus = mstatus;
    }
}

pub fn current_pid() -> usize {
    WORLD.lock().current_pcb().map(|p| p.pid).unwrap_or(IDLE_PID)
}

/// The scheduler loop (§4.D). Invoked from the timer ISR and
/// voluntarily from blocking calls. Runs with interrupts disabled and
/// re-enables them at the tail (via the resumed process's own mret,
/// or — on the very first call — by simply not touching them, since
/// boot runs with interrupts off until this returns).
pub fn schedule() {
    let _guard = IrqGuard::acquire();
    let mut world = WORLD.lock();

    let next_idx = match world.ready_queue.pop_front() {
        Some(idx) => idx,
        None => match world.current {
            Some(idx) if world.slots[idx].as_ref().map(|p| p.state) == Some(ProcState::Running) => idx,
            _ => IDLE_PID,
        },
    };

    if world.current == Some(next_idx) {
        if let Some(p) = world.slots[next_idx].as_mut() {
            if p.state == ProcState::Running {
                drop(world);
                zombies_free();
                return;
            }
        }
    }

    let old_idx = world.current;
    if let Some(idx) = old_idx {
        if let Some(p) = world.slots[idx].as_mut() {
            if p.state == ProcState::Running {
                p.state = ProcState::Ready;
                if idx != IDLE_PID {
                    world.ready_queue.push_back(idx);
                }
            }
        }
    }

    if let Some(p) = world.slots[next_idx].as_mut() {
        p.state = ProcState::Running;
    }
    world.current = Some(next_idx);

    let new_ptr = world.slots[next_idx].as_ref().unwrap() as *const Pcb;
    let new_switch: *const SwitchFrame = unsafe { core::ptr::addr_of!((*new_ptr).regs.switch) };

    match old_idx {
        None => {
            let mut boot_frame = SwitchFrame::zeroed();
            core::mem::forget(world);
            unsafe {
                switch_context(&mut boot_frame, new_switch);
            }
            scheduler_unlock();
        }
        Some(idx) => {
            let old_ptr = world.slots[idx].as_mut().unwrap() as *mut Pcb;
            let old_switch: *mut SwitchFrame = unsafe { core::ptr::addr_of_mut!((*old_ptr).regs.switch) };
            core::mem::forget(world);
            unsafe {
                switch_context(old_switch, new_switch);
            }
            scheduler_unlock();
        }
    }

    zombies_free();
}

/// Reaps every zombie whose parent will never call `wait` (pid 0,
/// §4.D "opportunistic" reaping).
pub fn zombies_free() {
    let _guard = IrqGuard::acquire();
    let mut world = WORLD.lock();
    let orphans: Vec<usize> = world
        .zombie_list
        .iter()
        .copied()
        .filter(|&idx| world.slots[idx].as_ref().map(|p| p.ppid) == Some(0))
        .collect();
    for idx in orphans {
        world.zombie_list.retain(|&z| z != idx);
        ops::reclaim_slot(&mut world, idx);
    }
}

/// Moves every `BLOCKED` process back to `ready_queue` (§5, suspension
/// point 5: UART RX delivery wakes blocked readers). Coarser than a
/// per-channel wait queue — a process blocked in `wait` is woken too,
/// finds nothing, and re-blocks — but preserves the only invariant
/// that matters here: no process sleeps forever past the event it was
/// waiting for.
pub fn wake_all_blocked() {
    let _guard = IrqGuard::acquire();
    let mut world = WORLD.lock();
    let woken: Vec<usize> = core::mem::take(&mut world.blocked_list);
    for idx in woken {
        if let Some(p) = world.slots[idx].as_mut() {
            p.state = ProcState::Ready;
        }
        world.ready_queue.push_back(idx);
    }
}

pub(crate) fn with_world<R>(f: impl FnOnce(&mut World) -> R) -> R {
    let mut world = WORLD.lock();
    f(&mut world)
}

impl World {
    pub(crate) fn ready_enqueue(&mut self, idx: usize) {
        self.ready_queue.push_back(idx);
    }
    pub(crate) fn blocked_push(&mut self, idx: usize) {
        self.blocked_list.push(idx);
    }
    pub(crate) fn blocked_remove(&mut self, idx: usize) -> bool {
        if let Some(pos) = self.blocked_list.iter().position(|&b| b == idx) {
            self.blocked_list.remove(pos);
            true
        } else {
            false
        }
    }
    pub(crate) fn zombie_push_front(&mut self, idx: usize) {
        self.zombie_list.insert(0, idx);
    }
    pub(crate) fn zombie_remove(&mut self, idx: usize) -> bool {
        if let Some(pos) = self.zombie_list.iter().position(|&z| z == idx) {
            self.zombie_list.remove(pos);
            true
        } else {
            false
        }
    }
    pub(crate) fn ready_remove(&mut self, idx: usize) -> bool {
        if let Some(pos) = self.ready_queue.iter().position(|&r| r == idx) {
            self.ready_queue.remove(pos);
            true
        } else {
            false
        }
    }
    pub(crate) fn find_zombie_child_of(&self, ppid: usize) -> Option<usize> {
        self.zombie_list.iter().copied().find(|&idx| self.slots[idx].as_ref().map(|p| p.ppid) == Some(ppid))
    }
}

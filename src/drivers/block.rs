//! Virtio-mmio block device (§6: `blk_init`, `blk_intr`, and a
//! sector-keyed read/write operation for the filesystem).
//!
//! Grounded in the teacher's `block.rs` request/descriptor-chain
//! protocol, trimmed to one request in flight at a time (the
//! filesystem never issues concurrent I/O in this kernel) and to a
//! busy-poll completion wait instead of a dedicated wait channel,
//! since the only suspension points this kernel's scheduler models
//! are the ones §5 enumerates and block I/O is not one of them.

use core::mem::size_of;

use spin::Mutex;

use crate::config::VIRTIO_LEGACY;
use crate::cpu;
use crate::drivers::virtio::{self, Descriptor, MmioDevice, MmioOffset, Queue, DESC_F_NEXT, DESC_F_WRITE, RING_SIZE};
use crate::memory::frame;
use crate::memory::layout::PAGE_SIZE;

pub const SECTOR_SIZE: usize = 512;

const BLK_T_IN: u32 = 0;
const BLK_T_OUT: u32 = 1;

#[repr(C)]
struct RequestHeader {
    blktype: u32,
    reserved: u32,
    sector: u64,
}

struct BlockDevice {
    dev: MmioDevice,
    queue_pa: usize,
    next_avail_idx: u16,
    last_used_idx: u16,
}

// Single hart; every access to BLOCK is taken with interrupts off via
// the caller's IrqGuard (mirroring §5's "externally serialized by the
// same gate on the driver side").
unsafe impl Send for BlockDevice {}

static BLOCK: Mutex<Option<BlockDevice>> = Mutex::new(None);

fn queue_ref(pa: usize) -> &'static mut Queue {
    // SAFETY: pa is the frame `init` allocated for the virtqueue and
    // nothing else references it.
    unsafe { &mut *(pa as *mut Queue) }
}

/// Probes for a virtio-mmio block device, negotiates the minimal
/// feature set, and installs queue 0 (§6: `blk_init`).
pub fn init() {
    let Some(dev) = virtio::probe(2) else {
        log::warn!("block: no virtio block device found");
        return;
    };

    // SAFETY: dev.base is identity-mapped RW MMIO; this is the only
    // code touching it during the handshake.
    unsafe {
        dev.write(MmioOffset::Status, 0);
        dev.write(MmioOffset::Status, virtio::STATUS_ACKNOWLEDGE);
        dev.write(MmioOffset::Status, virtio::STATUS_ACKNOWLEDGE | virtio::STATUS_DRIVER);
        dev.write(MmioOffset::GuestFeatures, 0);
        if !VIRTIO_LEGACY {
            dev.write(
                MmioOffset::Status,
                virtio::STATUS_ACKNOWLEDGE | virtio::STATUS_DRIVER | virtio::STATUS_FEATURES_OK,
            );
        }

        let queue_pa = frame::kalloc_zeroed().expect("block: out of frames for virtqueue");
        debug_assert!(size_of::<Queue>() <= PAGE_SIZE);

        dev.write(MmioOffset::QueueSel, 0);
        let max = dev.read(MmioOffset::QueueNumMax);
        debug_assert!(max as usize >= RING_SIZE, "device queue too small");
        dev.write(MmioOffset::QueueNum, RING_SIZE as u32);

        if VIRTIO_LEGACY {
            dev.write(MmioOffset::QueueAlign, PAGE_SIZE as u32);
            dev.write(MmioOffset::GuestPageSize, PAGE_SIZE as u32);
            dev.write(MmioOffset::QueuePfn, (queue_pa / PAGE_SIZE) as u32);
        } else {
            dev.write(MmioOffset::QueueDescLow, queue_pa as u32);
            dev.write(MmioOffset::QueueDescHigh, (queue_pa as u64 >> 32) as u32);
            let avail_pa = queue_pa + core::mem::offset_of!(Queue, avail);
            dev.write(MmioOffset::QueueDriverLow, avail_pa as u32);
            dev.write(MmioOffset::QueueDriverHigh, (avail_pa as u64 >> 32) as u32);
            let used_pa = queue_pa + core::mem::offset_of!(Queue, used);
            dev.write(MmioOffset::QueueDeviceLow, used_pa as u32);
            dev.write(MmioOffset::QueueDeviceHigh, (used_pa as u64 >> 32) as u32);
            dev.write(MmioOffset::QueueReady, 1);
        }

        dev.write(
            MmioOffset::Status,
            virtio::STATUS_ACKNOWLEDGE | virtio::STATUS_DRIVER | virtio::STATUS_DRIVER_OK,
        );
    }

    *BLOCK.lock() = Some(BlockDevice { dev, queue_pa, next_avail_idx: 0, last_used_idx: 0 });
    log::info!("block: virtio device ready (legacy={})", VIRTIO_LEGACY);
}

/// Interrupt service routine for PLIC IRQs 1..=8 that resolve to the
/// block device (§4.C, §6: `blk_intr`). The synchronous read/write
/// path below polls `used.idx` directly rather than waiting on this,
/// but acknowledging the interrupt status register is still required
/// so the device can raise the next one.
pub fn handle_interrupt() {
    let guard = BLOCK.lock();
    if let Some(b) = guard.as_ref() {
        // SAFETY: b.dev.base is identity-mapped RW MMIO.
        unsafe {
            let status = b.dev.read(MmioOffset::InterruptStatus);
            b.dev.write(MmioOffset::InterruptAck, status);
        }
    }
}

/// Submits a 3-descriptor chain (header, data, status) for `sector`
/// and busy-waits for completion, spinning on `wfi` between polls so
/// the hart isn't fully pegged (§4.D's cooperative model has no
/// dedicated I/O wait channel, so this does not suspend the caller
/// onto `blocked_list`).
fn submit(sector: u64, data_pa: usize, write: bool) -> bool {
    let mut guard = BLOCK.lock();
    let Some(b) = guard.as_mut() else { return false };

    let header_pa = match frame::kalloc_zeroed() {
        Ok(pa) => pa,
        Err(_) => return false,
    };
    let status_pa = match frame::kalloc_zeroed() {
        Ok(pa) => pa,
        Err(_) => {
            frame::kfree(header_pa);
            return false;
        }
    };

    // SAFETY: header_pa/status_pa are freshly allocated, exclusively
    // owned frames.
    unsafe {
        (header_pa as *mut RequestHeader).write(RequestHeader {
            blktype: if write { BLK_T_OUT } else { BLK_T_IN },
            reserved: 0,
            sector,
        });
        (status_pa as *mut u8).write_volatile(0xff);
    }

    let queue = queue_ref(b.queue_pa);
    let head = (b.next_avail_idx as usize) % RING_SIZE;
    let d0 = head;
    let d1 = (head + 1) % RING_SIZE;
    let d2 = (head + 2) % RING_SIZE;

    queue.desc[d0] = Descriptor { addr: header_pa as u64, len: size_of::<RequestHeader>() as u32, flags: DESC_F_NEXT, next: d1 as u16 };
    let data_flags = if write { DESC_F_NEXT } else { DESC_F_NEXT | DESC_F_WRITE };
    queue.desc[d1] = Descriptor { addr: data_pa as u64, len: SECTOR_SIZE as u32, flags: data_flags, next: d2 as u16 };
    queue.desc[d2] = Descriptor { addr: status_pa as u64, len: 1, flags: DESC_F_WRITE, next: 0 };

    let avail_slot = (queue.avail.idx as usize) % RING_SIZE;
    queue.avail.ring[avail_slot] = d0 as u16;
    queue.avail.idx = queue.avail.idx.wrapping_add(1);
    b.next_avail_idx = b.next_avail_idx.wrapping_add(3);

    // SAFETY: b.dev.base is identity-mapped RW MMIO.
    unsafe {
        b.dev.write(MmioOffset::QueueNotify, 0);
    }

    let target_used_idx = b.last_used_idx.wrapping_add(1);
    drop(guard);
    loop {
        let guard = BLOCK.lock();
        let done = guard.as_ref().map(|b| queue_ref(b.queue_pa).used.idx == target_used_idx).unwrap_or(true);
        drop(guard);
        if done {
            break;
        }
        cpu::wfi();
    }
    BLOCK.lock().as_mut().unwrap().last_used_idx = target_used_idx;

    // SAFETY: status_pa is the frame written above.
    let ok = unsafe { (status_pa as *const u8).read_volatile() == 0 };
    frame::kfree(header_pa);
    frame::kfree(status_pa);
    ok
}

/// Reads one 512-byte sector into `buf`.
pub fn read_sector(sector: u64, buf: &mut [u8; SECTOR_SIZE]) -> bool {
    let Ok(data_pa) = frame::kalloc() else { return false };
    let ok = submit(sector, data_pa, false);
    if ok {
        // SAFETY: data_pa holds SECTOR_SIZE valid bytes the device
        // just wrote.
        unsafe {
            core::ptr::copy_nonoverlapping(data_pa as *const u8, buf.as_mut_ptr(), SECTOR_SIZE);
        }
    }
    frame::kfree(data_pa);
    ok
}

/// Writes one 512-byte sector from `buf`.
pub fn write_sector(sector: u64, buf: &[u8; SECTOR_SIZE]) -> bool {
    let Ok(data_pa) = frame::kalloc() else { return false };
    // SAFETY: data_pa is a freshly allocated, exclusively owned frame.
    unsafe {
        core::ptr::copy_nonoverlapping(buf.as_ptr(), data_pa as *mut u8, SECTOR_SIZE);
    }
    let ok = submit(sector, data_pa, true);
    frame::kfree(data_pa);
    ok
}

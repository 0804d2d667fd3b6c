//! Shared virtio-mmio transport plumbing (§6: "VirtIO MMIO window").
//!
//! Register layout and virtqueue structures grounded in the teacher's
//! `virtio.rs`. The ring size is trimmed from the teacher's 128 down
//! to [`RING_SIZE`] — the block driver only ever has one request in
//! flight at a time here, so a large ring buys nothing but multi-page
//! allocations. Two register layouts are supported behind the
//! `virtio-legacy`/`virtio-modern` features (§6's `VIRTIO` build
//! parameter); only the handshake and queue-address registers differ,
//! the descriptor/available/used structures are shared.

use core::mem::size_of;

use crate::memory::layout::{VIRTIO_MMIO_BASE, VIRTIO_MMIO_END};

pub const RING_SIZE: usize = 8;

pub const MAGIC: u32 = 0x74726976; // "virt" little-endian

pub const DESC_F_NEXT: u16 = 1;
pub const DESC_F_WRITE: u16 = 2;

#[repr(C)]
pub struct Descriptor {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

#[repr(C)]
pub struct Available {
    pub flags: u16,
    pub idx: u16,
    pub ring: [u16; RING_SIZE],
    pub event: u16,
}

#[repr(C)]
pub struct UsedElem {
    pub id: u32,
    pub len: u32,
}

#[repr(C)]
pub struct Used {
    pub flags: u16,
    pub idx: u16,
    pub ring: [UsedElem; RING_SIZE],
    pub event: u16,
}

/// A complete virtqueue: descriptor table, available ring, used ring.
/// Smaller than one 4 KiB frame at `RING_SIZE = 8`, so a single
/// `kalloc_zeroed` backs it.
#[repr(C)]
pub struct Queue {
    pub desc: [Descriptor; RING_SIZE],
    pub avail: Available,
    pub used: Used,
}

const _QUEUE_FITS_ONE_FRAME: () = assert!(size_of::<Queue>() <= 4096);

#[repr(usize)]
#[allow(dead_code)]
pub enum MmioOffset {
    MagicValue = 0x000,
    Version = 0x004,
    DeviceId = 0x008,
    HostFeatures = 0x010,
    GuestFeatures = 0x020,
    GuestPageSize = 0x028, // legacy only
    QueueSel = 0x030,
    QueueNumMax = 0x034,
    QueueNum = 0x038,
    QueueAlign = 0x03c,  // legacy only
    QueuePfn = 0x040,     // legacy only
    QueueReady = 0x044,   // modern only
    QueueNotify = 0x050,
    InterruptStatus = 0x060,
    InterruptAck = 0x064,
    Status = 0x070,
    QueueDescLow = 0x080, // modern only
    QueueDescHigh = 0x084,
    QueueDriverLow = 0x090,
    QueueDriverHigh = 0x094,
    QueueDeviceLow = 0x0a0,
    QueueDeviceHigh = 0x0a4,
}

pub const STATUS_ACKNOWLEDGE: u32 = 1;
pub const STATUS_DRIVER: u32 = 2;
pub const STATUS_DRIVER_OK: u32 = 4;
pub const STATUS_FEATURES_OK: u32 = 8;

/// A handle onto one virtio-mmio device's register window.
#[derive(Clone, Copy)]
pub struct MmioDevice {
    base: usize,
}

impl MmioDevice {
    fn reg32(self, off: MmioOffset) -> *mut u32 {
        (self.base + off as usize) as *mut u32
    }

    /// SAFETY: `self.base` must be identity-mapped RW MMIO.
    pub unsafe fn read(self, off: MmioOffset) -> u32 {
        self.reg32(off).read_volatile()
    }

    /// SAFETY: see [`Self::read`].
    pub unsafe fn write(self, off: MmioOffset, val: u32) {
        self.reg32(off).write_volatile(val)
    }
}

/// Scans the fixed virtio-mmio window (§6) for a device of `device_id`
/// (2 = block), returning the first match.
pub fn probe(device_id: u32) -> Option<MmioDevice> {
    let mut addr = VIRTIO_MMIO_BASE;
    while addr < VIRTIO_MMIO_END {
        let dev = MmioDevice { base: addr };
        // SAFETY: the whole virtio-mmio window is identity-mapped RW
        // by `vmm_init` before any driver probes it.
        unsafe {
            if dev.read(MmioOffset::MagicValue) == MAGIC && dev.read(MmioOffset::DeviceId) == device_id {
                return Some(dev);
            }
        }
        addr += 0x1000;
    }
    None
}

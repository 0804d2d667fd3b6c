//! Sv39 virtual memory manager (§4.B).
//!
//! Builds and mutates the single kernel root page table every process
//! shares — per §9's frozen open question, this kernel keeps the
//! source's single-privilege model (no S-mode, no per-process
//! address space), so there is exactly one root and no ASID
//! management beyond always using ASID 0.

use bitflags::bitflags;

use spin::Mutex;

use crate::cpu::{self, SatpMode};
use crate::error::{KernelError, KernelResult};
use crate::memory::frame;
use crate::memory::layout::{
    align_down_page, is_page_aligned, CLINT_BASE, CLINT_END, PAGE_SIZE, PLIC_BASE, PLIC_SIZE,
    RAM_BASE, RAM_END, UART_BASE, UART_SIZE, VIRTIO_MMIO_BASE, VIRTIO_MMIO_END,
};

bitflags! {
    /// Hardware PTE bits (Sv39, RV64).
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    struct EntryBits: u64 {
        const VALID = 1 << 0;
        const READ  = 1 << 1;
        const WRITE = 1 << 2;
        const EXEC  = 1 << 3;
        const USER  = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
    }
}

bitflags! {
    /// Flags `vmm_map`/`vmm_map_page` accept (§4.B). Reserved bits
    /// beyond these are accepted and ignored, matching the source's
    /// permissive "flags an architecture doesn't use are just
    /// ignored" behaviour.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct MapFlags: u32 {
        const PRESENT = 1 << 0;
        const RW      = 1 << 1;
        const USER    = 1 << 2;
    }
}

impl MapFlags {
    /// Translates the external flag set into hardware PTE bits
    /// (§4.B's "internal translation rules"). A and D are always set:
    /// hardware A/D updates are disabled on this platform, so the
    /// software that would normally rely on the MMU setting them
    /// lazily must see them pre-set instead.
    fn to_entry_bits(self) -> EntryBits {
        let mut bits = EntryBits::ACCESSED | EntryBits::DIRTY;
        if self.contains(MapFlags::PRESENT) {
            bits |= EntryBits::VALID;
        }
        if self.contains(MapFlags::RW) {
            bits |= EntryBits::READ | EntryBits::WRITE | EntryBits::EXEC;
        }
        if self.contains(MapFlags::USER) {
            bits |= EntryBits::USER;
        }
        bits
    }
}

const ENTRIES_PER_TABLE: usize = 512;
const LEVELS: usize = 3;

/// One 4 KiB page of 512 eight-byte Sv39 entries (§3).
#[repr(C, align(4096))]
struct Table {
    entries: [u64; ENTRIES_PER_TABLE],
}

impl Table {
    fn entry(&self, idx: usize) -> u64 {
        self.entries[idx]
    }
    fn set_entry(&mut self, idx: usize, value: u64) {
        self.entries[idx] = value;
    }
}

fn table_at(pa: usize) -> &'static mut Table {
    // SAFETY: pa is a page-aligned physical frame previously returned
    // by `kalloc_zeroed`, identity-mapped, and exclusively owned by
    // the page-table structure that reaches it, so a `'static`
    // mutable reference into it does not alias.
    unsafe { &mut *(pa as *mut Table) }
}

fn pte_is_valid(pte: u64) -> bool {
    pte & EntryBits::VALID.bits() != 0
}

fn pte_is_leaf(pte: u64) -> bool {
    pte & (EntryBits::READ | EntryBits::WRITE | EntryBits::EXEC).bits() != 0
}

fn pte_ppn(pte: u64) -> usize {
    ((pte >> 10) << 12) as usize
}

fn make_pte(ppn_pa: usize, bits: EntryBits) -> u64 {
    (((ppn_pa >> 12) as u64) << 10) | bits.bits()
}

fn vpn(va: usize, level: usize) -> usize {
    (va >> (12 + 9 * level)) & 0x1ff
}

static ROOT_PA: Mutex<usize> = Mutex::new(0);

/// Walks L2 -> L1 -> L0 for `va`, optionally allocating intermediate
/// tables, and returns the physical address of the L0 page containing
/// the leaf slot plus the index of that slot within it.
fn walk(root_pa: usize, va: usize, allocate: bool) -> KernelResult<(usize, usize)> {
    let mut table_pa = root_pa;
    for level in (1..LEVELS).rev() {
        let idx = vpn(va, level);
        let table = table_at(table_pa);
        let pte = table.entry(idx);
        if pte_is_valid(pte) {
            if pte_is_leaf(pte) {
                // A leaf appeared above the bottom level: this
                // implementation never creates superpages, so this
                // indicates the caller is walking a VA already
                // mapped at a coarser granularity than expected.
                return Err(KernelError::Misaligned { addr: va });
            }
            table_pa = pte_ppn(pte);
        } else {
            if !allocate {
                return Err(KernelError::Unmapped { va });
            }
            let next_pa = frame::kalloc_zeroed().map_err(|_| KernelError::PageTableAllocFailed)?;
            table.set_entry(idx, make_pte(next_pa, EntryBits::VALID));
            table_pa = next_pa;
        }
    }
    let l0_idx = vpn(va, 0);
    Ok((table_pa, l0_idx))
}

/// Allocates and zeroes the root page table, builds the platform's
/// fixed identity mappings, then runs the self-test (§4.B).
pub fn vmm_init() -> KernelResult<()> {
    let root_pa = frame::kalloc_zeroed().map_err(|_| KernelError::PageTableAllocFailed)?;
    *ROOT_PA.lock() = root_pa;

    identity_map_range(RAM_BASE, RAM_END, MapFlags::PRESENT | MapFlags::RW | MapFlags::USER)?;
    identity_map_range(UART_BASE, UART_BASE + UART_SIZE, MapFlags::PRESENT | MapFlags::RW)?;
    identity_map_range(VIRTIO_MMIO_BASE, VIRTIO_MMIO_END, MapFlags::PRESENT | MapFlags::RW)?;
    identity_map_range(CLINT_BASE, CLINT_END, MapFlags::PRESENT | MapFlags::RW)?;
    identity_map_range(PLIC_BASE, PLIC_BASE + PLIC_SIZE, MapFlags::PRESENT | MapFlags::RW)?;

    self_test()?;
    log::info!("vmm: root page table at {:#x}", root_pa);
    Ok(())
}

fn identity_map_range(start: usize, end: usize, flags: MapFlags) -> KernelResult<()> {
    let mut addr = align_down_page(start);
    while addr < end {
        vmm_map(addr, addr, flags)?;
        addr += PAGE_SIZE;
    }
    Ok(())
}

/// Maps `va` to `pa` with `flags`. Both must be 4 KiB-aligned
/// (§4.B).
pub fn vmm_map(va: usize, pa: usize, flags: MapFlags) -> KernelResult<()> {
    if !is_page_aligned(va) {
        return Err(KernelError::Misaligned { addr: va });
    }
    if !is_page_aligned(pa) {
        return Err(KernelError::Misaligned { addr: pa });
    }
    let root_pa = *ROOT_PA.lock();
    let (l0_pa, idx) = walk(root_pa, va, true)?;
    let table = table_at(l0_pa);
    table.set_entry(idx, make_pte(pa, flags.to_entry_bits()));
    Ok(())
}

/// Allocates a fresh zeroed frame and maps it at `va`. Rolls the
/// frame back to the free list if the map fails.
pub fn vmm_map_page(va: usize, flags: MapFlags) -> KernelResult<usize> {
    let pa = frame::kalloc_zeroed()?;
    if let Err(e) = vmm_map(va, pa, flags) {
        frame::kfree(pa);
        return Err(e);
    }
    Ok(pa)
}

/// Clears the leaf PTE for `va` without pruning intermediate tables
/// (§4.B). Frees the underlying frame when `free_phys` is set.
pub fn vmm_unmap(va: usize, free_phys: bool) -> KernelResult<()> {
    let root_pa = *ROOT_PA.lock();
    let (l0_pa, idx) = walk(root_pa, va, false)?;
    let table = table_at(l0_pa);
    let pte = table.entry(idx);
    if !pte_is_valid(pte) {
        return Err(KernelError::Unmapped { va });
    }
    let pa = pte_ppn(pte);
    table.set_entry(idx, 0);
    if free_phys {
        frame::kfree(pa);
    }
    Ok(())
}

/// Returns `(pte.ppn << 12) | (va & 0xFFF)`, or `Err(Unmapped)` if
/// there is no valid leaf for `va`.
pub fn vmm_translate(va: usize) -> KernelResult<usize> {
    let root_pa = *ROOT_PA.lock();
    let (l0_pa, idx) = walk(root_pa, va, false)?;
    let table = table_at(l0_pa);
    let pte = table.entry(idx);
    if !pte_is_valid(pte) {
        return Err(KernelError::Unmapped { va });
    }
    Ok(pte_ppn(pte) | (va & (PAGE_SIZE - 1)))
}

/// Writes `satp` and executes `sfence.vma` to activate translation.
pub fn vmm_activate() {
    let root_pa = *ROOT_PA.lock();
    let satp = cpu::build_satp(SatpMode::Sv39, 0, root_pa);
    cpu::satp_write(satp);
    cpu::sfence_vma(0, 0);
}

const SELF_TEST_VA: usize = 0x9000_0000;

fn self_test() -> KernelResult<()> {
    vmm_map_page(SELF_TEST_VA, MapFlags::PRESENT | MapFlags::RW)?;
    let translated = vmm_translate(SELF_TEST_VA)?;
    if translated & !(PAGE_SIZE - 1) == 0 {
        return Err(KernelError::Unmapped { va: SELF_TEST_VA });
    }
    vmm_unmap(SELF_TEST_VA, true)?;
    match vmm_translate(SELF_TEST_VA) {
        Err(KernelError::Unmapped { .. }) => Ok(()),
        Ok(_) => Err(KernelError::Unmapped { va: SELF_TEST_VA }),
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_flags_translate_to_expected_bits() {
        let rw_user = (MapFlags::PRESENT | MapFlags::RW | MapFlags::USER).to_entry_bits();
        assert!(rw_user.contains(EntryBits::VALID));
        assert!(rw_user.contains(EntryBits::READ));
        assert!(rw_user.contains(EntryBits::WRITE));
        assert!(rw_user.contains(EntryBits::EXEC));
        assert!(rw_user.contains(EntryBits::USER));
        assert!(rw_user.contains(EntryBits::ACCESSED));
        assert!(rw_user.contains(EntryBits::DIRTY));

        let present_only = MapFlags::PRESENT.to_entry_bits();
        assert!(!present_only.contains(EntryBits::READ));
        assert!(!present_only.contains(EntryBits::USER));
    }

    #[test]
    fn pte_round_trips_through_make_and_read() {
        let pa = 0x8012_3000usize;
        let bits = (MapFlags::PRESENT | MapFlags::RW).to_entry_bits();
        let pte = make_pte(pa, bits);
        assert!(pte_is_valid(pte));
        assert!(pte_is_leaf(pte));
        assert_eq!(pte_ppn(pte), pa);
    }

    #[test]
    fn vpn_indices_split_a_canonical_address() {
        // 0x8000_1000 => page 1 of RAM, all in the first L1/L0 tables.
        let va = 0x8000_1000usize;
        assert_eq!(vpn(va, 0), 1);
        assert_eq!(vpn(va, 1), 0);
        assert_eq!(vpn(va, 2), 2); // 0x80000000 >> 30 == 2
    }
}

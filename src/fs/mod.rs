//! The filesystem (§6: `fs_init`, `fs_lookup(name) -> entry_pc`).
//!
//! An on-disk filesystem is explicitly out of scope for how `exec`
//! resolves a name to code (§1 non-goals: "ELF loading ... exec
//! dispatches by program name to statically linked user entry
//! points"), so `fs_lookup` is backed by [`crate::userland::programs`]'s
//! static table. `fs_init` still reads the block device's first
//! sector and checks for the tiny superblock a real on-disk layout
//! would use, purely so the boot sequence exercises the storage stack
//! end to end (§2's control flow lists "filesystem init" as its own
//! boot step, after the block driver).

use crate::drivers::block;
use crate::userland::programs;

const SUPERBLOCK_MAGIC: u32 = 0x5346_3339; // "9FS" + version nibble, arbitrary

/// Reads sector 0 and logs whether it looks like a formatted
/// superblock. Absence of a block device, or an unformatted one, is
/// not fatal: `exec` never consults the disk regardless (§1).
pub fn init() {
    let mut sector = [0u8; block::SECTOR_SIZE];
    if !block::read_sector(0, &mut sector) {
        log::warn!("fs: no block device, running with statically linked programs only");
        return;
    }
    let magic = u32::from_le_bytes([sector[0], sector[1], sector[2], sector[3]]);
    if magic == SUPERBLOCK_MAGIC {
        log::info!("fs: superblock found on block 0");
    } else {
        log::info!("fs: block 0 unformatted (magic {:#x}), ignoring", magic);
    }
}

/// Resolves `name` to an entry PC for `exec` (§4.E, §6).
pub fn fs_lookup(name: &str) -> Option<usize> {
    programs::lookup(name)
}

//! Scoped interrupt gate.
//!
//! §5: "every operation that touches shared state ... runs with
//! MIE=0." §9's design notes ask for the gate to be "modelled as a
//! scoped acquisition that re-enables on exit from the top-level
//! critical section" rather than the source's manual `intr_off`/
//! `intr_on` pairs. `IrqGuard::acquire` clears MIE and restores
//! whatever it was on drop — nested acquisition is safe because each
//! guard remembers its own prior state, matching the teacher's
//! `mstatus_read`/`mstatus_write` save-restore pattern in spirit.

use crate::cpu;

#[must_use = "dropping this immediately re-enables interrupts"]
pub struct IrqGuard {
    was_enabled: bool,
}

impl IrqGuard {
    /// Disables interrupts and returns a guard that restores the
    /// previous MIE state when dropped.
    pub fn acquire() -> Self {
        let was_enabled = cpu::intr_off();
        IrqGuard { was_enabled }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            cpu::intr_on();
        }
    }
}

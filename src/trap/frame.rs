//! The on-stack trap frame ABI (§3, §6).
//!
//! 128 bytes, laid out so that `trap.S`'s `sd`/`ld` offsets (0, 8, 16,
//! ...) line up with these fields in declaration order. The trailing
//! 32 bytes are reserved and never touched by assembly; they exist
//! only so the frame occupies exactly 128 bytes, matching the `addi
//! sp, sp, -128` the vector and every trampoline agree on.

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TrapFrame {
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
    _reserved: [usize; 4],
}

impl TrapFrame {
    pub const SIZE: usize = core::mem::size_of::<TrapFrame>();

    /// Builds a frame from the twelve caller-saved registers, with
    /// the reserved tail zeroed. Used by `proc_fork` to construct a
    /// child's initial frame from its mirrored parent registers.
    #[allow(clippy::too_many_arguments)]
    pub const fn from_regs(
        ra: usize,
        t0: usize,
        t1: usize,
        t2: usize,
        a0: usize,
        a1: usize,
        a2: usize,
        a3: usize,
        a4: usize,
        a5: usize,
        a6: usize,
        a7: usize,
    ) -> Self {
        TrapFrame { ra, t0, t1, t2, a0, a1, a2, a3, a4, a5, a6, a7, _reserved: [0; 4] }
    }

    pub const fn zeroed() -> Self {
        TrapFrame {
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
            _reserved: [0; 4],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_exactly_128_bytes() {
        assert_eq!(TrapFrame::SIZE, 128);
    }

    #[test]
    fn fields_sit_at_the_offsets_the_assembly_assumes() {
        let frame = TrapFrame::zeroed();
        let base = &frame as *const TrapFrame as usize;
        assert_eq!(&frame.ra as *const usize as usize - base, 0);
        assert_eq!(&frame.t0 as *const usize as usize - base, 8);
        assert_eq!(&frame.t1 as *const usize as usize - base, 16);
        assert_eq!(&frame.t2 as *const usize as usize - base, 24);
        assert_eq!(&frame.a0 as *const usize as usize - base, 32);
        assert_eq!(&frame.a1 as *const usize as usize - base, 40);
        assert_eq!(&frame.a7 as *const usize as usize - base, 88);
    }
}

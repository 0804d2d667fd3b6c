//! Compile-time toggles surfaced as Cargo features (§6: "Build
//! parameters"). None of these change the core's semantics, only its
//! logging verbosity and which block-driver variant is compiled in.

/// Selects the virtio-mmio driver variant. `true` selects the legacy
/// (pre-1.0) layout, `false` the modern one.
pub const VIRTIO_LEGACY: bool = cfg!(feature = "virtio-legacy");

/// Verbose filesystem logging.
pub const FS_DEBUG: bool = cfg!(feature = "fs-debug");

/// Verbose trap logging (every mcause/mepc/mtval on entry). Off by
/// default: it's expensive enough to perturb the timer-preemption
/// scenarios in testing.
pub const TRAP_DEBUG: bool = cfg!(feature = "trap-debug");

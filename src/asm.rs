//! Glues the hand-written assembly (§9: "irreducibly assembly") into
//! the binary. Kept as plain `global_asm!`/`include_str!`, the same
//! boundary the teacher draws between `.S` files and Rust: everything
//! below this line is ABI (§6), everything above it is ordinary Rust.

core::arch::global_asm!(include_str!("asm/boot.S"));
core::arch::global_asm!(include_str!("asm/trap.S"));
core::arch::global_asm!(include_str!("asm/switch.S"));

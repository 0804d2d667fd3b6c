//! Drivers for the platform's fixed peripherals (§6, "External
//! interfaces"): the 16550 UART, the PLIC, and the virtio-mmio block
//! device. These are external collaborators to the core (§1) —
//! specified only at their interface — so unlike the core subsystems
//! they are not expected to be exhaustive, just faithful to the
//! teacher's register-level style.

pub mod block;
pub mod plic;
pub mod uart;
pub mod virtio;

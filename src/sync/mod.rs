//! Synchronization primitives.
//!
//! The concurrency model (§5) is deliberately simple: single hart,
//! and exactly one global lock — the `mstatus.MIE` bit. [`IrqGuard`]
//! models "the kernel world" design note's suggestion to turn that
//! bit into a scoped acquisition rather than bare `intr_off`/`intr_on`
//! call pairs sprinkled through the scheduler.

pub mod irq;

pub use irq::IrqGuard;

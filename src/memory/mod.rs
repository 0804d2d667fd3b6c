//! Physical frame allocation and Sv39 virtual memory (components A
//! and B of §2).

pub mod frame;
pub mod heap;
pub mod layout;
pub mod vmm;

//! The kernel binary. Everything lives in the library crate: `_start`
//! (in `asm/boot.S`, pulled in by `sv39os`'s `global_asm!`) calls
//! `kinit` directly and never returns through `main`, so this file's
//! only job is to make sure the library crate — and the `_start`
//! symbol `linker.ld`'s `ENTRY` needs — is actually linked in.

#![no_std]
#![no_main]

extern crate sv39os;

//! Architecture-specific translation-cache and interrupt primitives.
//!
//! This module conditionally imports either the MIPS32 hardware implementation or
//! software emulation based on the target architecture and features. Both expose the
//! same set of items: page geometry, address validation, interrupt masking and raw
//! access to the slots of a software-managed TLB.

// Use the MIPS hardware implementation when we're on MIPS and not testing or emulating.
#[cfg(all(target_arch = "mips", not(test), not(feature = "software-emulation")))]
mod mips;
#[cfg(all(target_arch = "mips", not(test), not(feature = "software-emulation")))]
pub use mips::*;

// Every other configuration runs on the emulated R3000-style TLB.
#[cfg(not(all(target_arch = "mips", not(test), not(feature = "software-emulation"))))]
mod software;
#[cfg(not(all(target_arch = "mips", not(test), not(feature = "software-emulation"))))]
pub use software::*;

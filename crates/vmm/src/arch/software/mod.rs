//! Software emulation implementation for testing and development.
//!
//! This module provides a software-emulated processor that can run on any host. It is
//! a model of the R3000 memory management unit the kernel targets:
//! - 32-bit physical and virtual addresses
//! - 4 KiB pages
//! - a 64-slot, fully associative, software-refilled TLB
//! - a single interrupt-enable bit
//!
//! With the `software-emulation` feature (or under test) the processor state and the
//! emulated physical memory are per host thread, so every test owns a private machine.

mod cpu;
#[cfg(any(test, feature = "software-emulation"))]
mod frames;
#[cfg(any(test, feature = "software-emulation"))]
mod memory;

pub use cpu::{
    InterruptState, disable_interrupts, interrupts_enabled, restore_interrupts, tlb_probe,
    tlb_random, tlb_read, tlb_write,
};
#[cfg(any(test, feature = "software-emulation"))]
pub use frames::EmulatedFrameAllocator;
#[cfg(any(test, feature = "software-emulation"))]
pub use memory::EmulatedMemory;

/// Maximum number of bits in a physical address.
pub const MAX_PHYSICAL_BITS: usize = 32;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of TLB slots.
pub const TLB_ENTRIES: usize = 64;

/// First slot `tlb_random` may choose; lower slots are never picked at random.
pub const TLB_RANDOM_FIRST: usize = 8;

/// Validates a physical address.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr as u64 <= u32::MAX as u64
}

/// Validates a user virtual address.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    addr as u64 <= u32::MAX as u64
}

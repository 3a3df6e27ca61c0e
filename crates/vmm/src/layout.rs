//! Fixed layout of a user address space.
//!
//! Every process gets the same flat 32-bit layout: 4 KiB pages, a two-level page
//! table split 11/9/12, and a fixed-size stack that ends just below the kernel
//! segment.

pub use crate::arch::PAGE_SIZE;

/// Number of low-order bits that address a byte within a page.
pub const PAGE_SHIFT: usize = 12;

/// Number of virtual address bits consumed by the second-level table index.
pub const TABLE_BITS: usize = 9;

/// Number of virtual address bits consumed by the first-level directory index.
pub const DIRECTORY_BITS: usize = 11;

/// Entries in a second-level table.
pub const TABLE_ENTRIES: usize = 1 << TABLE_BITS;

/// Slots in the first-level directory.
pub const DIRECTORY_ENTRIES: usize = 1 << DIRECTORY_BITS;

/// Top of the user stack; the initial stack pointer of every new process.
///
/// Also the start of the kernel segment, which is never translated through the TLB.
pub const USER_STACK_TOP: usize = 0x8000_0000;

/// Highest address a user region may cover.
pub const MAX_USER_ADDRESS: usize = USER_STACK_TOP - 1;

/// Size of the user stack in pages.
pub const STACK_PAGES: usize = 16;

/// Size of the user stack in bytes.
pub const STACK_SIZE: usize = STACK_PAGES * PAGE_SIZE;

const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
const _: () = assert!(PAGE_SHIFT + TABLE_BITS + DIRECTORY_BITS == 32);

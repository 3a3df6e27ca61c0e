#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]
#![cfg_attr(
    all(target_arch = "mips", not(test), not(feature = "software-emulation")),
    feature(asm_experimental_arch)
)]

//! # Virtual Memory Manager (VMM)
//!
//! The Virtual Memory Manager is the demand-paged virtual memory subsystem of a small
//! teaching kernel running on a MIPS R3000-class processor. It provides:
//!
//! - Per-process address spaces built from loader-declared regions.
//! - A two-level sparse page table, filled lazily as pages are first touched.
//! - A TLB miss handler that backs pages with zeroed frames and refills the
//!   software-managed TLB.
//! - Process duplication by deep copy of regions and resident pages.
//! - Software emulation of the TLB and physical memory for testing in non-kernel
//!   environments.
//!
//! Physical frames come from an external [`FrameAllocator`]; their contents are reached
//! through the [`AddressTranslator`] installed at boot.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod error;
mod fault;
mod frame;
pub mod interface;
pub mod layout;
mod numbers;
mod page_table;
mod region;
pub mod tlb;

#[cfg(any(test, feature = "failpoints"))]
pub mod failpoints;

pub use address::{AddressTranslator, PageIndex, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use error::VmError;
pub use fault::{FaultKind, handle_fault};
pub use frame::{AllocError, FrameAllocator};
pub use numbers::{FrameNumber, PageNumber};
pub use page_table::PageTable;
pub use region::{Permissions, Region, RegionList};

#[cfg(any(test, feature = "software-emulation"))]
pub use arch::{EmulatedFrameAllocator, EmulatedMemory};

pub use arch::{PAGE_SIZE, TLB_ENTRIES};

//! Address types for the 32-bit user address space and physical memory.
//!
//! This module provides wrappers around physical and user-virtual addresses, the
//! index split used by the two-level page table, and the translator the kernel uses
//! to reach a physical frame through a kernel-accessible pointer.

use core::fmt;

use crate::{FrameNumber, PageNumber, arch, layout};

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// Address translator for converting between physical addresses and kernel pointers.
///
/// This enum supports two modes:
/// - Hardware: physical memory is reachable at a fixed direct-map offset (KSEG0 on MIPS)
/// - Emulated: physical memory is an in-process buffer (testing mode)
pub enum AddressTranslator {
    /// Hardware translation using a direct-map offset.
    Hardware { direct_map_offset: usize },
    /// Emulated translation using a simulated memory region.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a new hardware translator with the given direct-map offset.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// Creates a new emulated translator backed by `size` bytes of memory.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size))
    }

    /// Sets the global address translator.
    ///
    /// This function must be called exactly once during initialization.
    ///
    /// # Panics
    ///
    /// Panics if the translator has already been set.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            if ADDRESS_TRANSLATOR.get().is_some() {
                panic!("address translator already set");
            }
            ADDRESS_TRANSLATOR.call_once(|| translator);
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                if t.get().is_some() {
                    panic!("address translator already set");
                }
                t.call_once(|| translator);
            });
        }
    }

    /// Returns a reference to the current global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has not been set yet.
    pub fn current() -> &'static AddressTranslator {
        Self::try_current().expect(
            "address translator not set; call AddressTranslator::set_current during initialization",
        )
    }

    /// Returns a reference to the current global address translator if it has been set.
    pub fn try_current() -> Option<&'static AddressTranslator> {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            ADDRESS_TRANSLATOR.get()
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                t.get().map(|translator| {
                    // SAFETY: Each thread owns its own ADDRESS_TRANSLATOR, which is never
                    // modified once set (spin::Once) and lives as long as the thread.
                    unsafe { &*(translator as *const AddressTranslator) }
                })
            })
        }
    }

    /// Translates a physical address to a kernel-accessible address.
    pub fn phys_to_virt(&self, phys: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => phys.wrapping_add(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.translate(phys) as usize,
        }
    }

    /// Translates a physical address to a typed kernel pointer.
    pub fn phys_to_ptr<T>(&self, phys: PhysicalAddress) -> *mut T {
        self.phys_to_virt(phys.as_usize()) as *mut T
    }

    /// Returns the number of bytes of physical memory reachable through this translator,
    /// if the translator knows it.
    pub fn memory_size(&self) -> Option<usize> {
        match self {
            Self::Hardware { .. } => None,
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => Some(mem.size()),
        }
    }
}

/// Global address translator.
///
/// This is initialized once during boot (with the Hardware variant).
/// In test/software-emulation mode, this is thread-local to allow each test to have its own
/// emulated memory space.
#[cfg(not(any(test, feature = "software-emulation")))]
static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();
}

macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Physical addresses are at most 32 bits wide. In software emulation they are offsets\n\
     into the emulated memory buffer."
);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds the architecture's maximum physical address width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// Returns the frame containing this physical address.
    #[inline]
    pub fn frame_number(self) -> FrameNumber {
        FrameNumber::from(self)
    }
}

impl_address_common!(
    VirtualAddress,
    "A user virtual address.\n\n\
     User address spaces are flat 32-bit spaces; this wrapper rejects anything wider and\n\
     knows how to split itself into the indices used by the page table."
);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the address does not fit in the 32-bit user address space.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_virtual(addr),
            "virtual address exceeds 32 bits"
        );
        Self(addr)
    }

    /// Creates a virtual address, returning `None` if it does not fit in 32 bits.
    #[inline]
    pub const fn try_new(addr: usize) -> Option<Self> {
        if arch::validate_virtual(addr) {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Splits the address into its directory index, table index and page offset.
    ///
    /// With 4 KiB pages the 32 address bits divide as 11/9/12:
    ///
    /// ```text
    ///  31          21 20        12 11          0
    /// +--------------+------------+-------------+
    /// |  directory   |   table    |   offset    |
    /// +--------------+------------+-------------+
    /// ```
    #[inline]
    pub const fn split(self) -> PageIndex {
        PageIndex::of(self.0 >> layout::PAGE_SHIFT, self.0 & (arch::PAGE_SIZE - 1))
    }

    /// Returns the page containing this virtual address.
    #[inline]
    pub fn page_number(self) -> PageNumber {
        PageNumber::from(self)
    }
}

/// The decomposition of a user virtual address used to walk the page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageIndex {
    /// Index into the first-level directory.
    pub directory: usize,
    /// Index into the second-level table.
    pub table: usize,
    /// Byte offset within the page.
    pub offset: usize,
}

impl PageIndex {
    const fn of(page: usize, offset: usize) -> Self {
        Self {
            directory: page >> layout::TABLE_BITS,
            table: page & (layout::TABLE_ENTRIES - 1),
            offset,
        }
    }

    /// Returns the indices for the first byte of a virtual page.
    #[inline]
    pub const fn for_page(page: PageNumber) -> Self {
        Self::of(page.as_usize(), 0)
    }

    /// Reassembles the virtual page number these indices describe.
    #[inline]
    pub const fn page_number(self) -> PageNumber {
        PageNumber::new((self.directory << layout::TABLE_BITS) | self.table)
    }
}

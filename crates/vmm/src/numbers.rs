//! Page and frame number types.
//!
//! Page numbers index the 4 KiB pages of a user address space; frame numbers index
//! physical memory. Both are what the page table stores and what the translation
//! cache is programmed with.

use crate::{
    address::{PhysicalAddress, VirtualAddress},
    arch, layout,
};
use core::fmt;

macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
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
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Frame zero is reserved: the page table uses a zero entry to mean \"not resident\",\n\
     so a frame allocator must never hand it out."
);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * arch::PAGE_SIZE)
    }

    /// Returns true for the reserved frame zero.
    #[inline]
    pub const fn is_reserved(self) -> bool {
        self.0 == 0
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        Self::new(addr.as_usize() >> layout::PAGE_SHIFT)
    }
}

impl_page_number_common!(
    PageNumber,
    "A user virtual page number.\n\n\
     The 20-bit number of a 4 KiB page in the 32-bit user address space."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 << layout::PAGE_SHIFT)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        Self::new(addr.as_usize() >> layout::PAGE_SHIFT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod frame_number {
        use super::*;

        #[test]
        fn start_address() {
            let frame = FrameNumber::new(1);
            assert_eq!(frame.start().as_usize(), arch::PAGE_SIZE);
        }

        #[test]
        fn from_physical_address() {
            let addr = PhysicalAddress::new(arch::PAGE_SIZE * 3 + 10);
            assert_eq!(FrameNumber::from(addr), FrameNumber::new(3));
        }

        #[test]
        fn frame_zero_is_reserved() {
            assert!(FrameNumber::new(0).is_reserved());
            assert!(!FrameNumber::new(1).is_reserved());
        }
    }

    mod page_number {
        use super::*;

        #[test]
        fn start_address() {
            let page = PageNumber::new(0x7FFFF);
            assert_eq!(page.start(), VirtualAddress::new(0x7FFF_F000));
        }

        #[test]
        fn from_unaligned_address() {
            let addr = VirtualAddress::new(0x2500);
            assert_eq!(PageNumber::from(addr), PageNumber::new(2));
        }

        #[test]
        fn debug_format() {
            assert_eq!(format!("{:?}", PageNumber::new(0x10)), "PageNumber(0x10)");
        }
    }
}

//! TLB miss handling.
//!
//! Every user access without a TLB translation traps here. A page already in the page
//! table only needs its TLB entry rebuilt; a page inside a declared region but never
//! touched is backed by a fresh zeroed frame first. Everything else kills the faulting
//! process.

use crate::{
    AddressSpace, FrameAllocator, VirtualAddress, VmError,
    tlb::{self, TlbEntry},
};

macro_rules! fault_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "detailed-logging")]
        log::trace!($($arg)*);
    };
}

/// The kind of access that trapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A load or instruction fetch with no translation.
    Read,
    /// A store with no translation.
    Write,
    /// A store through a translation without the dirty bit.
    ReadOnly,
}

impl FaultKind {
    /// Decodes the fault code passed by the trap handler.
    ///
    /// # Errors
    ///
    /// [`VmError::InvalidArgument`] for an unknown code.
    pub fn from_raw(code: u32) -> Result<Self, VmError> {
        match code {
            0 => Ok(FaultKind::Read),
            1 => Ok(FaultKind::Write),
            2 => Ok(FaultKind::ReadOnly),
            _ => Err(VmError::InvalidArgument),
        }
    }
}

/// Resolves a TLB miss at `address` in `space`.
///
/// On success the TLB holds a translation for the faulting page and the access can be
/// retried. The translation is writable only for a store into a writable region; the
/// first store to a page first loaded by a read therefore traps as
/// [`FaultKind::ReadOnly`], which is fatal.
///
/// # Errors
///
/// - [`VmError::AccessFault`] for address zero, a [`FaultKind::ReadOnly`] fault, a
///   fault with no current address space, or an address outside every region.
/// - [`VmError::OutOfMemory`] if the page cannot be backed. Nothing is leaked.
pub fn handle_fault<F: FrameAllocator>(
    space: Option<&mut AddressSpace<F>>,
    kind: FaultKind,
    address: VirtualAddress,
) -> Result<(), VmError> {
    if address.as_usize() == 0 {
        log::warn!("{:?} fault on null address", kind);
        return Err(VmError::AccessFault);
    }
    if kind == FaultKind::ReadOnly {
        log::warn!("store to read-only page at {}", address);
        return Err(VmError::AccessFault);
    }

    let page = address.page_number();
    let Some(space) = space else {
        log::warn!("{:?} fault at {} with no address space", kind, address);
        return Err(VmError::AccessFault);
    };

    let region = space.regions().find_page(page);
    let writable = region.is_some_and(|region| region.is_writable());

    let frame = match space.page_table().lookup(page) {
        Some(frame) => {
            fault_trace!("{:?} fault at {}: resident in {}", kind, address, frame);
            frame
        }
        None => {
            if region.is_none() {
                log::warn!("{:?} fault at {} outside every region", kind, address);
                return Err(VmError::AccessFault);
            }
            let frame = space.map_zeroed(page).inspect_err(|error| {
                log::warn!("{:?} fault at {}: {}", kind, address, error)
            })?;
            fault_trace!("{:?} fault at {}: mapped {}", kind, address, frame);
            frame
        }
    };

    let dirty = kind == FaultKind::Write && writable;
    tlb::install(TlbEntry::mapping(page, frame, dirty));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressTranslator, PageNumber, Permissions, arch::EmulatedFrameAllocator};

    fn rw() -> Permissions {
        Permissions::READ | Permissions::WRITE
    }

    fn space_with_region<'a>(
        frames: &'a EmulatedFrameAllocator,
        base: usize,
        length: usize,
        permissions: Permissions,
    ) -> AddressSpace<&'a EmulatedFrameAllocator> {
        let mut space = AddressSpace::new(frames).unwrap();
        space
            .define_region(VirtualAddress::new(base), length, permissions)
            .unwrap();
        space
    }

    fn fault<F: FrameAllocator>(
        space: &mut AddressSpace<F>,
        kind: FaultKind,
        address: usize,
    ) -> Result<(), VmError> {
        handle_fault(Some(space), kind, VirtualAddress::new(address))
    }

    #[test]
    fn from_raw() {
        assert_eq!(FaultKind::from_raw(0), Ok(FaultKind::Read));
        assert_eq!(FaultKind::from_raw(1), Ok(FaultKind::Write));
        assert_eq!(FaultKind::from_raw(2), Ok(FaultKind::ReadOnly));
        assert_eq!(FaultKind::from_raw(3), Err(VmError::InvalidArgument));
    }

    #[test]
    fn end_to_end() {
        let frames = EmulatedFrameAllocator::new(16);
        let mut space = space_with_region(&frames, 0x1000, 0x2000, rw());

        fault(&mut space, FaultKind::Read, 0x1000).unwrap();
        let first = PageNumber::new(1);
        assert!(space.page_table().lookup(first).is_some());
        assert!(space.resident_page(first).unwrap().iter().all(|&b| b == 0));
        let entry = tlb::lookup(first).unwrap();
        assert!(!entry.is_dirty());

        fault(&mut space, FaultKind::Write, 0x2500).unwrap();
        let second = PageNumber::new(2);
        let entry = tlb::lookup(second).unwrap();
        assert_eq!(Some(entry.frame()), space.page_table().lookup(second));
        assert!(entry.is_dirty());

        assert_eq!(
            fault(&mut space, FaultKind::Read, 0x5000),
            Err(VmError::AccessFault)
        );
        assert_eq!(
            fault(&mut space, FaultKind::Read, 0),
            Err(VmError::AccessFault)
        );
        assert_eq!(space.page_table().resident_pages(), 2);
    }

    #[test]
    fn null_address_is_rejected_without_a_space() {
        assert_eq!(
            handle_fault::<&EmulatedFrameAllocator>(
                None,
                FaultKind::Write,
                VirtualAddress::new(0)
            ),
            Err(VmError::AccessFault)
        );
    }

    #[test]
    fn missing_space_is_access_fault() {
        assert_eq!(
            handle_fault::<&EmulatedFrameAllocator>(
                None,
                FaultKind::Read,
                VirtualAddress::new(0x1000)
            ),
            Err(VmError::AccessFault)
        );
    }

    #[test]
    fn read_only_fault_is_fatal() {
        let frames = EmulatedFrameAllocator::new(8);
        let mut space = space_with_region(&frames, 0x1000, 0x1000, rw());
        fault(&mut space, FaultKind::Read, 0x1000).unwrap();
        assert_eq!(
            fault(&mut space, FaultKind::ReadOnly, 0x1000),
            Err(VmError::AccessFault)
        );
    }

    #[test]
    fn unaligned_segment_maps_whole_pages() {
        let frames = EmulatedFrameAllocator::new(8);
        let mut space = space_with_region(&frames, 0x1F00, 0x200, rw());

        fault(&mut space, FaultKind::Write, 0x1000).unwrap();
        fault(&mut space, FaultKind::Write, 0x2FFF).unwrap();
        assert_eq!(space.page_table().resident_pages(), 2);
        assert_eq!(
            fault(&mut space, FaultKind::Read, 0x3000),
            Err(VmError::AccessFault)
        );
        assert_eq!(
            fault(&mut space, FaultKind::Read, 0x0FFF),
            Err(VmError::AccessFault)
        );
    }

    #[test]
    fn kernel_segment_is_outside_every_region() {
        let frames = EmulatedFrameAllocator::new(8);
        let mut space = AddressSpace::new(&frames).unwrap();
        space.define_stack().unwrap();
        assert_eq!(
            fault(&mut space, FaultKind::Write, 0x8000_0000),
            Err(VmError::AccessFault)
        );
        fault(&mut space, FaultKind::Write, 0x7FFF_FFFC).unwrap();
    }

    /// Stores a byte the way the processor would: through the TLB translation.
    fn store(address: usize, value: u8) {
        let address = VirtualAddress::new(address);
        let entry = tlb::lookup(address.page_number()).expect("store without translation");
        assert!(entry.is_dirty(), "store through clean translation");
        let ptr: *mut u8 = AddressTranslator::current().phys_to_ptr(entry.frame().start());
        unsafe { ptr.add(address.as_usize() % crate::PAGE_SIZE).write(value) }
    }

    /// Loads a byte through the TLB translation.
    fn load(address: usize) -> u8 {
        let address = VirtualAddress::new(address);
        let entry = tlb::lookup(address.page_number()).expect("load without translation");
        let ptr: *const u8 = AddressTranslator::current().phys_to_ptr(entry.frame().start());
        unsafe { ptr.add(address.as_usize() % crate::PAGE_SIZE).read() }
    }

    #[test]
    fn copies_diverge_through_write_faults() {
        let frames = EmulatedFrameAllocator::new(16);
        let mut parent = space_with_region(&frames, 0x1000, 0x2000, rw());
        fault(&mut parent, FaultKind::Write, 0x1000).unwrap();
        store(0x1000, 0x5A);

        let mut child = parent.try_clone().unwrap();

        // The parent keeps running and writes to the shared page.
        tlb::activate(Some(&parent));
        fault(&mut parent, FaultKind::Write, 0x1010).unwrap();
        store(0x1010, 0xAA);

        // The child sees the contents as of the copy, then writes its own.
        tlb::deactivate();
        tlb::activate(Some(&child));
        fault(&mut child, FaultKind::Read, 0x1010).unwrap();
        assert_eq!(load(0x1000), 0x5A);
        assert_eq!(load(0x1010), 0);
        tlb::invalidate_all();
        fault(&mut child, FaultKind::Write, 0x1020).unwrap();
        store(0x1020, 0xBB);
        fault(&mut child, FaultKind::Write, 0x2000).unwrap();
        store(0x2000, 0xCC);

        // Back in the parent, none of the child's stores are visible.
        tlb::deactivate();
        tlb::activate(Some(&parent));
        fault(&mut parent, FaultKind::Read, 0x1020).unwrap();
        assert_eq!(load(0x1010), 0xAA);
        assert_eq!(load(0x1020), 0);
        assert_eq!(parent.page_table().lookup(PageNumber::new(2)), None);
        assert_eq!(frames.frames_in_use(), 3);
    }

    #[test]
    fn refault_reuses_page() {
        let frames = EmulatedFrameAllocator::new(8);
        let mut space = space_with_region(&frames, 0x1000, 0x2000, rw());
        fault(&mut space, FaultKind::Write, 0x1abc).unwrap();
        let frame = space.page_table().lookup(PageNumber::new(1)).unwrap();
        let allocations = frames.allocations();

        tlb::invalidate_all();
        fault(&mut space, FaultKind::Write, 0x1000).unwrap();
        assert_eq!(frames.allocations(), allocations);
        assert_eq!(tlb::lookup(PageNumber::new(1)).unwrap().frame(), frame);
    }

    #[test]
    fn fresh_pages_are_zeroed() {
        let frames = EmulatedFrameAllocator::new(8);
        let mut space = space_with_region(&frames, 0x4000, 0x3000, rw());
        for address in [0x4000, 0x5000, 0x6fff] {
            fault(&mut space, FaultKind::Read, address).unwrap();
            let page = VirtualAddress::new(address).page_number();
            assert!(space.resident_page(page).unwrap().iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn write_to_read_only_region_is_mapped_clean() {
        let frames = EmulatedFrameAllocator::new(8);
        let mut space = space_with_region(&frames, 0x1000, 0x1000, Permissions::READ);
        fault(&mut space, FaultKind::Write, 0x1000).unwrap();
        assert!(!tlb::lookup(PageNumber::new(1)).unwrap().is_dirty());
    }

    #[test]
    fn load_override_grants_dirty_entries() {
        let frames = EmulatedFrameAllocator::new(8);
        let mut space = space_with_region(&frames, 0x1000, 0x1000, Permissions::READ);
        space.prepare_load();
        fault(&mut space, FaultKind::Write, 0x1000).unwrap();
        assert!(tlb::lookup(PageNumber::new(1)).unwrap().is_dirty());

        space.complete_load();
        fault(&mut space, FaultKind::Write, 0x1000).unwrap();
        assert!(!tlb::lookup(PageNumber::new(1)).unwrap().is_dirty());
    }

    #[test]
    fn frame_exhaustion_is_out_of_memory() {
        let frames = EmulatedFrameAllocator::new(2);
        let mut space = space_with_region(&frames, 0x1000, 0x2000, rw());
        fault(&mut space, FaultKind::Read, 0x1000).unwrap();
        assert_eq!(
            fault(&mut space, FaultKind::Read, 0x2000),
            Err(VmError::OutOfMemory)
        );
        assert_eq!(space.page_table().resident_pages(), 1);
        assert!(tlb::lookup(PageNumber::new(2)).is_none());
    }

    #[test]
    fn table_exhaustion_releases_frame() {
        let frames = EmulatedFrameAllocator::new(8);
        let mut space = space_with_region(&frames, 0x1000, 0x1000, rw());
        crate::failpoints::deny_next_allocation();
        assert_eq!(
            fault(&mut space, FaultKind::Read, 0x1000),
            Err(VmError::OutOfMemory)
        );
        assert_eq!(frames.frames_in_use(), 0);
    }

    #[test]
    fn interrupts_enabled_after_fault() {
        let frames = EmulatedFrameAllocator::new(8);
        let mut space = space_with_region(&frames, 0x1000, 0x1000, rw());
        fault(&mut space, FaultKind::Read, 0x1000).unwrap();
        assert!(crate::arch::interrupts_enabled());
    }
}

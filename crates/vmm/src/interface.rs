//! Entry points for the rest of the kernel.
//!
//! Process management calls these with the handle it keeps per process, which may be
//! absent (kernel threads own no address space). An absent handle is a caller bug and is
//! reported as [`VmError::InvalidArgument`], except where noted. The trap layer hands
//! [`handle_fault`] the raw fault code and address from the exception frame.

use crate::{
    AddressSpace, AddressTranslator, FrameAllocator, Permissions, VirtualAddress, VmError,
    fault::{self, FaultKind},
    tlb::{self, Shootdown},
};

/// Initializes the subsystem at boot.
///
/// Installs the translation the kernel uses to reach physical frames.
///
/// # Panics
///
/// Panics if called twice.
pub fn bootstrap(translator: AddressTranslator) {
    AddressTranslator::set_current(translator);
    log::debug!("virtual memory initialized");
}

/// Creates an empty address space for a new process.
pub fn create_address_space<F: FrameAllocator>(frames: F) -> Result<AddressSpace<F>, VmError> {
    AddressSpace::new(frames)
}

/// Creates an independent copy of `source` for a forked process.
pub fn copy_address_space<F: FrameAllocator + Clone>(
    source: Option<&AddressSpace<F>>,
) -> Result<AddressSpace<F>, VmError> {
    source.ok_or(VmError::InvalidArgument)?.try_clone()
}

/// Destroys the address space of an exiting process.
///
/// # Panics
///
/// Panics if `space` is absent: a process with nothing to destroy means its bookkeeping
/// is corrupt.
pub fn destroy_address_space<F: FrameAllocator>(space: Option<AddressSpace<F>>) {
    match space {
        Some(space) => space.destroy(),
        None => panic!("destroying a missing address space"),
    }
}

/// Declares a program segment.
pub fn define_region<F: FrameAllocator>(
    space: Option<&mut AddressSpace<F>>,
    base: VirtualAddress,
    length: usize,
    readable: bool,
    writable: bool,
    executable: bool,
) -> Result<(), VmError> {
    space.ok_or(VmError::InvalidArgument)?.define_region(
        base,
        length,
        Permissions::from_flags(readable, writable, executable),
    )
}

/// Opens read-only segments for the loader.
pub fn prepare_load<F: FrameAllocator>(space: Option<&mut AddressSpace<F>>) -> Result<(), VmError> {
    space.ok_or(VmError::InvalidArgument)?.prepare_load();
    Ok(())
}

/// Closes the segments opened by [`prepare_load`].
pub fn complete_load<F: FrameAllocator>(
    space: Option<&mut AddressSpace<F>>,
) -> Result<(), VmError> {
    space.ok_or(VmError::InvalidArgument)?.complete_load();
    Ok(())
}

/// Declares the user stack and returns the initial stack pointer.
pub fn define_stack<F: FrameAllocator>(
    space: Option<&mut AddressSpace<F>>,
) -> Result<VirtualAddress, VmError> {
    space.ok_or(VmError::InvalidArgument)?.define_stack()
}

/// Handles a TLB exception in the current address space.
///
/// `code` is the fault code from the trap frame (0 read, 1 write, 2 read-only) and
/// `address` the faulting virtual address. A missing address space is an
/// [`VmError::AccessFault`] here: the kernel itself must never fault.
pub fn handle_fault<F: FrameAllocator>(
    space: Option<&mut AddressSpace<F>>,
    code: u32,
    address: usize,
) -> Result<(), VmError> {
    let kind = FaultKind::from_raw(code)?;
    let address = VirtualAddress::try_new(address).ok_or(VmError::AccessFault)?;
    fault::handle_fault(space, kind, address)
}

/// Called when a thread is switched in.
pub fn activate<F: FrameAllocator>(space: Option<&AddressSpace<F>>) {
    tlb::activate(space);
}

/// Called when a thread is switched out.
pub fn deactivate() {
    tlb::deactivate();
}

/// Called on a cross-processor TLB invalidation request. Never returns.
pub fn tlb_shootdown(request: &Shootdown) -> ! {
    tlb::shootdown(request)
}

//! Interface to the physical frame allocator.
//!
//! The frame allocator lives outside this crate. The virtual memory subsystem only
//! needs to obtain and return page-sized frames, and to reach their contents through
//! the fixed kernel translation provided by [`AddressTranslator`].

use core::ptr;

use crate::{AddressTranslator, FrameNumber, PhysicalAddress, arch::PAGE_SIZE};

/// Errors reported by a frame allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No run of free frames is large enough.
    OutOfMemory,
    /// A request for zero frames.
    InvalidCount,
}

/// A source of physical frames.
///
/// Implementations must never hand out frame zero: a zero page-table entry means
/// "not resident". Allocation must not block the caller indefinitely; exhaustion is
/// reported as [`AllocError::OutOfMemory`].
pub trait FrameAllocator {
    /// Allocates `count` physically contiguous frames, returning the address of the first.
    fn allocate_frames(&self, count: usize) -> Result<PhysicalAddress, AllocError>;

    /// Returns a block previously obtained from [`FrameAllocator::allocate_frames`].
    fn release_frames(&self, base: PhysicalAddress);
}

impl<T: FrameAllocator + ?Sized> FrameAllocator for &T {
    fn allocate_frames(&self, count: usize) -> Result<PhysicalAddress, AllocError> {
        (**self).allocate_frames(count)
    }

    fn release_frames(&self, base: PhysicalAddress) {
        (**self).release_frames(base)
    }
}

/// Allocates a single frame for a user page.
///
/// # Panics
///
/// Panics if the allocator hands out the reserved frame zero.
pub(crate) fn allocate_frame<F: FrameAllocator + ?Sized>(
    frames: &F,
) -> Result<FrameNumber, AllocError> {
    let base = frames.allocate_frames(1)?;
    let frame = base.frame_number();
    assert!(
        !frame.is_reserved(),
        "frame allocator handed out reserved frame zero"
    );
    Ok(frame)
}

/// Returns a single frame to the allocator.
pub(crate) fn release_frame<F: FrameAllocator + ?Sized>(frames: &F, frame: FrameNumber) {
    frames.release_frames(frame.start());
}

fn frame_ptr(frame: FrameNumber) -> *mut u8 {
    AddressTranslator::current().phys_to_ptr(frame.start())
}

/// Fills a frame with zeroes.
///
/// # Safety
///
/// The caller must own `frame` and no other reference to its contents may be live.
pub(crate) unsafe fn zero_frame(frame: FrameNumber) {
    // SAFETY: The translator maps every allocatable frame to PAGE_SIZE writable bytes
    // and the caller guarantees exclusive ownership.
    unsafe { ptr::write_bytes(frame_ptr(frame), 0, PAGE_SIZE) }
}

/// Copies the full contents of `src` into `dst`.
///
/// # Safety
///
/// The caller must own both frames, they must be distinct, and no mutable reference to
/// either may be live.
pub(crate) unsafe fn copy_frame(dst: FrameNumber, src: FrameNumber) {
    debug_assert_ne!(dst, src, "copying a frame onto itself");
    // SAFETY: Distinct frames never overlap and both are PAGE_SIZE bytes long.
    unsafe { ptr::copy_nonoverlapping(frame_ptr(src), frame_ptr(dst), PAGE_SIZE) }
}

/// Returns the kernel view of a frame's contents.
///
/// # Safety
///
/// The caller must own `frame` for the whole lifetime `'a` and must not create
/// overlapping views of it.
pub(crate) unsafe fn frame_bytes<'a>(frame: FrameNumber) -> &'a mut [u8] {
    // SAFETY: See the caller contract above.
    unsafe { core::slice::from_raw_parts_mut(frame_ptr(frame), PAGE_SIZE) }
}

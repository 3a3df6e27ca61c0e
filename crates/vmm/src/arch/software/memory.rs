//! Emulated physical memory.

use alloc::{boxed::Box, vec};
use core::ptr::NonNull;

/// Emulated physical memory for software simulation.
///
/// Physical address `n` is byte `n` of a heap buffer owned by this object. The buffer
/// is handed out through raw pointers, so it is held as a leaked box and freed on drop.
pub struct EmulatedMemory {
    base: NonNull<u8>,
    size: usize,
}

impl EmulatedMemory {
    /// Creates a new zero-filled emulated memory region of the specified size.
    pub fn new(size: usize) -> Self {
        let buffer: Box<[u8]> = vec![0u8; size].into_boxed_slice();
        let base = NonNull::from(Box::leak(buffer)).cast::<u8>();
        Self { base, size }
    }

    /// Translates a physical address to a pointer into the buffer.
    ///
    /// # Panics
    ///
    /// Panics if the address lies outside the emulated memory.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.size, "physical address out of bounds");
        // SAFETY: `phys` is within the allocation.
        unsafe { self.base.as_ptr().add(phys) }
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for EmulatedMemory {
    fn drop(&mut self) {
        // SAFETY: `base` and `size` describe the boxed slice leaked in `new`.
        unsafe {
            drop(Box::from_raw(core::ptr::slice_from_raw_parts_mut(
                self.base.as_ptr(),
                self.size,
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_is_offset_into_buffer() {
        let mem = EmulatedMemory::new(0x2000);
        let base = mem.translate(0);
        assert_eq!(mem.translate(0x1234) as usize - base as usize, 0x1234);
        assert_eq!(mem.size(), 0x2000);
    }

    #[test]
    fn starts_zeroed() {
        let mem = EmulatedMemory::new(64);
        let bytes = unsafe { core::slice::from_raw_parts(mem.translate(0), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "physical address out of bounds")]
    fn rejects_out_of_range() {
        let mem = EmulatedMemory::new(64);
        mem.translate(64);
    }
}

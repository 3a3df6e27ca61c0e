//! Frame allocator over emulated physical memory.

use alloc::{vec, vec::Vec};
use core::ptr;

use spin::Mutex;

use crate::{
    AddressTranslator, FrameNumber, PhysicalAddress,
    frame::{AllocError, FrameAllocator},
};

use super::PAGE_SIZE;

/// Size of the emulated memory installed when a thread has none yet.
const DEFAULT_MEMORY_FRAMES: usize = 1024;

/// Byte pattern written over frames when they change hands, so that code which forgets
/// to initialize a page reads garbage instead of zeroes.
const POISON: u8 = 0xA5;

/// A first-fit frame allocator over the thread's emulated memory.
///
/// Frame zero is reserved and never handed out. Every allocation and release is
/// counted so tests can check that an address space returns exactly what it took.
pub struct EmulatedFrameAllocator {
    state: Mutex<State>,
}

struct State {
    /// Length of the block starting at each frame, zero if the frame does not start an
    /// allocated block.
    block_len: Vec<usize>,
    used: Vec<bool>,
    in_use: usize,
    allocations: usize,
    releases: usize,
}

impl EmulatedFrameAllocator {
    /// Creates an allocator managing frames `1..frames` of the emulated memory.
    ///
    /// Installs emulated memory as the thread's address translator if none is set.
    ///
    /// # Panics
    ///
    /// Panics if the current translator is not emulated or is too small.
    pub fn new(frames: usize) -> Self {
        if AddressTranslator::try_current().is_none() {
            AddressTranslator::set_current(AddressTranslator::emulated(
                frames.max(DEFAULT_MEMORY_FRAMES) * PAGE_SIZE,
            ));
        }
        let available = AddressTranslator::current()
            .memory_size()
            .expect("emulated frame allocator requires an emulated address translator")
            / PAGE_SIZE;
        assert!(
            frames <= available,
            "emulated memory holds {} frames, {} requested",
            available,
            frames
        );

        let mut used = vec![false; frames];
        if let Some(reserved) = used.first_mut() {
            *reserved = true;
        }

        Self {
            state: Mutex::new(State {
                block_len: vec![0; frames],
                used,
                in_use: 0,
                allocations: 0,
                releases: 0,
            }),
        }
    }

    /// Returns the number of frames currently allocated.
    pub fn frames_in_use(&self) -> usize {
        self.state.lock().in_use
    }

    /// Returns the number of frames that can still be allocated.
    pub fn free_frames(&self) -> usize {
        self.state.lock().used.iter().filter(|used| !**used).count()
    }

    /// Returns the number of successful allocation calls so far.
    pub fn allocations(&self) -> usize {
        self.state.lock().allocations
    }

    /// Returns the number of release calls so far.
    pub fn releases(&self) -> usize {
        self.state.lock().releases
    }

    fn poison(base: FrameNumber, count: usize) {
        let ptr: *mut u8 = AddressTranslator::current().phys_to_ptr(base.start());
        // SAFETY: The block lies within emulated memory and is owned by the allocator
        // or freshly handed to the caller.
        unsafe { ptr::write_bytes(ptr, POISON, count * PAGE_SIZE) }
    }
}

impl FrameAllocator for EmulatedFrameAllocator {
    fn allocate_frames(&self, count: usize) -> Result<PhysicalAddress, AllocError> {
        if count == 0 {
            return Err(AllocError::InvalidCount);
        }

        let mut state = self.state.lock();
        let total = state.used.len();
        let mut start = 1;
        while start + count <= total {
            match state.used[start..start + count].iter().position(|used| *used) {
                Some(taken) => start += taken + 1,
                None => {
                    state.used[start..start + count].fill(true);
                    state.block_len[start] = count;
                    state.in_use += count;
                    state.allocations += 1;
                    drop(state);

                    let base = FrameNumber::new(start);
                    Self::poison(base, count);
                    return Ok(base.start());
                }
            }
        }

        Err(AllocError::OutOfMemory)
    }

    fn release_frames(&self, base: PhysicalAddress) {
        let frame = base.frame_number();
        let mut state = self.state.lock();
        let count = state
            .block_len
            .get(frame.as_usize())
            .copied()
            .unwrap_or(0);
        assert!(count != 0, "release of unallocated frame {}", frame);

        state.block_len[frame.as_usize()] = 0;
        state.used[frame.as_usize()..frame.as_usize() + count].fill(false);
        state.in_use -= count;
        state.releases += 1;
        drop(state);

        Self::poison(frame, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_hands_out_frame_zero() {
        let frames = EmulatedFrameAllocator::new(4);
        let mut handed_out = Vec::new();
        while let Ok(base) = frames.allocate_frames(1) {
            handed_out.push(base.frame_number());
        }
        assert_eq!(
            handed_out,
            [FrameNumber::new(1), FrameNumber::new(2), FrameNumber::new(3)]
        );
    }

    #[test]
    fn exhaustion_is_out_of_memory() {
        let frames = EmulatedFrameAllocator::new(2);
        assert!(frames.allocate_frames(1).is_ok());
        assert_eq!(frames.allocate_frames(1), Err(AllocError::OutOfMemory));
    }

    #[test]
    fn zero_count_is_rejected() {
        let frames = EmulatedFrameAllocator::new(2);
        assert_eq!(frames.allocate_frames(0), Err(AllocError::InvalidCount));
    }

    #[test]
    fn contiguous_blocks_release_as_a_unit() {
        let frames = EmulatedFrameAllocator::new(8);
        let single = frames.allocate_frames(1).unwrap();
        let block = frames.allocate_frames(3).unwrap();
        assert_eq!(frames.frames_in_use(), 4);

        frames.release_frames(block);
        assert_eq!(frames.frames_in_use(), 1);
        frames.release_frames(single);
        assert_eq!(frames.frames_in_use(), 0);
        assert_eq!(frames.free_frames(), 7);
        assert_eq!((frames.allocations(), frames.releases()), (2, 2));
    }

    #[test]
    fn allocated_frames_are_poisoned() {
        let frames = EmulatedFrameAllocator::new(4);
        let base = frames.allocate_frames(1).unwrap();
        let ptr: *const u8 = AddressTranslator::current().phys_to_ptr(base);
        let bytes = unsafe { core::slice::from_raw_parts(ptr, PAGE_SIZE) };
        assert!(bytes.iter().all(|&b| b == POISON));
    }

    #[test]
    #[should_panic(expected = "release of unallocated frame")]
    fn double_release_panics() {
        let frames = EmulatedFrameAllocator::new(4);
        let base = frames.allocate_frames(1).unwrap();
        frames.release_frames(base);
        frames.release_frames(base);
    }
}

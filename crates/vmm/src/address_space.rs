//! Address space management.
//!
//! An [`AddressSpace`] is the complete virtual memory state of one user process: the
//! regions the loader declared, the page table of pages faulted in so far, and the
//! frame allocator those pages came from. It owns every frame its page table maps and
//! returns them all when dropped.
//!
//! An address space is mutated through `&mut` only. A kernel that runs several threads
//! in one process must serialize their faults, e.g. by keeping the space in a
//! `spin::Mutex` and holding the lock for the whole fault.

use crate::{
    FrameAllocator, FrameNumber, PageNumber, VirtualAddress, VmError,
    frame::{self, allocate_frame, release_frame},
    layout,
    page_table::PageTable,
    region::{Permissions, Region, RegionList},
    tlb,
};

/// The virtual memory state of one user process.
pub struct AddressSpace<F: FrameAllocator> {
    regions: RegionList,
    page_table: PageTable,
    stack_top: VirtualAddress,
    frames: F,
}

impl<F: FrameAllocator> AddressSpace<F> {
    /// Creates an empty address space drawing frames from `frames`.
    ///
    /// # Errors
    ///
    /// [`VmError::OutOfMemory`] if the page directory cannot be allocated.
    pub fn new(frames: F) -> Result<Self, VmError> {
        let space = Self {
            regions: RegionList::new(),
            page_table: PageTable::new()?,
            stack_top: VirtualAddress::new(layout::USER_STACK_TOP),
            frames,
        };
        log::debug!("address space created");
        Ok(space)
    }

    /// Creates an independent copy of this address space.
    ///
    /// The copy has the same regions and a private copy of every resident page. If any
    /// allocation fails, everything allocated for the copy so far is released again and
    /// this space is untouched.
    ///
    /// # Errors
    ///
    /// [`VmError::OutOfMemory`] if a frame, a page table or the region list cannot be
    /// allocated.
    pub fn try_clone(&self) -> Result<Self, VmError>
    where
        F: Clone,
    {
        let mut copy = Self {
            regions: self.regions.try_clone()?,
            page_table: PageTable::new()?,
            stack_top: self.stack_top,
            frames: self.frames.clone(),
        };

        for (page, source) in self.page_table.iter() {
            let target = allocate_frame(&copy.frames).inspect_err(|_| {
                log::warn!("out of frames copying address space at {}", page.start())
            })?;
            // SAFETY: `target` was just allocated for the copy; `source` is owned by
            // this space, which is borrowed immutably for the whole copy.
            unsafe { frame::copy_frame(target, source) };
            if let Err(error) = copy.page_table.insert(page, target) {
                release_frame(&copy.frames, target);
                log::warn!("out of memory copying page table at {}", page.start());
                return Err(error);
            }
        }

        log::debug!(
            "address space copied: {} regions, {} pages",
            copy.regions.len(),
            copy.page_table.resident_pages()
        );
        Ok(copy)
    }

    /// Tears down the address space, returning every resident frame to the allocator.
    ///
    /// Equivalent to dropping it.
    pub fn destroy(self) {
        drop(self);
    }

    /// Declares a region of `length` bytes starting at `base`.
    ///
    /// The range is widened to whole pages. Regions are not checked for overlap; the most
    /// recently declared one wins.
    ///
    /// # Errors
    ///
    /// - [`VmError::OutOfMemory`] if the region list cannot grow.
    /// - [`VmError::InvalidArgument`] if the range extends past the 32-bit address space.
    pub fn define_region(
        &mut self,
        base: VirtualAddress,
        length: usize,
        permissions: Permissions,
    ) -> Result<(), VmError> {
        let region = self.regions.define(base, length, permissions)?;
        log::debug!("region defined: {}", region);
        Ok(())
    }

    /// Makes read-only regions writable while the loader fills them.
    pub fn prepare_load(&mut self) {
        self.regions.prepare_load();
    }

    /// Returns the regions opened by [`AddressSpace::prepare_load`] to read-only.
    ///
    /// The TLB is flushed as well, so no writable translation created during loading
    /// outlives the override.
    pub fn complete_load(&mut self) {
        self.regions.complete_load();
        tlb::invalidate_all();
    }

    /// Declares the user stack and returns the initial stack pointer.
    ///
    /// The stack is [`layout::STACK_PAGES`] pages of read-write memory ending at
    /// [`layout::USER_STACK_TOP`].
    ///
    /// # Errors
    ///
    /// [`VmError::OutOfMemory`] if the region list cannot grow.
    pub fn define_stack(&mut self) -> Result<VirtualAddress, VmError> {
        self.define_region(
            VirtualAddress::new(self.stack_top.as_usize() - layout::STACK_SIZE),
            layout::STACK_SIZE,
            Permissions::READ | Permissions::WRITE,
        )?;
        Ok(self.stack_top)
    }

    /// Returns the newest region containing `addr`.
    pub fn lookup_region(&self, addr: VirtualAddress) -> Option<&Region> {
        self.regions.find(addr)
    }

    /// Returns the declared regions.
    pub fn regions(&self) -> &RegionList {
        &self.regions
    }

    /// Returns the page table.
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// Returns the top of the user stack.
    pub fn stack_top(&self) -> VirtualAddress {
        self.stack_top
    }

    /// Returns the frame allocator this space draws from.
    pub fn frames(&self) -> &F {
        &self.frames
    }

    /// Backs `page` with a freshly zeroed frame.
    ///
    /// # Errors
    ///
    /// [`VmError::OutOfMemory`] if no frame is available or the page table cannot grow.
    /// No frame is leaked in either case.
    pub(crate) fn map_zeroed(&mut self, page: PageNumber) -> Result<FrameNumber, VmError> {
        let frame = allocate_frame(&self.frames)?;
        // SAFETY: The frame was just allocated and is not yet mapped anywhere.
        unsafe { frame::zero_frame(frame) };

        if let Err(error) = self.page_table.insert(page, frame) {
            release_frame(&self.frames, frame);
            return Err(error);
        }
        Ok(frame)
    }

    /// Returns the kernel view of a resident page.
    pub fn resident_page(&self, page: PageNumber) -> Option<&[u8]> {
        let frame = self.page_table.lookup(page)?;
        // SAFETY: The frame is owned by this space and no mutable view can coexist with
        // the shared borrow of `self`.
        Some(unsafe { frame::frame_bytes(frame) })
    }

    /// Returns the mutable kernel view of a resident page.
    pub fn resident_page_mut(&mut self, page: PageNumber) -> Option<&mut [u8]> {
        let frame = self.page_table.lookup(page)?;
        // SAFETY: The frame is owned by this space and the exclusive borrow of `self`
        // rules out any other view.
        Some(unsafe { frame::frame_bytes(frame) })
    }
}

impl<F: FrameAllocator> Drop for AddressSpace<F> {
    fn drop(&mut self) {
        let mut released = 0;
        for (_, frame) in self.page_table.iter() {
            release_frame(&self.frames, frame);
            released += 1;
        }
        log::debug!(
            "address space destroyed: {} regions, {} frames released",
            self.regions.len(),
            released
        );
    }
}

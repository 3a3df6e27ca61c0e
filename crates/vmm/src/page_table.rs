//! Two-level sparse page table.
//!
//! The table maps the virtual page numbers of one address space to the physical frames
//! backing them. It is walked by software only: the TLB is refilled by the fault
//! handler, so the layout is free to be whatever is compact and easy to index.
//!
//! ```text
//!                 directory (2048 slots)        table (512 entries)
//! vaddr[31:21] -> [ None | Some(table) ] -> vaddr[20:12] -> [ 0 | frame ]
//! ```
//!
//! Second-level tables are allocated on the first insert into their range and live
//! until the page table is dropped. A zero entry means "not resident"; frame zero is
//! never handed out by the frame allocator, so it can never be a real mapping.

use alloc::{boxed::Box, vec::Vec};
use core::num::NonZeroU32;

use crate::{FrameNumber, PageNumber, VmError, address::PageIndex, layout};

/// One second-level table entry.
type Entry = Option<NonZeroU32>;

/// A second-level table.
type Table = Box<[Entry]>;

/// The page table of one address space.
pub struct PageTable {
    directory: Box<[Option<Table>]>,
}

impl PageTable {
    /// Creates an empty page table.
    ///
    /// Only the directory is allocated; second-level tables appear on demand.
    ///
    /// # Errors
    ///
    /// [`VmError::OutOfMemory`] if the directory cannot be allocated.
    pub fn new() -> Result<Self, VmError> {
        Ok(Self {
            directory: alloc_slots(layout::DIRECTORY_ENTRIES)?,
        })
    }

    /// Returns the frame mapped at `page`, if any.
    pub fn lookup(&self, page: PageNumber) -> Option<FrameNumber> {
        let index = PageIndex::for_page(page);
        let table = self.directory.get(index.directory)?.as_ref()?;
        table[index.table].map(|frame| FrameNumber::new(frame.get() as usize))
    }

    /// Maps `page` to `frame`, replacing any previous mapping.
    ///
    /// # Errors
    ///
    /// - [`VmError::InvalidArgument`] if `page` lies beyond the 32-bit address space.
    /// - [`VmError::OutOfMemory`] if a second-level table is needed and cannot be
    ///   allocated.
    ///
    /// The page table is unchanged on error.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is the reserved frame zero or does not fit in 32 bits.
    pub fn insert(&mut self, page: PageNumber, frame: FrameNumber) -> Result<(), VmError> {
        let raw = u32::try_from(frame.as_usize())
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or_else(|| panic!("cannot map {:?} to {:?}", page, frame));

        let index = PageIndex::for_page(page);
        let slot = self
            .directory
            .get_mut(index.directory)
            .ok_or(VmError::InvalidArgument)?;
        if slot.is_none() {
            *slot = Some(alloc_slots(layout::TABLE_ENTRIES)?);
        }
        if let Some(table) = slot {
            table[index.table] = Some(raw);
        }
        Ok(())
    }

    /// Iterates over every resident page and its frame, in ascending page order.
    pub fn iter(&self) -> impl Iterator<Item = (PageNumber, FrameNumber)> + '_ {
        self.directory
            .iter()
            .enumerate()
            .filter_map(|(directory, table)| Some((directory, table.as_ref()?)))
            .flat_map(|(directory, table)| {
                table.iter().enumerate().filter_map(move |(table, entry)| {
                    let frame = (*entry)?;
                    let page = PageIndex {
                        directory,
                        table,
                        offset: 0,
                    }
                    .page_number();
                    Some((page, FrameNumber::new(frame.get() as usize)))
                })
            })
    }

    /// Returns the number of resident pages.
    pub fn resident_pages(&self) -> usize {
        self.iter().count()
    }

    /// Returns the number of allocated second-level tables.
    pub fn tables(&self) -> usize {
        self.directory.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Allocates `count` empty slots, reporting heap exhaustion instead of aborting.
fn alloc_slots<T>(count: usize) -> Result<Box<[Option<T>]>, VmError> {
    #[cfg(any(test, feature = "failpoints"))]
    if crate::failpoints::should_fail() {
        log::warn!("page table allocation denied by failpoint");
        return Err(VmError::OutOfMemory);
    }

    let mut slots = Vec::new();
    slots
        .try_reserve_exact(count)
        .map_err(|_| VmError::OutOfMemory)?;
    slots.resize_with(count, || None);
    Ok(slots.into_boxed_slice())
}

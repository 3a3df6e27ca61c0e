//! Declared segments of a user address space.
//!
//! The loader declares one region per program segment (text, data, bss, heap) and the
//! address space adds one for the stack. The fault handler only maps pages that fall
//! inside a region, with the permissions that region grants.

use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::{PageNumber, VirtualAddress, VmError, layout};

bitflags! {
    /// Access permissions of a region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl Permissions {
    /// Builds a permission set from the three flags the loader passes.
    pub fn from_flags(readable: bool, writable: bool, executable: bool) -> Self {
        let mut permissions = Permissions::empty();
        permissions.set(Permissions::READ, readable);
        permissions.set(Permissions::WRITE, writable);
        permissions.set(Permissions::EXECUTE, executable);
        permissions
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: Permissions, c: char| if self.contains(set) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Permissions::READ, 'r'),
            flag(Permissions::WRITE, 'w'),
            flag(Permissions::EXECUTE, 'x')
        )
    }
}

/// A range of a user address space with uniform permissions.
///
/// The range is kept exactly as declared; it need not start or end on a page boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    base: VirtualAddress,
    length: usize,
    permissions: Permissions,
    load_override: bool,
}

impl Region {
    /// Returns the first address of the region.
    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Returns the length of the region in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns the permissions the fault handler currently grants.
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Returns whether the region is a read-only segment temporarily opened for loading.
    pub fn load_override(&self) -> bool {
        self.load_override
    }

    /// Returns whether the region permits stores.
    pub fn is_writable(&self) -> bool {
        self.permissions.contains(Permissions::WRITE)
    }

    /// Returns whether `addr` lies in `[base, base + length)`.
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        let addr = addr.as_usize() as u64;
        let base = self.base.as_usize() as u64;
        addr >= base && addr < self.end()
    }

    /// Returns whether any byte of `page` lies in the region.
    pub fn overlaps_page(&self, page: PageNumber) -> bool {
        let start = page.start().as_usize() as u64;
        let base = self.base.as_usize() as u64;
        base < start + layout::PAGE_SIZE as u64 && start < self.end()
    }

    fn end(&self) -> u64 {
        self.base.as_usize() as u64 + self.length as u64
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {:#010x}) {}", self.base, self.end(), self.permissions)?;
        if self.load_override {
            write!(f, " (loading)")?;
        }
        Ok(())
    }
}

/// The regions of one address space, searched newest first.
///
/// Overlapping declarations are not rejected; the most recent one containing an
/// address wins.
#[derive(Debug, Default)]
pub struct RegionList {
    // Oldest first; every search walks it backwards.
    regions: Vec<Region>,
}

impl RegionList {
    /// Creates an empty list.
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Declares a region covering `[base, base + length)`.
    ///
    /// A zero length declares an empty region that contains no address.
    ///
    /// # Errors
    ///
    /// - [`VmError::InvalidArgument`] if the range extends past
    ///   [`layout::MAX_USER_ADDRESS`].
    /// - [`VmError::OutOfMemory`] if the list cannot grow.
    pub fn define(
        &mut self,
        base: VirtualAddress,
        length: usize,
        permissions: Permissions,
    ) -> Result<&Region, VmError> {
        let end = base.as_usize() as u64 + length as u64;
        if end > layout::MAX_USER_ADDRESS as u64 + 1 {
            return Err(VmError::InvalidArgument);
        }

        try_reserve(&mut self.regions, 1)?;
        self.regions.push(Region {
            base,
            length,
            permissions,
            load_override: false,
        });
        Ok(&self.regions[self.regions.len() - 1])
    }

    /// Returns the newest region containing `addr`.
    pub fn find(&self, addr: VirtualAddress) -> Option<&Region> {
        self.iter().find(|region| region.contains(addr))
    }

    /// Returns the newest region covering any byte of `page`.
    ///
    /// Segments need not be page-aligned, but pages are mapped whole, so the fault
    /// handler matches at page granularity.
    pub fn find_page(&self, page: PageNumber) -> Option<&Region> {
        self.iter().find(|region| region.overlaps_page(page))
    }

    /// Opens every read-only region for writing so the loader can fill it.
    ///
    /// Only regions whose permissions are exactly [`Permissions::READ`] are affected.
    pub fn prepare_load(&mut self) {
        for region in &mut self.regions {
            if region.permissions == Permissions::READ {
                region.permissions.insert(Permissions::WRITE);
                region.load_override = true;
            }
        }
    }

    /// Closes every region opened by [`RegionList::prepare_load`], returning it to
    /// read-only.
    pub fn complete_load(&mut self) {
        for region in &mut self.regions {
            if region.load_override {
                region.permissions = Permissions::READ;
                region.load_override = false;
            }
        }
    }

    /// Returns a copy of the list.
    ///
    /// # Errors
    ///
    /// [`VmError::OutOfMemory`] if the copy cannot be allocated.
    pub fn try_clone(&self) -> Result<Self, VmError> {
        let mut regions = Vec::new();
        try_reserve(&mut regions, self.regions.len())?;
        regions.extend_from_slice(&self.regions);
        Ok(Self { regions })
    }

    /// Iterates over the regions, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().rev()
    }

    /// Returns the number of declared regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns whether no region has been declared.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

fn try_reserve(regions: &mut Vec<Region>, additional: usize) -> Result<(), VmError> {
    #[cfg(any(test, feature = "failpoints"))]
    if crate::failpoints::should_fail() {
        return Err(VmError::OutOfMemory);
    }
    regions
        .try_reserve_exact(additional)
        .map_err(|_| VmError::OutOfMemory)
}

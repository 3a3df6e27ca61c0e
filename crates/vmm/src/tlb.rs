//! Translation cache (TLB) controller.
//!
//! The TLB holds no address-space tags, so it is flushed in full whenever a thread with
//! a user address space is switched in or out. Between switches it is refilled one entry
//! at a time by the fault handler. Every mutation runs under an [`InterruptGuard`]
//! because the slots are per-processor state an interrupt handler could otherwise
//! observe half-written.

use core::{fmt, marker::PhantomData};

use bitflags::bitflags;

use crate::{AddressSpace, FrameAllocator, FrameNumber, PageNumber, arch, layout};

bitflags! {
    /// Control bits in the low word of a TLB entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        /// The entry translates.
        const VALID = 1 << 9;
        /// Stores are permitted; a store through a clean entry traps as read-only.
        const DIRTY = 1 << 10;
    }
}

/// Mask selecting the page or frame bits of either word of an entry.
const PAGE_FRAME: u32 = 0xFFFF_F000;

/// Base of the unmapped kernel segment. Tags in this segment never match a user access.
const KSEG0: u32 = 0x8000_0000;

/// One TLB entry: a tag word (virtual page) and a translation word (frame and flags).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    hi: u32,
    lo: u32,
}

impl TlbEntry {
    /// Creates an entry from raw register values.
    pub const fn from_raw(hi: u32, lo: u32) -> Self {
        Self { hi, lo }
    }

    /// Creates the invalid entry parked in `slot`.
    ///
    /// Each slot gets a distinct kernel-segment tag so no two slots ever collide.
    pub const fn invalid(slot: usize) -> Self {
        Self {
            hi: KSEG0 | ((slot as u32) << layout::PAGE_SHIFT),
            lo: 0,
        }
    }

    /// Creates a valid entry translating `page` to `frame`.
    pub fn mapping(page: PageNumber, frame: FrameNumber, dirty: bool) -> Self {
        let mut flags = EntryFlags::VALID;
        flags.set(EntryFlags::DIRTY, dirty);
        Self {
            hi: (page.as_usize() << layout::PAGE_SHIFT) as u32 & PAGE_FRAME,
            lo: ((frame.as_usize() << layout::PAGE_SHIFT) as u32 & PAGE_FRAME) | flags.bits(),
        }
    }

    /// Returns the tag word.
    pub const fn hi(self) -> u32 {
        self.hi
    }

    /// Returns the translation word.
    pub const fn lo(self) -> u32 {
        self.lo
    }

    /// Returns the control bits of the translation word.
    pub fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.lo)
    }

    /// Returns whether the entry translates.
    pub fn is_valid(self) -> bool {
        self.flags().contains(EntryFlags::VALID)
    }

    /// Returns whether the entry permits stores.
    pub fn is_dirty(self) -> bool {
        self.flags().contains(EntryFlags::DIRTY)
    }

    /// Returns the virtual page this entry is tagged with.
    pub fn page(self) -> PageNumber {
        PageNumber::new((self.hi >> layout::PAGE_SHIFT) as usize)
    }

    /// Returns the frame this entry translates to.
    pub fn frame(self) -> FrameNumber {
        FrameNumber::new((self.lo >> layout::PAGE_SHIFT) as usize)
    }
}

impl fmt::Debug for TlbEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(
                f,
                "TlbEntry({} -> {}, {:?})",
                self.page(),
                self.frame(),
                self.flags()
            )
        } else {
            write!(f, "TlbEntry(invalid)")
        }
    }
}

/// Keeps interrupts masked on this processor until dropped.
///
/// Guards nest: each one restores exactly the state it found.
pub struct InterruptGuard {
    saved: arch::InterruptState,
    // Interrupt state is per-processor; the guard must not migrate.
    _not_send: PhantomData<*mut ()>,
}

impl InterruptGuard {
    /// Masks interrupts.
    pub fn new() -> Self {
        Self {
            saved: arch::disable_interrupts(),
            _not_send: PhantomData,
        }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        // SAFETY: `saved` came from the disable call in `new` on this processor.
        unsafe { arch::restore_interrupts(self.saved) }
    }
}

/// Installs `entry` in the TLB.
///
/// A slot already tagged with the same page is overwritten so the TLB never holds two
/// matching entries. Otherwise the first invalid slot is used, and when every slot is
/// valid a pseudo-random victim is evicted; the evicted translation is rebuilt from the
/// page table on its next miss.
pub fn install(entry: TlbEntry) {
    let _guard = InterruptGuard::new();

    let slot = arch::tlb_probe(entry)
        .or_else(|| (0..arch::TLB_ENTRIES).find(|&slot| !arch::tlb_read(slot).is_valid()));

    // SAFETY: Interrupts are masked and the probe above rules out a duplicate tag.
    unsafe {
        match slot {
            Some(slot) => arch::tlb_write(entry, slot),
            None => arch::tlb_random(entry),
        }
    }
}

/// Invalidates every TLB slot.
pub fn invalidate_all() {
    let _guard = InterruptGuard::new();
    for slot in 0..arch::TLB_ENTRIES {
        // SAFETY: Interrupts are masked and invalid tags are unique per slot.
        unsafe { arch::tlb_write(TlbEntry::invalid(slot), slot) };
    }
}

/// Prepares the TLB for a thread being switched in.
///
/// Kernel threads have no address space; for them the previous contents are left in
/// place.
pub fn activate<F: FrameAllocator>(space: Option<&AddressSpace<F>>) {
    if space.is_none() {
        return;
    }
    invalidate_all();
}

/// Purges the TLB for a thread being switched out.
pub fn deactivate() {
    invalidate_all();
}

/// A request from another processor to invalidate translations.
#[derive(Debug, Clone, Copy)]
pub struct Shootdown {
    /// The page the requesting processor wants invalidated.
    pub page: PageNumber,
}

/// Handles a cross-processor invalidation request.
///
/// # Panics
///
/// Always. Address spaces are never shared between processors, so a shootdown means
/// the kernel is running in an unsupported configuration.
pub fn shootdown(request: &Shootdown) -> ! {
    panic!(
        "TLB shootdown requested for {:?}; multiprocessor TLB coherence is not supported",
        request.page
    );
}

/// Returns a copy of every TLB slot.
pub fn snapshot() -> [TlbEntry; arch::TLB_ENTRIES] {
    let _guard = InterruptGuard::new();
    core::array::from_fn(arch::tlb_read)
}

/// Returns the valid entry tagged with `page`, if the TLB holds one.
pub fn lookup(page: PageNumber) -> Option<TlbEntry> {
    let probe = TlbEntry::mapping(page, FrameNumber::new(0), false);
    let _guard = InterruptGuard::new();
    arch::tlb_probe(probe)
        .map(arch::tlb_read)
        .filter(|entry| entry.is_valid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::EmulatedFrameAllocator;

    fn valid_entries() -> usize {
        snapshot().iter().filter(|entry| entry.is_valid()).count()
    }

    #[test]
    fn mapping_layout() {
        let entry = TlbEntry::mapping(PageNumber::new(0x12345), FrameNumber::new(0x678), true);
        assert_eq!(entry.hi(), 0x1234_5000);
        assert_eq!(entry.lo(), 0x0067_8000 | 0x200 | 0x400);
        assert_eq!(entry.page(), PageNumber::new(0x12345));
        assert_eq!(entry.frame(), FrameNumber::new(0x678));
        assert!(entry.is_valid());
        assert!(entry.is_dirty());
    }

    #[test]
    fn clean_mapping_has_no_dirty_bit() {
        let entry = TlbEntry::mapping(PageNumber::new(1), FrameNumber::new(2), false);
        assert_eq!(entry.flags(), EntryFlags::VALID);
    }

    #[test]
    fn invalid_entries_have_distinct_kernel_tags() {
        assert_eq!(TlbEntry::invalid(0).hi(), 0x8000_0000);
        assert_eq!(TlbEntry::invalid(63).hi(), 0x8003_F000);
        assert!(!TlbEntry::invalid(3).is_valid());
    }

    #[test]
    fn install_fills_free_slots_first() {
        invalidate_all();
        for page in 1..=3 {
            install(TlbEntry::mapping(PageNumber::new(page), FrameNumber::new(page), false));
        }
        let slots = snapshot();
        assert_eq!(slots[0].page(), PageNumber::new(1));
        assert_eq!(slots[1].page(), PageNumber::new(2));
        assert_eq!(slots[2].page(), PageNumber::new(3));
    }

    #[test]
    fn install_replaces_matching_tag() {
        invalidate_all();
        install(TlbEntry::mapping(PageNumber::new(4), FrameNumber::new(9), false));
        install(TlbEntry::mapping(PageNumber::new(4), FrameNumber::new(9), true));
        assert_eq!(valid_entries(), 1);
        assert!(lookup(PageNumber::new(4)).unwrap().is_dirty());
    }

    #[test]
    fn install_evicts_when_full() {
        invalidate_all();
        for page in 1..=arch::TLB_ENTRIES {
            install(TlbEntry::mapping(PageNumber::new(page), FrameNumber::new(page), false));
        }
        assert_eq!(valid_entries(), arch::TLB_ENTRIES);

        let extra = PageNumber::new(arch::TLB_ENTRIES + 1);
        install(TlbEntry::mapping(extra, FrameNumber::new(1), false));
        assert_eq!(valid_entries(), arch::TLB_ENTRIES);
        assert!(lookup(extra).is_some());
    }

    #[test]
    fn install_restores_interrupts() {
        assert!(arch::interrupts_enabled());
        install(TlbEntry::mapping(PageNumber::new(1), FrameNumber::new(1), false));
        assert!(arch::interrupts_enabled());

        let outer = InterruptGuard::new();
        install(TlbEntry::mapping(PageNumber::new(2), FrameNumber::new(2), false));
        assert!(!arch::interrupts_enabled());
        drop(outer);
        assert!(arch::interrupts_enabled());
    }

    #[test]
    fn activate_flushes_for_user_threads_only() {
        let frames = EmulatedFrameAllocator::new(4);
        let space = AddressSpace::new(&frames).unwrap();

        install(TlbEntry::mapping(PageNumber::new(5), FrameNumber::new(1), false));
        activate::<&EmulatedFrameAllocator>(None);
        assert!(lookup(PageNumber::new(5)).is_some());

        activate(Some(&space));
        assert_eq!(valid_entries(), 0);
    }

    #[test]
    fn deactivate_flushes() {
        install(TlbEntry::mapping(PageNumber::new(6), FrameNumber::new(1), false));
        deactivate();
        assert_eq!(valid_entries(), 0);
        assert!(arch::interrupts_enabled());
    }

    #[test]
    #[should_panic(expected = "multiprocessor TLB coherence is not supported")]
    fn shootdown_is_fatal() {
        shootdown(&Shootdown {
            page: PageNumber::new(1),
        });
    }
}

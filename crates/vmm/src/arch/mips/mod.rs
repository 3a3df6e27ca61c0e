//! MIPS32 (R3000) architecture-specific implementation.
//!
//! The R3000 has no hardware page-table walker: every TLB miss traps to the kernel,
//! which refills the TLB through coprocessor 0. This module wraps the CP0 registers
//! and TLB instructions the virtual memory subsystem needs.

use core::arch::asm;

use crate::tlb::TlbEntry;

/// Maximum number of bits in a physical address.
pub const MAX_PHYSICAL_BITS: usize = 32;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of TLB slots.
pub const TLB_ENTRIES: usize = 64;

/// First slot the Random register can select.
pub const TLB_RANDOM_FIRST: usize = 8;

/// Current interrupt-enable bit of the CP0 Status register.
const STATUS_IEC: u32 = 1 << 0;

/// Probe-failure bit of the CP0 Index register.
const INDEX_PROBE_FAILED: u32 = 1 << 31;

/// Shift of the slot number within the CP0 Index register.
const INDEX_SHIFT: u32 = 8;

/// Validates a physical address.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr as u64 <= u32::MAX as u64
}

/// Validates a user virtual address.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    addr as u64 <= u32::MAX as u64
}

/// Interrupt state saved by [`disable_interrupts`]: the previous CP0 Status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptState {
    status: u32,
}

fn read_status() -> u32 {
    let status: u32;
    // SAFETY: Reading CP0 Status has no side effects.
    unsafe { asm!("mfc0 {0}, $12", out(reg) status, options(nomem, nostack)) };
    status
}

/// Masks interrupts, returning the previous state.
pub fn disable_interrupts() -> InterruptState {
    let status = read_status();
    // SAFETY: Clearing IEc only masks interrupts on this processor.
    unsafe {
        asm!(
            "mtc0 {0}, $12",
            "nop",
            in(reg) status & !STATUS_IEC,
            options(nostack)
        )
    };
    InterruptState { status }
}

/// Restores the interrupt state saved by [`disable_interrupts`].
///
/// # Safety
///
/// `state` must come from the matching [`disable_interrupts`] call on this processor.
pub unsafe fn restore_interrupts(state: InterruptState) {
    // SAFETY: Writes back a Status value previously read from this processor.
    unsafe {
        asm!(
            "mtc0 {0}, $12",
            "nop",
            in(reg) state.status,
            options(nostack)
        )
    };
}

/// Returns whether interrupts are currently enabled.
pub fn interrupts_enabled() -> bool {
    read_status() & STATUS_IEC != 0
}

/// Reads the entry held in `slot`.
pub fn tlb_read(slot: usize) -> TlbEntry {
    let hi: u32;
    let lo: u32;
    // SAFETY: tlbr only loads EntryHi/EntryLo from the indexed slot.
    unsafe {
        asm!(
            "mtc0 {index}, $0",
            "nop",
            "tlbr",
            "nop",
            "mfc0 {hi}, $10",
            "mfc0 {lo}, $2",
            index = in(reg) (slot as u32) << INDEX_SHIFT,
            hi = out(reg) hi,
            lo = out(reg) lo,
            options(nostack)
        )
    };
    TlbEntry::from_raw(hi, lo)
}

/// Writes `entry` into `slot`.
///
/// # Safety
///
/// Interrupts must be masked, and `entry` must not duplicate the tag of another slot.
pub unsafe fn tlb_write(entry: TlbEntry, slot: usize) {
    // SAFETY: Caller upholds the contract above.
    unsafe {
        asm!(
            "mtc0 {hi}, $10",
            "mtc0 {lo}, $2",
            "mtc0 {index}, $0",
            "nop",
            "tlbwi",
            "nop",
            hi = in(reg) entry.hi(),
            lo = in(reg) entry.lo(),
            index = in(reg) (slot as u32) << INDEX_SHIFT,
            options(nostack)
        )
    };
}

/// Writes `entry` into the slot selected by the Random register.
///
/// # Safety
///
/// Interrupts must be masked, and `entry` must not duplicate the tag of another slot.
pub unsafe fn tlb_random(entry: TlbEntry) {
    // SAFETY: Caller upholds the contract above.
    unsafe {
        asm!(
            "mtc0 {hi}, $10",
            "mtc0 {lo}, $2",
            "nop",
            "tlbwr",
            "nop",
            hi = in(reg) entry.hi(),
            lo = in(reg) entry.lo(),
            options(nostack)
        )
    };
}

/// Returns the slot whose tag matches `entry`, if any.
pub fn tlb_probe(entry: TlbEntry) -> Option<usize> {
    let index: u32;
    // SAFETY: tlbp only updates the Index register.
    unsafe {
        asm!(
            "mtc0 {hi}, $10",
            "nop",
            "tlbp",
            "nop",
            "mfc0 {index}, $0",
            hi = in(reg) entry.hi(),
            index = out(reg) index,
            options(nostack)
        )
    };
    if index & INDEX_PROBE_FAILED != 0 {
        None
    } else {
        Some(((index >> INDEX_SHIFT) as usize) % TLB_ENTRIES)
    }
}

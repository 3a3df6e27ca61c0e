//! Emulated processor state: the TLB slots and the interrupt-enable bit.

use crate::tlb::TlbEntry;

use super::{TLB_ENTRIES, TLB_RANDOM_FIRST};

/// Interrupt state saved by [`disable_interrupts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptState {
    enabled: bool,
}

struct EmulatedCpu {
    tlb: [TlbEntry; TLB_ENTRIES],
    interrupts_enabled: bool,
    /// xorshift state driving `tlb_random`.
    random: u32,
}

impl EmulatedCpu {
    const fn new() -> Self {
        let mut tlb = [TlbEntry::invalid(0); TLB_ENTRIES];
        let mut slot = 0;
        while slot < TLB_ENTRIES {
            tlb[slot] = TlbEntry::invalid(slot);
            slot += 1;
        }
        Self {
            tlb,
            interrupts_enabled: true,
            random: 0x2545_f491,
        }
    }

    fn next_random_slot(&mut self) -> usize {
        let mut x = self.random;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.random = x;
        TLB_RANDOM_FIRST + (x as usize % (TLB_ENTRIES - TLB_RANDOM_FIRST))
    }

    fn assert_masked(&self) {
        assert!(
            !self.interrupts_enabled,
            "TLB written with interrupts enabled"
        );
    }
}

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static CPU: core::cell::RefCell<EmulatedCpu> = const { core::cell::RefCell::new(EmulatedCpu::new()) };
}

#[cfg(not(any(test, feature = "software-emulation")))]
static CPU: spin::Mutex<EmulatedCpu> = spin::Mutex::new(EmulatedCpu::new());

fn with_cpu<R>(f: impl FnOnce(&mut EmulatedCpu) -> R) -> R {
    #[cfg(any(test, feature = "software-emulation"))]
    {
        CPU.with(|cpu| f(&mut cpu.borrow_mut()))
    }

    #[cfg(not(any(test, feature = "software-emulation")))]
    {
        f(&mut CPU.lock())
    }
}

/// Masks interrupts, returning the previous state.
pub fn disable_interrupts() -> InterruptState {
    with_cpu(|cpu| {
        let enabled = cpu.interrupts_enabled;
        cpu.interrupts_enabled = false;
        InterruptState { enabled }
    })
}

/// Restores the interrupt state saved by [`disable_interrupts`].
///
/// # Safety
///
/// `state` must come from the matching [`disable_interrupts`] call on this processor.
pub unsafe fn restore_interrupts(state: InterruptState) {
    with_cpu(|cpu| cpu.interrupts_enabled = state.enabled)
}

/// Returns whether interrupts are currently enabled.
pub fn interrupts_enabled() -> bool {
    with_cpu(|cpu| cpu.interrupts_enabled)
}

/// Reads the entry held in `slot`.
pub fn tlb_read(slot: usize) -> TlbEntry {
    with_cpu(|cpu| cpu.tlb[slot])
}

/// Writes `entry` into `slot`.
///
/// # Safety
///
/// Interrupts must be masked for the duration of the write.
pub unsafe fn tlb_write(entry: TlbEntry, slot: usize) {
    with_cpu(|cpu| {
        cpu.assert_masked();
        cpu.tlb[slot] = entry;
    })
}

/// Writes `entry` into a pseudo-randomly chosen slot.
///
/// # Safety
///
/// Interrupts must be masked for the duration of the write.
pub unsafe fn tlb_random(entry: TlbEntry) {
    with_cpu(|cpu| {
        cpu.assert_masked();
        let slot = cpu.next_random_slot();
        cpu.tlb[slot] = entry;
    })
}

/// Returns the slot whose tag matches `entry`, if any.
pub fn tlb_probe(entry: TlbEntry) -> Option<usize> {
    with_cpu(|cpu| cpu.tlb.iter().position(|slot| slot.hi() == entry.hi()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameNumber, PageNumber};

    #[test]
    fn starts_with_every_slot_invalid() {
        for slot in 0..TLB_ENTRIES {
            assert!(!tlb_read(slot).is_valid());
        }
        assert!(interrupts_enabled());
    }

    #[test]
    fn disable_and_restore_nest() {
        let outer = disable_interrupts();
        let inner = disable_interrupts();
        assert!(!interrupts_enabled());
        unsafe { restore_interrupts(inner) };
        assert!(!interrupts_enabled());
        unsafe { restore_interrupts(outer) };
        assert!(interrupts_enabled());
    }

    #[test]
    #[should_panic(expected = "TLB written with interrupts enabled")]
    fn write_requires_masked_interrupts() {
        let entry = TlbEntry::mapping(PageNumber::new(1), FrameNumber::new(1), false);
        unsafe { tlb_write(entry, 0) };
    }

    #[test]
    fn random_writes_stay_out_of_low_slots() {
        let state = disable_interrupts();
        for page in 1..200 {
            let entry = TlbEntry::mapping(PageNumber::new(page), FrameNumber::new(page), false);
            unsafe { tlb_random(entry) };
        }
        unsafe { restore_interrupts(state) };

        for slot in 0..TLB_RANDOM_FIRST {
            assert!(!tlb_read(slot).is_valid());
        }
        assert!((TLB_RANDOM_FIRST..TLB_ENTRIES).any(|slot| tlb_read(slot).is_valid()));
    }

    #[test]
    fn probe_matches_tag() {
        let entry = TlbEntry::mapping(PageNumber::new(7), FrameNumber::new(3), true);
        let state = disable_interrupts();
        unsafe { tlb_write(entry, 5) };
        unsafe { restore_interrupts(state) };

        assert_eq!(tlb_probe(entry), Some(5));
        let other = TlbEntry::mapping(PageNumber::new(8), FrameNumber::new(3), true);
        assert_eq!(tlb_probe(other), None);
    }
}

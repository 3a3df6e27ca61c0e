//! Injected heap-allocation failures.
//!
//! Page-table and region allocations go through [`should_fail`], which lets tests make
//! the N-th allocation after arming fail as if the kernel heap were exhausted. Frame
//! exhaustion needs no hook: a small emulated frame allocator runs out on its own.
//!
//! The counter is per thread, so concurrently running tests do not interfere.

use core::cell::Cell;

std::thread_local! {
    static DENY_AFTER: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Lets `successes` allocations through, then fails the next one.
///
/// The failpoint disarms itself after firing once.
pub fn deny_allocation_after(successes: usize) {
    DENY_AFTER.with(|deny| deny.set(Some(successes)));
}

/// Fails the next allocation.
pub fn deny_next_allocation() {
    deny_allocation_after(0);
}

/// Disarms the failpoint.
pub fn clear() {
    DENY_AFTER.with(|deny| deny.set(None));
}

/// Consumes one allocation from the armed budget, returning true if it must fail.
pub(crate) fn should_fail() -> bool {
    DENY_AFTER.with(|deny| match deny.get() {
        None => false,
        Some(0) => {
            deny.set(None);
            true
        }
        Some(remaining) => {
            deny.set(Some(remaining - 1));
            false
        }
    })
}

//! Errors reported by the virtual memory subsystem.

use core::fmt;

use crate::frame::AllocError;

/// Errors returned by address-space operations and the fault handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// A frame, page table or region allocation could not be satisfied.
    OutOfMemory,
    /// Null dereference, access outside every region, or a store through a read-only
    /// translation. Fatal to the faulting process.
    AccessFault,
    /// An operation that needs an address space was handed none, or the trap layer
    /// passed an unknown fault code.
    InvalidArgument,
}

impl VmError {
    /// Returns the kernel error number reported to the system-call layer.
    pub const fn errno(self) -> i32 {
        match self {
            VmError::OutOfMemory => 3,
            VmError::AccessFault => 6,
            VmError::InvalidArgument => 8,
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::OutOfMemory => write!(f, "out of memory"),
            VmError::AccessFault => write!(f, "bad memory reference"),
            VmError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

impl From<AllocError> for VmError {
    fn from(_: AllocError) -> Self {
        VmError::OutOfMemory
    }
}

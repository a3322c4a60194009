//! Error types for the virtual-memory core.

use core::fmt;

/// Permission class a fault was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
    Execute,
}

/// Result alias used throughout the VM core.
pub type Result<T> = core::result::Result<T, VmError>;

/// Main error type for the VM core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "vm errors must be handled, not silently discarded"]
pub enum VmError {
    /// No current process/address-space, or fault outside any region.
    Unmapped { addr: usize },
    /// Fault violated the region's declared permissions.
    PermissionDenied { addr: usize, perm: Permission },
    /// Caller passed a malformed argument (bad fault type, null AS, ...).
    InvalidArgument { reason: &'static str },
    /// Frame table empty, HPT full, or a backing allocation failed.
    OutOfMemory { requested_frames: usize },
    /// Programmer error: double-free, free outside KSEG0, cross-CPU
    /// shootdown request. Never surfaced to userspace.
    Bug { detail: &'static str },
}

impl VmError {
    /// Map to the POSIX-style integer codes named in the external interface.
    pub fn as_errno(&self) -> i32 {
        match self {
            VmError::Unmapped { .. } => EFAULT,
            VmError::PermissionDenied { .. } => EFAULT,
            VmError::InvalidArgument { .. } => EINVAL,
            VmError::OutOfMemory { .. } => ENOMEM,
            VmError::Bug { .. } => EFAULT,
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::Unmapped { addr } => write!(f, "unmapped address {addr:#x}"),
            VmError::PermissionDenied { addr, perm } => {
                write!(f, "permission {perm:?} denied at {addr:#x}")
            }
            VmError::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            VmError::OutOfMemory { requested_frames } => {
                write!(f, "out of memory: requested {requested_frames} frame(s)")
            }
            VmError::Bug { detail } => write!(f, "vm core bug: {detail}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VmError {}

/// Address unmapped or no current address space.
pub const EFAULT: i32 = 14;
/// Invalid argument.
pub const EINVAL: i32 = 22;
/// Out of memory.
pub const ENOMEM: i32 = 12;

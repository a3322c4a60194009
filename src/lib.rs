//! Virtual-memory core of a teaching operating-system kernel targeting a
//! MIPS-like processor with a software-managed TLB.
//!
//! This crate is the frame table, hashed page table, address space, and
//! fault handler that back it. It has no bootable binary of its own: the
//! host kernel owns a [`mm::VmSubsystem`], implements the
//! [`arch::RamBackend`]/[`arch::TlbWriter`]/[`arch::CurrentAddressSpace`]
//! traits over its real hardware, and drives `vm_fault` from its TLB-miss
//! exception handler.

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod arch;
pub mod error;
pub mod mm;
pub mod raii;
pub mod sync;

pub use arch::{PAGE_FRAME, PAGE_SIZE, STACK_PAGES, USERSTACK};
pub use error::{Result, VmError};
pub use mm::{AddressSpaceId, FaultKind, FrameNumber, VmSubsystem};

//! Locking primitives used by the VM core.
//!
//! Every structure in this crate is guarded by a single [`spin::Mutex`],
//! used both for the frame table's non-sleeping spinlock and, as a
//! deliberate narrowing, in place of the HPT's sleeping lock — this crate
//! never blocks a real OS thread inside it in its freestanding, host-test
//! setting, so the two are the same primitive here. The lock-acquisition
//! order relative to the frame-table lock is still preserved exactly.

pub use spin::{Mutex, MutexGuard};

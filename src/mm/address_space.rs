//! Per-process address space: an insertion-ordered, singly linked list of
//! [`Region`]s.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::boxed::Box;

use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::{CurrentAddressSpace, TlbWriter, PAGE_SIZE, STACK_PAGES, USERSTACK};
use crate::error::{Result, VmError};
use crate::mm::region::Region;

/// A stable, collision-proof identity for an address space: a
/// monotonically issued counter, so a freed AS can never alias a live one
/// at the same memory address the way a raw pointer identity could.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpaceId(u64);

static NEXT_ADDRESS_SPACE_ID: AtomicU64 = AtomicU64::new(1);

impl AddressSpaceId {
    fn next() -> Self {
        Self(NEXT_ADDRESS_SPACE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub fn from_raw(n: u64) -> Self {
        Self(n)
    }
}

/// A process's virtual address space: its region list and identity.
///
/// Frames and HPT entries belonging to this address space live in the
/// [`crate::mm::VmSubsystem`] that created it — an `AddressSpace` value by
/// itself only ever grows or inspects its own region list.
pub struct AddressSpace {
    pub id: AddressSpaceId,
    regions: Option<Box<Region>>,
    /// Best-effort region counter, incremented only when appending to a
    /// non-empty list — no caller depends on its exact value.
    region_count: usize,
}

impl AddressSpace {
    /// An empty address space with no regions.
    pub fn create() -> Self {
        Self {
            id: AddressSpaceId::next(),
            regions: None,
            region_count: 0,
        }
    }

    pub fn region_count(&self) -> usize {
        self.region_count
    }

    pub fn regions(&self) -> RegionIter<'_> {
        RegionIter {
            next: self.regions.as_deref(),
        }
    }

    /// Page-align `vaddr` down, round `size` up, and append a new region
    /// at the tail of the list. No frames are allocated — pages are bound
    /// lazily on first fault.
    pub fn define_region(
        &mut self,
        vaddr: usize,
        size: usize,
        readable: bool,
        writeable: bool,
        executable: bool,
    ) -> Result<()> {
        if size == 0 {
            return Err(VmError::InvalidArgument {
                reason: "zero-size region",
            });
        }
        let vbase = vaddr & !(PAGE_SIZE - 1);
        let extra = vaddr - vbase;
        let npages = (size + extra + PAGE_SIZE - 1) / PAGE_SIZE;

        let new_region = Box::new(Region {
            vbase,
            npages,
            readable,
            writeable,
            executable,
            prepare_load_recover: false,
            next: None,
        });

        match self.regions.take() {
            None => {
                self.regions = Some(new_region);
                // count is not incremented on the empty-list branch.
            }
            Some(mut head) => {
                let mut cur = &mut head;
                while let Some(next) = cur.next.as_mut() {
                    cur = next;
                }
                cur.next = Some(new_region);
                self.regions = Some(head);
                self.region_count += 1;
            }
        }
        log::debug!(
            "as {:?}: defined region [{vbase:#x}, {:#x})",
            self.id,
            vbase + npages * PAGE_SIZE
        );
        Ok(())
    }

    /// Locate the region containing `vaddr`, if any, by linear scan.
    pub fn find_region(&self, vaddr: usize) -> Option<&Region> {
        let mut cur = self.regions.as_deref();
        while let Some(region) = cur {
            if region.contains(vaddr) {
                return Some(region);
            }
            cur = region.next.as_deref();
        }
        None
    }

    /// Locate the region containing `vaddr`, mutably.
    pub fn find_region_mut(&mut self, vaddr: usize) -> Option<&mut Region> {
        let mut cur = self.regions.as_deref_mut();
        while let Some(region) = cur {
            if region.contains(vaddr) {
                return Some(region);
            }
            cur = region.next.as_deref_mut();
        }
        None
    }

    /// Relax every non-writeable region's permission for the duration of
    /// program load; records which were touched via `prepare_load_recover`.
    pub fn prepare_load(&mut self) {
        let mut cur = self.regions.as_deref_mut();
        while let Some(region) = cur {
            if !region.writeable {
                region.writeable = true;
                region.prepare_load_recover = true;
            }
            cur = region.next.as_deref_mut();
        }
    }

    /// Restore every region relaxed by `prepare_load`.
    pub fn complete_load(&mut self) {
        let mut cur = self.regions.as_deref_mut();
        while let Some(region) = cur {
            if region.prepare_load_recover {
                region.writeable = false;
                region.prepare_load_recover = false;
            }
            cur = region.next.as_deref_mut();
        }
    }

    /// Define the user stack region, returning the initial stack pointer.
    pub fn define_stack(&mut self) -> Result<usize> {
        let vbase = USERSTACK - STACK_PAGES * PAGE_SIZE;
        self.define_region(vbase, STACK_PAGES * PAGE_SIZE, true, true, true)?;
        Ok(USERSTACK)
    }

    /// Take ownership of the region list, leaving this address space empty.
    /// Used by [`crate::mm::VmSubsystem::destroy`] to walk-and-free.
    pub(crate) fn take_regions(&mut self) -> Option<Box<Region>> {
        self.region_count = 0;
        self.regions.take()
    }
}

pub struct RegionIter<'a> {
    next: Option<&'a Region>,
}

impl<'a> Iterator for RegionIter<'a> {
    type Item = &'a Region;

    fn next(&mut self) -> Option<Self::Item> {
        let region = self.next?;
        self.next = region.next.as_deref();
        Some(region)
    }
}

/// Invalidate every TLB entry on the current CPU. A kernel thread with no
/// current address space leaves the TLB untouched.
pub fn activate(current: &impl CurrentAddressSpace, tlb: &mut impl TlbWriter) {
    if current.current().is_some() {
        tlb.invalidate_all();
    }
}

/// Deactivating an address space invalidates the TLB the same way
/// activating a new one does, so this just delegates to [`activate`].
pub fn deactivate(current: &impl CurrentAddressSpace, tlb: &mut impl TlbWriter) {
    activate(current, tlb);
}

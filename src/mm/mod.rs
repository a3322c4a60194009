//! Virtual memory core: frame table, hashed page table, address spaces,
//! and the fault handler that binds them together.
//!
//! [`VmSubsystem`] is the single value that owns the frame table and HPT,
//! rather than scattering them across process-wide globals.

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod address_space;
pub mod fault;
pub mod frame_table;
pub mod hpt;
pub mod region;

use crate::arch::{RamBackend, PAGE_SIZE};
use crate::error::Result;
use crate::mm::address_space::AddressSpace;
use crate::mm::frame_table::FrameTable;
use crate::mm::hpt::Hpt;
use crate::sync::Mutex;

pub use address_space::AddressSpaceId;
pub use fault::FaultKind;
pub use frame_table::FrameNumber;

/// Owns the frame table and HPT for the lifetime of the kernel. Constructed
/// exactly once, via [`VmSubsystem::bootstrap`].
pub struct VmSubsystem {
    pub(crate) frame_table: Mutex<FrameTable>,
    pub(crate) hpt: Mutex<Hpt>,
}

impl VmSubsystem {
    /// Initialize the HPT, then the frame table, in that order — the HPT
    /// must claim its own backing storage first so its memory is pinned
    /// below `free_ram_frame_start_index`.
    ///
    /// The HPT and frame-table arrays are heap-allocated (via the host
    /// global allocator) rather than bump-allocated from `ram`, so this
    /// ordering no longer has a direct physical-memory-layout consequence —
    /// it is preserved anyway since a future `no_std`/no-global-allocator
    /// backend would need it for real.
    pub fn bootstrap<R: RamBackend>(ram: &mut R) -> Self {
        let total_frames = ram.ram_getsize() / PAGE_SIZE;
        let hpt = Hpt::bootstrap(total_frames);
        let frame_table = FrameTable::bootstrap(ram);
        log::debug!("vm_bootstrap: hpt before frame_table, {total_frames} total frames");
        Self {
            frame_table: Mutex::new(frame_table),
            hpt: Mutex::new(hpt),
        }
    }

    /// Deep-clone `old`'s region list and, for each already-mapped page,
    /// allocate a fresh frame, copy its contents, and insert a new HPT
    /// entry under `new`'s identity. Unmapped pages stay unmapped (they
    /// fault in on demand under the new address space).
    pub fn copy<R: RamBackend>(&self, old: &AddressSpace, ram: &mut R) -> Result<AddressSpace> {
        let mut new_as = AddressSpace::create();

        for region in old.regions() {
            new_as.define_region(
                region.vbase,
                region.npages * PAGE_SIZE,
                region.readable,
                region.writeable,
                region.executable,
            )?;
            if region.prepare_load_recover {
                // define_region always starts a region un-relaxed; restore
                // the flag here so a load in progress at fork time stays
                // in progress in the child.
                if let Some(new_region) = new_as.find_region_mut(region.vbase) {
                    new_region.prepare_load_recover = true;
                }
            }
        }

        for region in old.regions() {
            for i in 0..region.npages {
                let vpn = region.vbase + i * PAGE_SIZE;
                let Some(old_entry) = self.hpt.lock().lookup(old.id, vpn) else {
                    continue;
                };

                let new_frame = match self.frame_table.lock().alloc_frame() {
                    Ok(f) => f,
                    Err(e) => {
                        self.destroy(&mut new_as, ram);
                        return Err(e);
                    }
                };
                ram.copy_frame(old_entry.pfn() * PAGE_SIZE, new_frame.paddr());

                if let Err(e) = self.hpt.lock().insert(
                    new_as.id,
                    vpn,
                    new_frame.as_usize(),
                    true,
                    region.writeable,
                    true,
                ) {
                    self.frame_table.lock().free_frame(new_frame);
                    self.destroy(&mut new_as, ram);
                    return Err(e);
                }
            }
        }

        Ok(new_as)
    }

    /// Walk every region, freeing the backing frame and deleting the HPT
    /// entry for each mapped page, then drop the region list and reset the
    /// address space to empty.
    pub fn destroy<R: RamBackend>(&self, as_: &mut AddressSpace, _ram: &mut R) {
        let mut cur = as_.take_regions();
        while let Some(mut region) = cur {
            for i in 0..region.npages {
                let vpn = region.vbase + i * PAGE_SIZE;
                if let Some(entry) = self.hpt.lock().lookup(as_.id, vpn) {
                    self.frame_table
                        .lock()
                        .free_frame(FrameNumber(entry.pfn()));
                }
                self.hpt.lock().delete(as_.id, vpn);
            }
            cur = region.next.take();
            // `region` (and the just-taken `next`) drop here, freeing the
            // record itself in head-to-tail order, walked iteratively to
            // avoid recursing one stack frame per region.
        }
    }

    /// Total free frames — used by the S5 "destroy frees everything" test.
    pub fn free_frame_count(&self) -> usize {
        self.frame_table.lock().free_count()
    }

    /// Look up the physical frame number backing `(as_, vaddr)`, if mapped.
    ///
    /// A thin, read-only wrapper over the HPT lookup primitive used by
    /// `vm_fault` itself — exposed publicly so callers (and tests) can
    /// inspect mapping state without reaching into private fields.
    pub fn lookup_mapping(&self, as_: &AddressSpace, vaddr: usize) -> Option<usize> {
        self.hpt.lock().lookup(as_.id, vaddr).map(|e| e.pfn())
    }

    /// Allocate `npages` zero-filled kernel pages, returning a
    /// kernel-virtual address. The host kernel's general-purpose `kmalloc`
    /// (or equivalent) is expected to call through this rather than the
    /// frame table directly.
    pub fn alloc_kpages<R: RamBackend>(&self, ram: &mut R, npages: usize) -> Result<usize> {
        frame_table::alloc_kpages(&self.frame_table, ram, npages)
    }

    /// Release a kernel-virtual address previously returned by
    /// [`VmSubsystem::alloc_kpages`].
    pub fn free_kpages(&self, kvaddr: usize) {
        frame_table::free_kpages(&self.frame_table, kvaddr)
    }

    /// Bump-allocate pages before a `VmSubsystem` exists yet. The caller
    /// owns `stealmem_lock` since, this early in boot, no `VmSubsystem`
    /// has been constructed to own it itself.
    pub fn alloc_kpages_early<R: RamBackend>(
        stealmem_lock: &Mutex<()>,
        ram: &mut R,
        npages: usize,
    ) -> Option<usize> {
        frame_table::alloc_kpages_early(stealmem_lock, ram, npages)
    }
}

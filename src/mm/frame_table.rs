//! Physical frame ownership: a sorted singly-linked free list over a flat
//! array of per-frame entries.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use crate::arch::{paddr_to_kvaddr, reject_multi_page, RamBackend, PAGE_SIZE};
use crate::error::{Result, VmError};
use crate::sync::Mutex;

/// A physical frame number (an index into the frame table, not a byte
/// address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(pub usize);

impl FrameNumber {
    pub fn as_usize(self) -> usize {
        self.0
    }

    pub fn paddr(self) -> usize {
        self.0 * PAGE_SIZE
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameTableEntry {
    in_use: bool,
    next_free: Option<usize>,
}

/// Owns every physical frame above `free_ram_frame_start_index` and hands
/// them out zero-filled.
pub struct FrameTable {
    entries: Vec<FrameTableEntry>,
    lowest_free: Option<usize>,
    free_ram_frame_start_index: usize,
}

impl FrameTable {
    /// Initialize the frame table from a live [`RamBackend`].
    ///
    /// Must be called after the HPT has claimed its own backing storage —
    /// callers go through [`crate::mm::VmSubsystem::bootstrap`] rather than
    /// this directly.
    pub fn bootstrap<R: RamBackend>(ram: &R) -> Self {
        let page_number = ram.ram_getsize() / PAGE_SIZE;
        let free_ram_frame_start_index = ram.ram_getfirstfree() / PAGE_SIZE;

        let mut entries = Vec::with_capacity(page_number);
        for i in 0..page_number {
            entries.push(FrameTableEntry {
                in_use: i < free_ram_frame_start_index,
                next_free: None,
            });
        }
        for i in free_ram_frame_start_index..page_number {
            entries[i].next_free = if i + 1 < page_number { Some(i + 1) } else { None };
        }
        let lowest_free = if free_ram_frame_start_index < page_number {
            Some(free_ram_frame_start_index)
        } else {
            None
        };

        log::debug!(
            "frame table: {page_number} frames, {free_ram_frame_start_index} reserved"
        );

        Self {
            entries,
            lowest_free,
            free_ram_frame_start_index,
        }
    }

    /// Pop the lowest free frame, marking it in-use. Does not zero-fill —
    /// callers that expose `alloc_kpages` semantics must do that via the
    /// `RamBackend` themselves, since zeroing touches backing storage this
    /// type has no access to.
    pub fn alloc_frame(&mut self) -> Result<FrameNumber> {
        let idx = self.lowest_free.ok_or(VmError::OutOfMemory {
            requested_frames: 1,
        })?;
        debug_assert!(!self.entries[idx].in_use);
        self.entries[idx].in_use = true;
        self.lowest_free = self.entries[idx].next_free.take();
        log::trace!("frame_table: allocated frame {idx}");
        Ok(FrameNumber(idx))
    }

    /// Splice a frame back into the free list in sorted position.
    ///
    /// Freeing an index below the reserved prefix, outside the table, or
    /// already free is a programming error and a silent no-op — logged but
    /// not propagated, since a panic here would take down a fault handler
    /// that could otherwise make progress.
    pub fn free_frame(&mut self, frame: FrameNumber) {
        let idx = frame.as_usize();
        if idx < self.free_ram_frame_start_index || idx >= self.entries.len() {
            log::warn!("frame_table: refusing to free out-of-range frame {idx}");
            return;
        }
        if !self.entries[idx].in_use {
            log::warn!("frame_table: refusing to double-free frame {idx}");
            return;
        }

        match self.lowest_free {
            None => {
                self.entries[idx].in_use = false;
                self.entries[idx].next_free = None;
                self.lowest_free = Some(idx);
            }
            Some(head) if idx < head => {
                self.entries[idx].in_use = false;
                self.entries[idx].next_free = Some(head);
                self.lowest_free = Some(idx);
            }
            Some(_) => {
                self.entries[idx].in_use = false;

                let mut pred = None;
                let mut i = idx;
                while i > self.free_ram_frame_start_index {
                    i -= 1;
                    if !self.entries[i].in_use {
                        pred = Some(i);
                        break;
                    }
                }
                let pred = match pred {
                    Some(p) => p,
                    None => {
                        log::warn!("frame_table: free_frame {idx}: free list corrupt, no predecessor found");
                        return;
                    }
                };

                let mut succ = None;
                let mut j = idx + 1;
                while j < self.entries.len() {
                    if !self.entries[j].in_use {
                        succ = Some(j);
                        break;
                    }
                    j += 1;
                }

                self.entries[idx].next_free = succ;
                self.entries[pred].next_free = Some(idx);
            }
        }
        log::trace!("frame_table: freed frame {idx}");
    }

    /// Total number of frames at/above the reserved prefix currently on
    /// the free list. Exposed for the S5 "destroy frees everything" test.
    pub fn free_count(&self) -> usize {
        let mut count = 0;
        let mut cur = self.lowest_free;
        while let Some(idx) = cur {
            count += 1;
            cur = self.entries[idx].next_free;
        }
        count
    }
}

/// Allocate `npages` zero-filled pages, returning a kernel-virtual address.
///
/// `npages != 1` fails: this allocator only ever hands out single frames.
pub fn alloc_kpages<R: RamBackend>(
    table: &Mutex<FrameTable>,
    ram: &mut R,
    npages: usize,
) -> Result<usize> {
    reject_multi_page(npages)?;
    let frame = table.lock().alloc_frame()?;
    ram.zero_frame(frame.paddr());
    Ok(paddr_to_kvaddr(frame.paddr()))
}

/// Release a kernel-virtual address previously returned by [`alloc_kpages`].
pub fn free_kpages(table: &Mutex<FrameTable>, kvaddr: usize) {
    match crate::arch::kvaddr_to_paddr(kvaddr) {
        Some(paddr) => table.lock().free_frame(FrameNumber(paddr / PAGE_SIZE)),
        None => log::warn!("free_kpages: {kvaddr:#x} is outside KSEG0"),
    }
}

/// Bump-allocate pages before the frame table exists, under a dedicated
/// spinlock.
pub fn alloc_kpages_early<R: RamBackend>(
    stealmem_lock: &Mutex<()>,
    ram: &mut R,
    npages: usize,
) -> Option<usize> {
    let _guard = stealmem_lock.lock();
    let paddr = ram.ram_stealmem(npages)?;
    Some(paddr_to_kvaddr(paddr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::SimRamBackend;

    fn fresh_table(frames: usize, reserved: usize) -> (FrameTable, SimRamBackend) {
        let ram = SimRamBackend::new(frames * PAGE_SIZE, reserved * PAGE_SIZE);
        let table = FrameTable::bootstrap(&ram);
        (table, ram)
    }

    #[test]
    fn bootstrap_reserves_prefix() {
        let (table, _ram) = fresh_table(8, 3);
        assert_eq!(table.free_count(), 5);
    }

    #[test]
    fn alloc_pops_ascending() {
        let (mut table, _ram) = fresh_table(8, 3);
        let a = table.alloc_frame().expect("frame available");
        let b = table.alloc_frame().expect("frame available");
        assert_eq!(a, FrameNumber(3));
        assert_eq!(b, FrameNumber(4));
        assert_eq!(table.free_count(), 3);
    }

    #[test]
    fn free_reinserts_in_sorted_position() {
        let (mut table, _ram) = fresh_table(8, 3);
        let a = table.alloc_frame().unwrap();
        let b = table.alloc_frame().unwrap();
        let c = table.alloc_frame().unwrap();
        table.free_frame(b);
        // lowest_free should now be b (4), then c's predecessor unaffected
        let reused = table.alloc_frame().unwrap();
        assert_eq!(reused, b);
        let _ = (a, c);
    }

    #[test]
    fn double_free_is_a_noop() {
        let (mut table, _ram) = fresh_table(8, 3);
        let a = table.alloc_frame().unwrap();
        table.free_frame(a);
        let before = table.free_count();
        table.free_frame(a);
        assert_eq!(table.free_count(), before);
    }

    #[test]
    fn exhaustion_returns_out_of_memory() {
        let (mut table, _ram) = fresh_table(2, 2);
        assert!(matches!(
            table.alloc_frame(),
            Err(VmError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn alloc_kpages_zero_fills() {
        let (table, mut ram) = fresh_table(4, 1);
        let lock = Mutex::new(table);
        let kvaddr = alloc_kpages(&lock, &mut ram, 1).expect("alloc succeeds");
        let paddr = crate::arch::kvaddr_to_paddr(kvaddr).unwrap();
        let mut buf = [0xFFu8; PAGE_SIZE];
        ram.read_frame(paddr, &mut buf);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn alloc_kpages_rejects_multi_page() {
        let (table, mut ram) = fresh_table(4, 1);
        let lock = Mutex::new(table);
        assert!(matches!(
            alloc_kpages(&lock, &mut ram, 2),
            Err(VmError::OutOfMemory { .. })
        ));
    }
}

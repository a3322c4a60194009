//! Inverted (hashed) page table: `(AddressSpaceId, VPN) -> (PFN, flags)`
//! with external chaining.

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::vec;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use crate::arch::{pack_entry_lo, HPT_SIZE_FACTOR, PAGE_FRAME, TLBLO_VALID};
use crate::error::{Result, VmError};
use crate::mm::address_space::AddressSpaceId;

#[derive(Debug, Clone, Copy)]
struct HptSlot {
    /// `None` marks an empty slot, expressed directly instead of via a
    /// magic identity value.
    pid: Option<AddressSpaceId>,
    vpn: usize,
    pfn_word: u32,
    next: Option<usize>,
}

impl HptSlot {
    const EMPTY: HptSlot = HptSlot {
        pid: None,
        vpn: 0,
        pfn_word: 0,
        next: None,
    };

    fn is_empty(&self) -> bool {
        self.pid.is_none()
    }
}

/// A live mapping returned by [`Hpt::lookup`].
#[derive(Debug, Clone, Copy)]
pub struct HptEntry {
    pub vpn: usize,
    pfn_word: u32,
}

impl HptEntry {
    pub fn pfn(&self) -> usize {
        (self.pfn_word >> 12) as usize
    }

    /// The packed TLB entry-low word, ready to write to a TLB slot.
    pub fn entry_lo(&self) -> u32 {
        self.pfn_word
    }
}

pub struct Hpt {
    slots: Vec<HptSlot>,
}

impl Hpt {
    /// Size the table to `HPT_SIZE_FACTOR * total_frames` slots and
    /// initialize every slot empty.
    pub fn bootstrap(total_frames: usize) -> Self {
        let size = (HPT_SIZE_FACTOR * total_frames).max(1);
        log::debug!("hpt: {size} slots for {total_frames} frames");
        Self {
            slots: vec![HptSlot::EMPTY; size],
        }
    }

    fn hash(&self, pid: AddressSpaceId, vpn: usize) -> usize {
        ((pid.as_u64() as usize) ^ vpn) % self.slots.len()
    }

    /// Walk the chain anchored at `hash(pid, vpn)`, returning the first
    /// entry matching `(pid, vpn)` whose `VALID` bit is set.
    pub fn lookup(&self, pid: AddressSpaceId, vpn: usize) -> Option<HptEntry> {
        let vpn = vpn & PAGE_FRAME;
        let mut cur = Some(self.hash(pid, vpn));
        while let Some(idx) = cur {
            let slot = &self.slots[idx];
            if slot.pid == Some(pid) && slot.vpn == vpn && (slot.pfn_word & TLBLO_VALID) != 0 {
                return Some(HptEntry {
                    vpn: slot.vpn,
                    pfn_word: slot.pfn_word,
                });
            }
            cur = slot.next;
        }
        None
    }

    /// Insert `(pid, vpn, pfn)`. Precondition: callers must `lookup` first
    /// — inserting a duplicate `(pid, vpn)` is undefined by this API.
    pub fn insert(
        &mut self,
        pid: AddressSpaceId,
        vpn: usize,
        pfn: usize,
        cache: bool,
        dirty: bool,
        valid: bool,
    ) -> Result<HptEntry> {
        let vpn = vpn & PAGE_FRAME;
        let pfn_word = pack_entry_lo(pfn, cache, dirty, valid);
        let anchor = self.hash(pid, vpn);

        if self.slots[anchor].is_empty() {
            self.slots[anchor] = HptSlot {
                pid: Some(pid),
                vpn,
                pfn_word,
                next: None,
            };
            log::trace!("hpt: insert (pid={pid:?}, vpn={vpn:#x}) at anchor {anchor}");
            return Ok(HptEntry { vpn, pfn_word });
        }

        let mut tail = anchor;
        while let Some(next) = self.slots[tail].next {
            tail = next;
        }

        let Some(empty) = (0..self.slots.len()).find(|&i| self.slots[i].is_empty()) else {
            log::warn!("hpt: table full, cannot insert (pid={pid:?}, vpn={vpn:#x})");
            return Err(VmError::OutOfMemory { requested_frames: 0 });
        };

        self.slots[empty] = HptSlot {
            pid: Some(pid),
            vpn,
            pfn_word,
            next: None,
        };
        self.slots[tail].next = Some(empty);
        log::trace!("hpt: insert (pid={pid:?}, vpn={vpn:#x}) chained at {empty}");
        Ok(HptEntry { vpn, pfn_word })
    }

    /// Delete `(pid, vpn)`. Not-found is silently a success.
    pub fn delete(&mut self, pid: AddressSpaceId, vpn: usize) {
        let vpn = vpn & PAGE_FRAME;
        let anchor = self.hash(pid, vpn);

        if self.slots[anchor].is_empty() {
            return;
        }

        if self.slots[anchor].pid == Some(pid) && self.slots[anchor].vpn == vpn {
            match self.slots[anchor].next {
                Some(next) => {
                    self.slots[anchor] = self.slots[next];
                    self.slots[next] = HptSlot::EMPTY;
                }
                None => {
                    self.slots[anchor] = HptSlot::EMPTY;
                }
            }
            log::trace!("hpt: deleted (pid={pid:?}, vpn={vpn:#x}) at anchor {anchor}");
            return;
        }

        let mut prev = anchor;
        let mut cur = self.slots[anchor].next;
        while let Some(idx) = cur {
            if self.slots[idx].pid == Some(pid) && self.slots[idx].vpn == vpn {
                self.slots[prev].next = self.slots[idx].next;
                self.slots[idx] = HptSlot::EMPTY;
                log::trace!("hpt: deleted (pid={pid:?}, vpn={vpn:#x}) mid-chain at {idx}");
                return;
            }
            prev = idx;
            cur = self.slots[idx].next;
        }
    }

    /// `true` if no live slot still carries `pid`. Used by the AS-destroy
    /// tests to confirm no mapping survives teardown.
    #[cfg(test)]
    pub fn has_any(&self, pid: AddressSpaceId) -> bool {
        self.slots.iter().any(|s| s.pid == Some(pid))
    }
}

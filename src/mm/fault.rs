//! The sole entry point that binds virtual pages to frames on a TLB miss.

use crate::arch::{RamBackend, TlbWriter, PAGE_FRAME};
use crate::error::{Permission, Result, VmError};
use crate::mm::address_space::AddressSpace;
use crate::mm::VmSubsystem;
use crate::raii::FrameGuard;

/// The reason the hardware raised a TLB fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Attempted write to a frame the hardware marked read-only. Always a
    /// program error in this kernel (every writeable page is mapped
    /// hardware-writeable), so this is never recoverable.
    ReadOnly,
    Read,
    Write,
    /// Any fault-type code this kernel does not recognize.
    Other,
}

impl VmSubsystem {
    /// Resolve `(faulttype, faultaddress)` to a mapped, TLB-resident page.
    pub fn vm_fault<R: RamBackend, T: TlbWriter>(
        &self,
        current_as: Option<&AddressSpace>,
        kind: FaultKind,
        faultaddress: usize,
        ram: &mut R,
        tlb: &mut T,
    ) -> Result<()> {
        let Some(current_as) = current_as else {
            return Err(VmError::Unmapped { addr: faultaddress });
        };

        let vpn = faultaddress & PAGE_FRAME;

        let region = current_as
            .find_region(vpn)
            .ok_or(VmError::Unmapped { addr: faultaddress })?;

        let writeable = match kind {
            FaultKind::ReadOnly => {
                return Err(VmError::PermissionDenied {
                    addr: faultaddress,
                    perm: Permission::Write,
                });
            }
            FaultKind::Read => {
                if !region.readable {
                    return Err(VmError::PermissionDenied {
                        addr: faultaddress,
                        perm: Permission::Read,
                    });
                }
                region.writeable
            }
            FaultKind::Write => {
                if !region.writeable {
                    return Err(VmError::PermissionDenied {
                        addr: faultaddress,
                        perm: Permission::Write,
                    });
                }
                region.writeable
            }
            FaultKind::Other => {
                return Err(VmError::InvalidArgument {
                    reason: "unrecognized fault type",
                });
            }
        };

        // Step 5: HPT lookup. The lock is released (scope ends) before any
        // frame allocation — the frame-table lock is never taken while
        // holding the HPT lock.
        {
            let hpt = self.hpt.lock();
            if let Some(entry) = hpt.lookup(current_as.id, vpn) {
                tlb.write_random(vpn as u32, entry.entry_lo());
                return Ok(());
            }
        }

        // Step 6: allocate a zero-filled frame, guarded so an early return
        // frees it back to the frame table automatically.
        let guard = FrameGuard::new(self.frame_table.lock().alloc_frame()?, &self.frame_table);
        ram.zero_frame(guard.paddr());

        // Step 7: insert the HPT entry. A failed insert frees the frame via
        // the guard's drop instead of leaking it.
        let entry = self
            .hpt
            .lock()
            .insert(current_as.id, vpn, guard.as_usize(), true, writeable, true)?;
        guard.leak();

        // Step 8: write the new entry to a random TLB slot.
        tlb.write_random(vpn as u32, entry.entry_lo());
        Ok(())
    }
}

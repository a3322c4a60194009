//! Integration-level scenario tests (S1-S6) against the public
//! `VmSubsystem` API, exercised through the host-only simulated RAM and
//! recording TLB.

use mvm_core::arch::sim::{InMemoryCurrentAs, RecordingTlb, SimRamBackend};
use mvm_core::arch::PAGE_SIZE;
use mvm_core::mm::address_space::AddressSpace;
use mvm_core::{FaultKind, VmError, VmSubsystem};

fn boot(frames: usize) -> (VmSubsystem, SimRamBackend) {
    let mut ram = SimRamBackend::new(frames * PAGE_SIZE, 0);
    let vm = VmSubsystem::bootstrap(&mut ram);
    (vm, ram)
}

#[test]
fn s1_first_fault_allocates_and_maps() {
    let (vm, mut ram) = boot(8);
    let mut as1 = AddressSpace::create();
    as1.define_region(0x400000, 4 * PAGE_SIZE, true, true, true)
        .unwrap();
    let mut tlb = RecordingTlb::default();

    vm.vm_fault(Some(&as1), FaultKind::Read, 0x400100, &mut ram, &mut tlb)
        .expect("vm_fault returns success");

    let entry = vm
        .lookup_mapping(&as1, 0x400000)
        .expect("hpt lookup finds the mapped page");
    let mut buf = [0xFFu8; PAGE_SIZE];
    ram.read_frame(entry * PAGE_SIZE, &mut buf);
    assert!(buf.iter().all(|&b| b == 0), "frame contents are all-zero");
}

#[test]
fn s2_write_to_read_only_region_faults() {
    let (vm, mut ram) = boot(8);
    let mut as1 = AddressSpace::create();
    as1.define_region(0x10000, PAGE_SIZE, true, false, false)
        .unwrap();
    let mut tlb = RecordingTlb::default();
    let free_before = vm.free_frame_count();

    let result = vm.vm_fault(Some(&as1), FaultKind::Write, 0x10004, &mut ram, &mut tlb);

    assert!(matches!(result, Err(VmError::PermissionDenied { .. })));
    assert!(vm.lookup_mapping(&as1, 0x10000).is_none());
    assert_eq!(vm.free_frame_count(), free_before);
}

#[test]
fn s3_prepare_load_relaxation() {
    let (vm, mut ram) = boot(8);
    let mut as1 = AddressSpace::create();
    as1.define_region(0x10000, PAGE_SIZE, true, false, false)
        .unwrap();
    let mut tlb = RecordingTlb::default();

    as1.prepare_load();
    vm.vm_fault(Some(&as1), FaultKind::Write, 0x10004, &mut ram, &mut tlb)
        .expect("write allowed while load is in progress");

    as1.complete_load();
    let result = vm.vm_fault(Some(&as1), FaultKind::Write, 0x10008, &mut ram, &mut tlb);
    assert!(matches!(result, Err(VmError::PermissionDenied { .. })));
}

#[test]
fn s4_fork_copies_contents_not_frames() {
    let (vm, mut ram) = boot(16);
    let mut a = AddressSpace::create();
    a.define_region(0x400000, PAGE_SIZE, true, true, true).unwrap();
    let mut tlb = RecordingTlb::default();
    vm.vm_fault(Some(&a), FaultKind::Write, 0x400000, &mut ram, &mut tlb)
        .unwrap();

    let a_pfn = vm.lookup_mapping(&a, 0x400000).unwrap();
    let pattern = [0x7Eu8; PAGE_SIZE];
    ram.write_frame(a_pfn * PAGE_SIZE, &pattern);

    let b = vm.copy(&a, &mut ram).expect("fork succeeds");
    let b_pfn = vm.lookup_mapping(&b, 0x400000).unwrap();

    assert_ne!(a_pfn, b_pfn, "fork allocates a distinct frame");

    let mut buf = [0u8; PAGE_SIZE];
    ram.read_frame(b_pfn * PAGE_SIZE, &mut buf);
    assert_eq!(buf, pattern, "the new frame's contents match the original");

    ram.write_frame(b_pfn * PAGE_SIZE, &[0u8; PAGE_SIZE]);
    let mut a_buf = [0u8; PAGE_SIZE];
    ram.read_frame(a_pfn * PAGE_SIZE, &mut a_buf);
    assert_eq!(a_buf, pattern, "mutating the fork leaves the original untouched");
}

#[test]
fn s5_destroy_frees_everything() {
    let (vm, mut ram) = boot(16);
    let f0 = vm.free_frame_count();

    let mut a = AddressSpace::create();
    a.define_region(0x400000, 3 * PAGE_SIZE, true, true, true)
        .unwrap();
    let mut tlb = RecordingTlb::default();
    for page in 0..3 {
        vm.vm_fault(
            Some(&a),
            FaultKind::Write,
            0x400000 + page * PAGE_SIZE,
            &mut ram,
            &mut tlb,
        )
        .unwrap();
    }

    vm.destroy(&mut a, &mut ram);
    assert_eq!(vm.free_frame_count(), f0);
}

#[test]
fn s6_stack_default() {
    let mut as1 = AddressSpace::create();
    let sp = as1.define_stack().unwrap();
    assert_eq!(sp, mvm_core::USERSTACK);
    let region = as1
        .find_region(mvm_core::USERSTACK - 1)
        .expect("stack region exists just below USERSTACK");
    assert_eq!(
        region.vbase,
        mvm_core::USERSTACK - mvm_core::STACK_PAGES * PAGE_SIZE
    );
    assert!(region.readable && region.writeable && region.executable);
}

#[test]
fn round_trip_write_then_read_distinct_addresses() {
    let (vm, mut ram) = boot(8);
    let mut as1 = AddressSpace::create();
    as1.define_region(0x500000, 4 * PAGE_SIZE, true, true, false)
        .unwrap();
    let mut tlb = RecordingTlb::default();

    let addrs = [0x500000usize, 0x501000, 0x502004, 0x503FF0];
    for &addr in &addrs {
        vm.vm_fault(Some(&as1), FaultKind::Write, addr, &mut ram, &mut tlb)
            .unwrap();
        let vpn = addr & mvm_core::PAGE_FRAME;
        let pfn = vm.lookup_mapping(&as1, vpn).unwrap();
        let offset = addr - vpn;
        ram.write_frame(pfn * PAGE_SIZE + offset, &[addr as u8]);
    }
    for &addr in &addrs {
        let vpn = addr & mvm_core::PAGE_FRAME;
        let pfn = vm.lookup_mapping(&as1, vpn).unwrap();
        let offset = addr - vpn;
        let mut byte = [0u8; 1];
        ram.read_frame(pfn * PAGE_SIZE + offset, &mut byte);
        assert_eq!(byte[0], addr as u8);
    }
}

#[test]
fn activate_respects_no_current_as() {
    let current = InMemoryCurrentAs::default();
    let mut tlb = RecordingTlb::default();
    mvm_core::mm::address_space::activate(&current, &mut tlb);
    assert_eq!(tlb.invalidate_count, 0);
}

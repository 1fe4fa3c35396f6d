mod common;

use common::{FailingMap, PAGE, TABLES, TestRam, is_unmapped, leaf, populate, va};
use kernel_alloc::Vmm;
use kernel_cow::{ForkError, LazyAlloc, ZeroFillPager, duplicate, fork_address_space};
use kernel_vmem::{Access, AddressSpace, Permissions};

const SIZE4: u64 = 4 * PAGE as u64;

#[test]
fn writable_pages_become_shared_copy_on_write() {
    let ram = TestRam::with_managed(64);
    let frames = ram.allocator();
    let vmm = Vmm::new(&frames);

    let mut parent = vmm.new_address_space().unwrap();
    populate(&vmm, &mut parent, 4, Permissions::USER_RW);
    let before: Vec<_> = (0..4).map(|i| leaf(&parent, i).frame()).collect();

    let child = fork_address_space(&vmm, &mut parent, SIZE4).unwrap();

    for (i, frame) in (0..4).zip(&before) {
        let p = leaf(&parent, i);
        let c = leaf(&child, i);
        assert_eq!(p.frame(), *frame);
        assert_eq!(c.frame(), *frame);
        assert_eq!(p.permissions().unwrap().access, Access::CopyOnWrite);
        assert_eq!(c.permissions().unwrap().access, Access::CopyOnWrite);
        assert!(!p.bits().writable() && p.bits().copy_on_write());
        assert_eq!(frames.ref_count(frame.base()), 2);
    }

    vmm.destroy(child, SIZE4);
    for frame in &before {
        assert_eq!(frames.ref_count(frame.base()), 1);
    }
    vmm.destroy(parent, SIZE4);
    assert_eq!(frames.free_frames(), frames.total_frames());
}

#[test]
fn read_only_pages_are_shared_untouched() {
    let ram = TestRam::with_managed(64);
    let frames = ram.allocator();
    let vmm = Vmm::new(&frames);

    let mut parent = vmm.new_address_space().unwrap();
    populate(&vmm, &mut parent, 2, Permissions::USER_RX);
    let text = leaf(&parent, 0);

    let child = fork_address_space(&vmm, &mut parent, 2 * PAGE as u64).unwrap();

    assert_eq!(leaf(&parent, 0), text);
    assert_eq!(leaf(&child, 0).permissions(), Ok(Permissions::USER_RX));
    assert_eq!(leaf(&child, 0).frame(), text.frame());
    assert_eq!(frames.ref_count(text.frame().base()), 2);

    vmm.destroy(child, 2 * PAGE as u64);
    vmm.destroy(parent, 2 * PAGE as u64);
    assert_eq!(frames.free_frames(), frames.total_frames());
}

#[test]
fn already_shared_pages_gain_another_reference() {
    let ram = TestRam::with_managed(64);
    let frames = ram.allocator();
    let vmm = Vmm::new(&frames);

    let mut parent = vmm.new_address_space().unwrap();
    populate(&vmm, &mut parent, 1, Permissions::USER_RW);
    let frame = leaf(&parent, 0).frame();

    let mut first = fork_address_space(&vmm, &mut parent, PAGE as u64).unwrap();
    let second = fork_address_space(&vmm, &mut first, PAGE as u64).unwrap();

    assert_eq!(frames.ref_count(frame.base()), 3);
    assert_eq!(
        leaf(&second, 0).permissions().unwrap().access,
        Access::CopyOnWrite
    );

    for space in [parent, first, second] {
        vmm.destroy(space, PAGE as u64);
    }
    assert_eq!(frames.free_frames(), frames.total_frames());
}

#[test]
fn insert_failure_unwinds_child_and_keeps_parent_downgrades() {
    let ram = TestRam::with_managed(64);
    let frames = ram.allocator();
    let vmm = Vmm::new(&frames);

    let mut parent = vmm.new_address_space().unwrap();
    populate(&vmm, &mut parent, 4, Permissions::USER_RW);
    let originals: Vec<_> = (0..4).map(|i| leaf(&parent, i).frame()).collect();

    let mut child = vmm.new_address_space().unwrap();
    let mut failing = FailingMap {
        inner: &mut child,
        fail_at: 2,
    };
    let result = duplicate(&vmm, &mut parent, &mut failing, SIZE4);
    assert_eq!(result, Err(ForkError::OutOfMemory));

    for i in 0..4 {
        assert!(is_unmapped(&child, i), "child page {i} survived the unwind");
    }
    for i in 0..2 {
        assert_eq!(
            leaf(&parent, i).permissions().unwrap().access,
            Access::CopyOnWrite
        );
    }
    for i in 2..4 {
        assert_eq!(leaf(&parent, i).permissions(), Ok(Permissions::USER_RW));
    }
    for frame in &originals {
        assert_eq!(frames.ref_count(frame.base()), 1);
    }

    vmm.destroy(child, SIZE4);
    vmm.destroy(parent, SIZE4);
    assert_eq!(frames.free_frames(), frames.total_frames());
}

#[test]
fn failure_on_first_page_changes_nothing() {
    let ram = TestRam::with_managed(64);
    let frames = ram.allocator();
    let vmm = Vmm::new(&frames);

    let mut parent = vmm.new_address_space().unwrap();
    populate(&vmm, &mut parent, 2, Permissions::USER_RW);
    let mut child = vmm.new_address_space().unwrap();
    let free_before = frames.free_frames();

    let mut failing = FailingMap {
        inner: &mut child,
        fail_at: 0,
    };
    assert!(duplicate(&vmm, &mut parent, &mut failing, 2 * PAGE as u64).is_err());
    assert_eq!(leaf(&parent, 0).permissions(), Ok(Permissions::USER_RW));
    assert_eq!(frames.free_frames(), free_before);

    vmm.destroy(child, 0);
    vmm.destroy(parent, 2 * PAGE as u64);
}

#[test]
fn out_of_memory_discards_the_whole_child() {
    // Parent: root, three tables, two pages. Two frames left for the child.
    let ram = TestRam::with_managed(TABLES + 2 + 2);
    let frames = ram.allocator();
    let vmm = Vmm::new(&frames);

    let mut parent = vmm.new_address_space().unwrap();
    populate(&vmm, &mut parent, 2, Permissions::USER_RW);
    assert_eq!(frames.free_frames(), 2);

    let result = fork_address_space(&vmm, &mut parent, 2 * PAGE as u64);
    assert_eq!(result.err(), Some(ForkError::OutOfMemory));

    assert_eq!(frames.free_frames(), 2);
    for i in 0..2 {
        let p = leaf(&parent, i);
        assert_eq!(p.permissions(), Ok(Permissions::USER_RW));
        assert_eq!(frames.ref_count(p.frame().base()), 1);
    }

    vmm.destroy(parent, 2 * PAGE as u64);
    assert_eq!(frames.free_frames(), frames.total_frames());
}

#[test]
fn empty_space_forks_to_empty_child() {
    let ram = TestRam::with_managed(16);
    let frames = ram.allocator();
    let vmm = Vmm::new(&frames);

    let mut parent = vmm.new_address_space().unwrap();
    let child = fork_address_space(&vmm, &mut parent, 0).unwrap();
    assert!(is_unmapped(&child, 0));

    vmm.destroy(child, 0);
    vmm.destroy(parent, 0);
    assert_eq!(frames.free_frames(), frames.total_frames());
}

#[test]
#[should_panic(expected = "not fully mapped")]
fn hole_in_parent_is_fatal() {
    let ram = TestRam::with_managed(32);
    let frames = ram.allocator();
    let vmm = Vmm::new(&frames);

    let mut parent = vmm.new_address_space().unwrap();
    populate(&vmm, &mut parent, 1, Permissions::USER_RW);
    let mut child: AddressSpace<'_, TestRam> = vmm.new_address_space().unwrap();
    let _ = duplicate(&vmm, &mut parent, &mut child, 2 * PAGE as u64);
}

#[test]
#[should_panic(expected = "not fully mapped")]
fn lazily_populated_space_with_holes_cannot_fork() {
    let ram = TestRam::with_managed(32);
    let frames = ram.allocator();
    let vmm = Vmm::new(&frames);

    let mut parent = vmm.new_address_space().unwrap();
    let mut pager = ZeroFillPager::new(3 * PAGE as u64);
    pager.back_page(&vmm, &mut parent, va(2 * PAGE as u64)).unwrap();

    let _ = fork_address_space(&vmm, &mut parent, pager.size());
}

#[test]
fn lazily_populated_space_forks_once_fully_backed() {
    let ram = TestRam::with_managed(32);
    let frames = ram.allocator();
    let vmm = Vmm::new(&frames);

    let mut parent = vmm.new_address_space().unwrap();
    let mut pager = ZeroFillPager::new(3 * PAGE as u64);
    pager.back_page(&vmm, &mut parent, va(2 * PAGE as u64)).unwrap();
    for i in 0..2 {
        if is_unmapped(&parent, i) {
            pager.back_page(&vmm, &mut parent, va(i * PAGE as u64)).unwrap();
        }
    }
    assert_eq!(pager.backed(), 3);

    let child = fork_address_space(&vmm, &mut parent, pager.size()).unwrap();
    for i in 0..3 {
        assert_eq!(leaf(&child, i).frame(), leaf(&parent, i).frame());
        assert_eq!(
            leaf(&parent, i).permissions().unwrap().access,
            Access::CopyOnWrite
        );
    }

    vmm.destroy(child, pager.size());
    vmm.destroy(parent, pager.size());
    assert_eq!(frames.free_frames(), frames.total_frames());
}

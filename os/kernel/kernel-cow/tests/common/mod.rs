//! Simulated physical RAM and page-table helpers for the fork tests.

#![allow(dead_code)]

use std::cell::UnsafeCell;

use kernel_alloc::{FrameAllocator, ManagedRange, Vmm};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage};
use kernel_vmem::{FrameAlloc, MapError, PageMap, PageTableEntry, Permissions, PhysMapper};

pub const PAGE: usize = 4096;

/// Frames below this index play the kernel image.
pub const KERNEL_FRAMES: u64 = 2;

/// Root plus PDPT, PD and PT for addresses in the first 2 MiB.
pub const TABLES: usize = 4;

#[repr(align(4096))]
struct Aligned4K(UnsafeCell<[u8; PAGE]>);

/// Frame `n` lives at physical address `n * 4096`.
pub struct TestRam {
    frames: Box<[Aligned4K]>,
}

// Safety: the allocator serializes its own state; tests only touch frames
// their address spaces own.
unsafe impl Sync for TestRam {}

impl TestRam {
    /// RAM with `managed` allocatable frames above the kernel image.
    pub fn with_managed(managed: usize) -> Self {
        let n = KERNEL_FRAMES as usize + managed;
        Self {
            frames: (0..n)
                .map(|_| Aligned4K(UnsafeCell::new([0xEE; PAGE])))
                .collect(),
        }
    }

    pub fn allocator(&self) -> FrameAllocator<'_, Self> {
        let range = ManagedRange::new(
            PhysicalAddress::new(KERNEL_FRAMES * PAGE as u64),
            PhysicalAddress::new((self.frames.len() * PAGE) as u64),
        );
        FrameAllocator::new(self, range)
    }

    pub fn bytes(&self, pa: PhysicalAddress) -> [u8; PAGE] {
        let idx = usize::try_from(pa.as_u64()).unwrap() / PAGE;
        unsafe { *self.frames[idx].0.get() }
    }
}

impl PhysMapper for TestRam {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let pa = usize::try_from(pa.as_u64()).unwrap();
        let (idx, off) = (pa / PAGE, pa % PAGE);
        assert!(off + size_of::<T>() <= PAGE, "access crosses a frame");
        unsafe { &mut *self.frames[idx].0.get().cast::<u8>().add(off).cast::<T>() }
    }
}

pub fn va(n: u64) -> VirtualAddress {
    VirtualAddress::new(n)
}

pub fn vpage(n: u64) -> VirtualPage<Size4K> {
    VirtualPage::from_number(n)
}

/// Present leaf of page `n`.
pub fn leaf<P: PageMap>(space: &P, n: u64) -> PageTableEntry {
    space
        .leaf(vpage(n))
        .filter(|e| e.is_present())
        .unwrap_or_else(|| panic!("page {n} is not mapped"))
}

pub fn is_unmapped<P: PageMap>(space: &P, n: u64) -> bool {
    space.leaf(vpage(n)).is_none_or(|e| !e.is_present())
}

/// Map `pages` user pages at address 0 and stamp page `i` with byte `i + 1`.
pub fn populate<M: PhysMapper, P: PageMap>(
    vmm: &Vmm<'_, M>,
    space: &mut P,
    pages: u64,
    perms: Permissions,
) {
    vmm.map_anon_pages(space, VirtualAddress::zero(), pages * PAGE as u64, perms)
        .unwrap();
    for i in 0..pages {
        let frame = leaf(space, i).frame();
        vmm.write_phys(frame.base(), &[(i + 1) as u8; PAGE]);
    }
}

/// Delegates to an inner map but refuses to insert page `fail_at`.
pub struct FailingMap<'a, P> {
    pub inner: &'a mut P,
    pub fail_at: u64,
}

impl<P: PageMap> PageMap for FailingMap<'_, P> {
    fn leaf(&self, page: VirtualPage<Size4K>) -> Option<PageTableEntry> {
        self.inner.leaf(page)
    }

    fn replace_leaf(
        &mut self,
        page: VirtualPage<Size4K>,
        entry: PageTableEntry,
    ) -> Option<PageTableEntry> {
        self.inner.replace_leaf(page, entry)
    }

    fn map_4k<A: FrameAlloc + ?Sized>(
        &mut self,
        alloc: &A,
        page: VirtualPage<Size4K>,
        frame: PhysicalPage<Size4K>,
        perms: Permissions,
    ) -> Result<(), MapError> {
        if page.number() == self.fail_at {
            return Err(MapError::OutOfMemory);
        }
        self.inner.map_4k(alloc, page, frame, perms)
    }

    fn unmap_4k(&mut self, page: VirtualPage<Size4K>) -> Option<PageTableEntry> {
        self.inner.unmap_4k(page)
    }
}

//! Simulated physical RAM for integration tests.

#![allow(dead_code)]

use std::cell::UnsafeCell;

use kernel_alloc::{FrameAllocator, ManagedRange};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

pub const PAGE: usize = 4096;

/// Frames below this index play the kernel image.
pub const KERNEL_FRAMES: u64 = 4;

#[repr(align(4096))]
struct Aligned4K(UnsafeCell<[u8; PAGE]>);

/// Frame `n` lives at physical address `n * 4096`.
pub struct TestRam {
    frames: Box<[Aligned4K]>,
}

// Safety: the allocator serializes access to shared state; tests only touch
// frames they own.
unsafe impl Sync for TestRam {}

impl TestRam {
    pub fn with_frames(n: usize) -> Self {
        Self {
            frames: (0..n)
                .map(|_| Aligned4K(UnsafeCell::new([0xEE; PAGE])))
                .collect(),
        }
    }

    /// Managed range `[KERNEL_FRAMES, n)`.
    pub fn range(&self) -> ManagedRange {
        ManagedRange::new(
            PhysicalAddress::new(KERNEL_FRAMES * PAGE as u64),
            PhysicalAddress::new((self.frames.len() * PAGE) as u64),
        )
    }

    pub fn allocator(&self) -> FrameAllocator<'_, Self> {
        FrameAllocator::new(self, self.range())
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

//! Kernel memory context for user address spaces.
//!
//! [`Vmm`] bundles the [`FrameAllocator`] (and through it the [`PhysMapper`])
//! so process-level code gets one explicit handle instead of reaching for
//! global state. It creates address spaces, backs user ranges with fresh
//! frames, unmaps them (dropping frame references) and tears spaces down.
//!
//! # Example
//! ```ignore
//! let frames = FrameAllocator::new(&mapper, ManagedRange::new(kernel_end, phys_top));
//! let vmm = Vmm::new(&frames);
//! let mut space = vmm.new_address_space()?;
//! vmm.map_anon_pages(&mut space, VirtualAddress::zero(), 3 * 4096, Permissions::USER_RW)?;
//! // ...
//! vmm.destroy(space, 3 * 4096);
//! ```

use crate::frame::{Frame, FrameError};
use crate::frame_alloc::{FrameAllocator, OutOfMemory};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage,
};
use kernel_vmem::{AddressSpace, MapError, PageMap, Permissions, PhysMapper, invalidate_page};
use log::{debug, error, warn};

#[allow(clippy::cast_possible_truncation)]
type FrameBytes = [u8; PAGE_SIZE as usize];

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("{0} is not page aligned")]
    Unaligned(VirtualAddress),
    #[error("range at {0} wraps around the address space")]
    InvalidRange(VirtualAddress),
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtualAddress),
}

impl From<OutOfMemory> for VmmError {
    fn from(_: OutOfMemory) -> Self {
        Self::OutOfMemory
    }
}

impl From<MapError> for VmmError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::OutOfMemory => Self::OutOfMemory,
            MapError::AlreadyMapped(va) => Self::AlreadyMapped(va),
        }
    }
}

/// Kernel memory context.
pub struct Vmm<'m, M: PhysMapper> {
    frames: &'m FrameAllocator<'m, M>,
}

impl<'m, M: PhysMapper> Vmm<'m, M> {
    #[inline]
    pub const fn new(frames: &'m FrameAllocator<'m, M>) -> Self {
        Self { frames }
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &'m FrameAllocator<'m, M> {
        self.frames
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.frames.mapper()
    }

    /// A fresh, empty address space with its root from the frame pool.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] if no frame is left for the root table.
    pub fn new_address_space(&self) -> Result<AddressSpace<'m, M>, VmmError> {
        Ok(AddressSpace::new(self.mapper(), self.frames)?)
    }

    /// Managed frame a leaf points at.
    ///
    /// # Panics
    /// If the leaf references memory the allocator does not manage; a user
    /// mapping like that means the page tables are corrupt.
    #[must_use]
    pub fn managed_frame(&self, page: PhysicalPage<Size4K>) -> Frame {
        match self.frames.range().frame_of(page) {
            Ok(frame) => frame,
            Err(e) => unmanaged(e),
        }
    }

    /// Back `[va, va + len)` with zero-filled frames mapped with `perms`.
    ///
    /// On failure every page mapped by this call is unmapped and its frame
    /// released again; nothing outside the range is touched.
    ///
    /// # Errors
    /// - [`VmmError::Unaligned`] if `va` is not page aligned.
    /// - [`VmmError::OutOfMemory`] if a frame or page table could not be allocated.
    /// - [`VmmError::AlreadyMapped`] if a page in the range is already backed.
    pub fn map_anon_pages<P: PageMap>(
        &self,
        space: &mut P,
        va: VirtualAddress,
        len: u64,
        perms: Permissions,
    ) -> Result<(), VmmError> {
        let first = VirtualPage::<Size4K>::try_from(va).map_err(VmmError::Unaligned)?;
        let pages = len.div_ceil(Size4K::SIZE);
        if va.checked_add(pages * Size4K::SIZE).is_none() {
            return Err(VmmError::InvalidRange(va));
        }

        for i in 0..pages {
            let page = VirtualPage::from_number(first.number() + i);
            if let Err(e) = self.map_fresh(space, page, perms) {
                warn!("mapping {len:#x} bytes at {va} failed at page {i}: {e}");
                self.unmap_pages(space, first, i, true);
                return Err(e);
            }
        }
        Ok(())
    }

    fn map_fresh<P: PageMap>(
        &self,
        space: &mut P,
        page: VirtualPage<Size4K>,
        perms: Permissions,
    ) -> Result<(), VmmError> {
        let frame = self.frames.allocate()?;
        self.zero_frame(frame);
        if let Err(e) = space.map_4k(self.frames, page, frame.page(), perms) {
            self.frames.release(frame);
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove `npages` leaves starting at `first`.
    ///
    /// Pages without a present leaf (never touched, lazily allocated) are
    /// skipped. With `release`, each removed leaf drops one reference to its
    /// frame. Returns how many leaves were removed.
    pub fn unmap_pages<P: PageMap>(
        &self,
        space: &mut P,
        first: VirtualPage<Size4K>,
        npages: u64,
        release: bool,
    ) -> u64 {
        let mut removed = 0;
        for i in 0..npages {
            let page = VirtualPage::from_number(first.number() + i);
            let Some(old) = space.unmap_4k(page) else {
                continue;
            };
            invalidate_page(page);
            removed += 1;
            if release {
                self.frames.release(self.managed_frame(old.frame()));
            }
        }
        removed
    }

    /// Tear down a user address space of `size` bytes.
    ///
    /// Drops the reference of every user page, then returns all table frames.
    pub fn destroy(&self, mut space: AddressSpace<'m, M>, size: u64) {
        let pages = size.div_ceil(Size4K::SIZE);
        let removed = self.unmap_pages(&mut space, VirtualPage::from_number(0), pages, true);
        debug!(
            "destroying address space {}: {removed} of {pages} pages were mapped",
            space.root_page()
        );
        space.free_tables(self.frames);
    }

    /// Copy the full contents of `from` into `to`.
    pub fn copy_frame(&self, from: Frame, to: Frame) {
        debug_assert_ne!(from, to);
        let src = unsafe { self.mapper().phys_to_mut::<FrameBytes>(from.base()) };
        let dst = unsafe { self.mapper().phys_to_mut::<FrameBytes>(to.base()) };
        dst.copy_from_slice(src);
    }

    pub fn zero_frame(&self, frame: Frame) {
        let bytes = unsafe { self.mapper().phys_to_mut::<FrameBytes>(frame.base()) };
        bytes.fill(0);
    }

    /// Copy out of physical memory. The range must not cross a page boundary.
    pub fn read_phys(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        let (page, off) = pa.split::<Size4K>();
        let off = usize_of(off.as_u64());
        let bytes = unsafe { self.mapper().phys_to_mut::<FrameBytes>(page.base()) };
        buf.copy_from_slice(&bytes[off..off + buf.len()]);
    }

    /// Copy into physical memory. The range must not cross a page boundary.
    pub fn write_phys(&self, pa: PhysicalAddress, data: &[u8]) {
        let (page, off) = pa.split::<Size4K>();
        let off = usize_of(off.as_u64());
        let bytes = unsafe { self.mapper().phys_to_mut::<FrameBytes>(page.base()) };
        bytes[off..off + data.len()].copy_from_slice(data);
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn usize_of(v: u64) -> usize {
    v as usize
}

#[cold]
fn unmanaged(e: FrameError) -> ! {
    error!("user mapping references unmanaged memory: {e}");
    panic!("page table references unmanaged memory: {e}");
}

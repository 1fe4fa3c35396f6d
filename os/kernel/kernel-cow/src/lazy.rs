//! Lazy allocation: backing a user page on first touch.
//!
//! Fault dispatch and [`copy_out`](crate::copy_out) call into a [`LazyAlloc`]
//! when they meet a page without a present leaf.

use kernel_alloc::{Vmm, VmmError};
use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress};
use kernel_vmem::{PageMap, Permissions, PhysMapper};
use log::trace;

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum LazyError {
    #[error("{0} is outside the process image")]
    OutOfRange(VirtualAddress),
    #[error("{0} is already backed")]
    AlreadyMapped(VirtualAddress),
    #[error("out of memory while backing a page")]
    OutOfMemory,
}

/// Backs pages that were reserved but never mapped.
pub trait LazyAlloc {
    /// Install a frame for the page containing `va`.
    ///
    /// # Errors
    /// See [`LazyError`].
    fn back_page<M: PhysMapper, P: PageMap>(
        &mut self,
        vmm: &Vmm<'_, M>,
        space: &mut P,
        va: VirtualAddress,
    ) -> Result<(), LazyError>;
}

/// Address spaces that are always fully mapped.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoPager;

impl LazyAlloc for NoPager {
    fn back_page<M: PhysMapper, P: PageMap>(
        &mut self,
        _vmm: &Vmm<'_, M>,
        _space: &mut P,
        va: VirtualAddress,
    ) -> Result<(), LazyError> {
        Err(LazyError::OutOfRange(va))
    }
}

/// Backs every page below the process size with a zeroed user RW frame.
///
/// Pages nobody touched stay unmapped, so a space served by this pager has
/// holes below its size. [`duplicate`](crate::duplicate) treats a hole as a
/// corrupt parent; back every page before forking such a space.
#[derive(Copy, Clone, Debug)]
pub struct ZeroFillPager {
    size: u64,
    backed: u64,
}

impl ZeroFillPager {
    #[must_use]
    pub const fn new(size: u64) -> Self {
        Self { size, backed: 0 }
    }

    /// Process size in bytes; pages at or above it are never backed.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    pub const fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Pages backed so far.
    #[must_use]
    pub const fn backed(&self) -> u64 {
        self.backed
    }
}

impl LazyAlloc for ZeroFillPager {
    fn back_page<M: PhysMapper, P: PageMap>(
        &mut self,
        vmm: &Vmm<'_, M>,
        space: &mut P,
        va: VirtualAddress,
    ) -> Result<(), LazyError> {
        if va.as_u64() >= self.size {
            return Err(LazyError::OutOfRange(va));
        }
        let page = va.page::<Size4K>();
        vmm.map_anon_pages(space, page.base(), Size4K::SIZE, Permissions::USER_RW)
            .map_err(|e| match e {
                VmmError::OutOfMemory => LazyError::OutOfMemory,
                VmmError::AlreadyMapped(_) => LazyError::AlreadyMapped(va),
                VmmError::Unaligned(_) | VmmError::InvalidRange(_) => LazyError::OutOfRange(va),
            })?;
        self.backed += 1;
        trace!("lazily backed {page}");
        Ok(())
    }
}

//! # Address-space duplication
//!
//! [`duplicate`] makes a child share every user frame of its parent. Writable
//! pages become copy-on-write in **both** spaces, so whichever side stores
//! first takes the fault and gets its own copy. Read-only pages (text) are
//! shared as they are and never copied.
//!
//! Per page in `[0, size)`:
//!
//! 1. look up the parent leaf; a hole is a corrupt address space (panic),
//! 2. insert the child leaf with the shared tag,
//! 3. add one reference to the frame,
//! 4. downgrade the parent leaf if it was writable and invalidate its TLB entry.
//!
//! If step 2 fails on page *k*, the child leaves of pages `0..k` are removed
//! again and their references dropped. Parent downgrades of those pages stay;
//! a copy-on-write page whose frame has a single owner is still correct.

use crate::leaf_permissions;
use kernel_alloc::Vmm;
use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress, VirtualPage};
use kernel_vmem::{AddressSpace, MapError, PageMap, PhysMapper, invalidate_page};
use log::{debug, error, warn};

/// Duplication was aborted; the child must be discarded.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ForkError {
    #[error("out of memory while duplicating an address space")]
    OutOfMemory,
    #[error("{0} is already mapped in the child")]
    AlreadyMapped(VirtualAddress),
}

impl From<MapError> for ForkError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::OutOfMemory => Self::OutOfMemory,
            MapError::AlreadyMapped(va) => Self::AlreadyMapped(va),
        }
    }
}

/// Share the first `size` bytes of `parent` with `child`.
///
/// # Errors
/// The first child insert that fails; every page this call mapped into the
/// child is unmapped again before returning.
///
/// # Panics
/// If a page below `size` has no present leaf in `parent`. A space populated
/// lazily (see [`ZeroFillPager`](crate::ZeroFillPager)) must be fully backed
/// before it can be duplicated.
pub fn duplicate<M, P, C>(
    vmm: &Vmm<'_, M>,
    parent: &mut P,
    child: &mut C,
    size: u64,
) -> Result<(), ForkError>
where
    M: PhysMapper,
    P: PageMap,
    C: PageMap,
{
    let pages = size.div_ceil(Size4K::SIZE);
    for i in 0..pages {
        let page = VirtualPage::<Size4K>::from_number(i);
        let Some(entry) = parent.leaf(page).filter(|e| e.is_present()) else {
            missing_parent_leaf(page);
        };
        let perms = leaf_permissions(entry, page);
        let shared = perms.shared();
        let frame = vmm.managed_frame(entry.frame());

        if let Err(e) = child.map_4k(vmm.frames(), page, frame.page(), shared) {
            warn!("fork: mapping {page} into the child failed: {e}; unwinding {i} pages");
            vmm.unmap_pages(child, VirtualPage::from_number(0), i, true);
            return Err(e.into());
        }
        vmm.frames().retain(frame);

        if shared != perms {
            parent.replace_leaf(page, entry.with_permissions(shared));
            invalidate_page(page);
        }
    }
    Ok(())
}

/// Create a child address space sharing the first `size` bytes of `parent`.
///
/// On failure the partially built child is torn down completely; the parent
/// keeps whatever copy-on-write downgrades already happened.
///
/// # Errors
/// [`ForkError::OutOfMemory`] if the child root or one of its tables could not
/// be allocated.
pub fn fork_address_space<'m, M, P>(
    vmm: &Vmm<'m, M>,
    parent: &mut P,
    size: u64,
) -> Result<AddressSpace<'m, M>, ForkError>
where
    M: PhysMapper,
    P: PageMap,
{
    let mut child = AddressSpace::new(vmm.mapper(), vmm.frames())?;
    if let Err(e) = duplicate(vmm, parent, &mut child, size) {
        vmm.destroy(child, size);
        return Err(e);
    }
    debug!(
        "fork: {} pages shared with child {}, {} frames left",
        size.div_ceil(Size4K::SIZE),
        child.root_page(),
        vmm.frames().free_frames()
    );
    Ok(child)
}

#[cold]
fn missing_parent_leaf(page: VirtualPage<Size4K>) -> ! {
    error!("fork: parent has no present leaf for {page}");
    panic!("fork: parent address space is not fully mapped");
}

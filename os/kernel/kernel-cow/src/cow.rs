//! # Copy-on-write fault resolution
//!
//! A store to a copy-on-write leaf lands here. The resolver copies the shared
//! frame into a fresh one, points the leaf at the copy with write access
//! restored and drops the leaf's reference to the old frame. If that was the
//! last reference, the old frame goes back to the pool.
//!
//! Every precondition failure is an ordinary [`CowFaultError`]; trap dispatch
//! decides whether to try lazy allocation or to kill the process.

use crate::leaf_permissions;
use kernel_alloc::Vmm;
use kernel_info::memory::USER_VA_CEILING;
use kernel_memory_addresses::{Size4K, VirtualAddress};
use kernel_vmem::{PageMap, PhysMapper, invalidate_page};
use log::{trace, warn};

/// Why a fault was not a resolvable copy-on-write fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CowFaultError {
    #[error("{0} is above the user address ceiling")]
    AboveCeiling(VirtualAddress),
    #[error("{0} has no mapping")]
    NotMapped(VirtualAddress),
    #[error("{0} is mapped but not present")]
    NotPresent(VirtualAddress),
    #[error("{0} is not user accessible")]
    NotUser(VirtualAddress),
    #[error("{0} is not a copy-on-write page")]
    NotCopyOnWrite(VirtualAddress),
    #[error("out of memory while copying a shared page")]
    OutOfMemory,
}

/// Give the page containing `va` its own writable frame.
///
/// Only `space` is modified. The copy happens even when the faulting mapping
/// is the last owner of the frame.
///
/// # Errors
/// See [`CowFaultError`]. Nothing is changed when an error is returned.
pub fn resolve_cow_fault<M, P>(
    vmm: &Vmm<'_, M>,
    space: &mut P,
    va: VirtualAddress,
) -> Result<(), CowFaultError>
where
    M: PhysMapper,
    P: PageMap,
{
    if va.as_u64() >= USER_VA_CEILING {
        return Err(CowFaultError::AboveCeiling(va));
    }

    let page = va.page::<Size4K>();
    let entry = space
        .leaf(page)
        .filter(|e| !e.is_zero())
        .ok_or(CowFaultError::NotMapped(va))?;
    if !entry.is_present() {
        return Err(CowFaultError::NotPresent(va));
    }
    let perms = leaf_permissions(entry, page);
    if !perms.user {
        return Err(CowFaultError::NotUser(va));
    }
    if !perms.is_copy_on_write() {
        return Err(CowFaultError::NotCopyOnWrite(va));
    }

    let old = vmm.managed_frame(entry.frame());
    let Ok(new) = vmm.frames().allocate() else {
        warn!("copy-on-write fault at {va}: no frame left for the copy");
        return Err(CowFaultError::OutOfMemory);
    };
    vmm.copy_frame(old, new);

    let private = entry.with_frame(new.page()).with_permissions(perms.private());
    space.replace_leaf(page, private);
    invalidate_page(page);
    vmm.frames().release(old);

    trace!("copy-on-write fault at {va}: {old} -> {new}");
    Ok(())
}

//! # Kernel access to user memory
//!
//! The kernel reads and writes user buffers through the page tables of the
//! target address space and the physical mapper, one page at a time.
//!
//! [`copy_out`] must not write into a shared frame behind copy-on-write's
//! back: a COW destination page is resolved first, a page without a frame is
//! handed to the lazy allocator, and only a user-writable leaf accepts bytes.
//! A read-only leaf (program text) fails the copy.
//!
//! A failing copy may already have written the pages before the failing one.

use crate::cow::{CowFaultError, resolve_cow_fault};
use crate::lazy::{LazyAlloc, LazyError};
use crate::leaf_permissions;
use kernel_alloc::Vmm;
use kernel_info::memory::USER_VA_CEILING;
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress, VirtualPage};
use kernel_vmem::{PageMap, PageTableEntry, PhysMapper};

#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CopyError {
    #[error("{0} is outside the user address range")]
    OutOfRange(VirtualAddress),
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("{0} is not user accessible")]
    NotUser(VirtualAddress),
    #[error("{0} is read-only")]
    ReadOnly(VirtualAddress),
    #[error("copy-on-write resolution failed: {0}")]
    CopyOnWrite(#[from] CowFaultError),
    #[error("lazy allocation failed: {0}")]
    Lazy(#[from] LazyError),
    #[error("string is not terminated within {0} bytes")]
    Unterminated(usize),
}

/// Copy `src` to user address `dst` in `space`.
///
/// # Errors
/// See [`CopyError`]. Pages before the failing one may already be written.
pub fn copy_out<M, P, L>(
    vmm: &Vmm<'_, M>,
    space: &mut P,
    dst: VirtualAddress,
    src: &[u8],
    lazy: &mut L,
) -> Result<(), CopyError>
where
    M: PhysMapper,
    P: PageMap,
    L: LazyAlloc,
{
    check_user_range(dst, src.len())?;

    let mut va = dst;
    let mut rest = src;
    while !rest.is_empty() {
        let (page, off) = va.split::<Size4K>();
        let n = chunk_len(rest.len(), off.remaining());
        let frame = writable_frame(vmm, space, va, lazy)?;
        vmm.write_phys(frame + off.as_u64(), &rest[..n]);
        rest = &rest[n..];
        va = next_page(page);
    }
    Ok(())
}

/// Copy from user address `src` in `space` into `dst`.
///
/// # Errors
/// [`CopyError::NotMapped`] or [`CopyError::NotUser`] for the first page that
/// cannot be read; [`CopyError::OutOfRange`] if the range leaves user space.
pub fn copy_in<M, P>(
    vmm: &Vmm<'_, M>,
    space: &P,
    dst: &mut [u8],
    src: VirtualAddress,
) -> Result<(), CopyError>
where
    M: PhysMapper,
    P: PageMap,
{
    check_user_range(src, dst.len())?;

    let mut va = src;
    let mut done = 0;
    while done < dst.len() {
        let (page, off) = va.split::<Size4K>();
        let n = chunk_len(dst.len() - done, off.remaining());
        let frame = readable_frame(space, va)?;
        vmm.read_phys(frame + off.as_u64(), &mut dst[done..done + n]);
        done += n;
        va = next_page(page);
    }
    Ok(())
}

/// Copy a NUL-terminated string from user address `src` into `dst`.
///
/// Returns the string length without the terminator, which is copied too.
///
/// # Errors
/// [`CopyError::Unterminated`] if `dst` fills up before a NUL is found, or
/// any error of [`copy_in`].
pub fn copy_in_str<M, P>(
    vmm: &Vmm<'_, M>,
    space: &P,
    dst: &mut [u8],
    src: VirtualAddress,
) -> Result<usize, CopyError>
where
    M: PhysMapper,
    P: PageMap,
{
    let mut va = src;
    let mut done = 0;
    while done < dst.len() {
        let (page, off) = va.split::<Size4K>();
        let n = chunk_len(dst.len() - done, off.remaining());
        check_user_range(va, n)?;
        let frame = readable_frame(space, va)?;

        let chunk = &mut dst[done..done + n];
        vmm.read_phys(frame + off.as_u64(), chunk);
        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            return Ok(done + nul);
        }
        done += n;
        va = next_page(page);
    }
    Err(CopyError::Unterminated(dst.len()))
}

/// Reject ranges that wrap or reach into the kernel half.
fn check_user_range(va: VirtualAddress, len: usize) -> Result<(), CopyError> {
    let end = va.as_u64().checked_add(len as u64);
    match end {
        Some(end) if end <= USER_VA_CEILING => Ok(()),
        _ => Err(CopyError::OutOfRange(va)),
    }
}

/// Bytes to move in this step: whatever is left, capped at the page end.
#[allow(clippy::cast_possible_truncation)]
fn chunk_len(left: usize, in_page: u64) -> usize {
    left.min(in_page as usize)
}

/// First byte of the page after `page`.
///
/// Only called while bytes are left, so the range check above guarantees the
/// next page is still below the user ceiling.
fn next_page(page: VirtualPage<Size4K>) -> VirtualAddress {
    VirtualPage::<Size4K>::from_number(page.number() + 1).base()
}

fn present_leaf<P: PageMap>(space: &P, page: VirtualPage<Size4K>) -> Option<PageTableEntry> {
    space.leaf(page).filter(|e| e.is_present())
}

/// Frame behind `va` after lazy allocation and copy-on-write resolution.
fn writable_frame<M, P, L>(
    vmm: &Vmm<'_, M>,
    space: &mut P,
    va: VirtualAddress,
    lazy: &mut L,
) -> Result<PhysicalAddress, CopyError>
where
    M: PhysMapper,
    P: PageMap,
    L: LazyAlloc,
{
    let page = va.page::<Size4K>();
    if present_leaf(space, page).is_none() {
        lazy.back_page(vmm, space, va)?;
    }
    let entry = present_leaf(space, page).ok_or(CopyError::NotMapped(va))?;

    let entry = if leaf_permissions(entry, page).is_copy_on_write() {
        resolve_cow_fault(vmm, space, va)?;
        present_leaf(space, page).ok_or(CopyError::NotMapped(va))?
    } else {
        entry
    };

    let perms = leaf_permissions(entry, page);
    if !perms.user {
        return Err(CopyError::NotUser(va));
    }
    if !perms.is_writable() {
        return Err(CopyError::ReadOnly(va));
    }
    Ok(entry.frame().base())
}

fn readable_frame<P: PageMap>(space: &P, va: VirtualAddress) -> Result<PhysicalAddress, CopyError> {
    let page = va.page::<Size4K>();
    let entry = present_leaf(space, page).ok_or(CopyError::NotMapped(va))?;
    if !leaf_permissions(entry, page).user {
        return Err(CopyError::NotUser(va));
    }
    Ok(entry.frame().base())
}

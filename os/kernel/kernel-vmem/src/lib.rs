//! # Virtual Memory Support
//!
//! x86-64 4-level paging helpers for user address spaces built from 4 KiB
//! pages, with a software copy-on-write marker.
//!
//! ## What you get
//! - [`PageEntryBits`]: raw entry bitfield, including the COW bit (bit 9).
//! - [`Permissions`] / [`Access`]: decoded leaf permissions where writable and
//!   copy-on-write exclude each other by construction.
//! - A 4 KiB-aligned [`PageTable`] plus index helpers.
//! - An [`AddressSpace`] that walks, maps, unmaps and tears down one tree.
//! - The collaborator traits [`FrameAlloc`], [`PhysMapper`] and [`PageMap`].
//! - [`invalidate_page`] for TLB maintenance.
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//!
//!  PML4  →  PDPT  →  PD  →  PT  →  4 KiB frame
//! ```
//!
//! Each level is a table of 512 8-byte entries. Non-leaf entries point at the
//! next table; PT entries are the leaves. Huge pages (PS=1) are never created.
//!
//! ## Copy-on-write encoding
//!
//! | `writable` | `copy_on_write` | Meaning |
//! |:----------:|:---------------:|---------|
//! | 0 | 0 | read-only, a store is a genuine violation |
//! | 1 | 0 | private and writable |
//! | 0 | 1 | shared; a store needs a private copy first |
//! | 1 | 1 | corrupted, never written by this crate |

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod page_entry_bits;
pub mod page_table;
mod permissions;
mod tlb;

pub use crate::address_space::{AddressSpace, MapError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{PageTable, PageTableEntry};
pub use crate::permissions::{Access, CorruptedEntry, Permissions};
pub use crate::tlb::invalidate_page;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualPage};

/// Source of **physical** 4 KiB frames for page tables.
///
/// Implementations lock internally, hence `&self`. Returned frames must be
/// 4 KiB aligned; their content is unspecified.
pub trait FrameAlloc {
    /// Allocate one frame, or `None` when out of memory.
    fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>>;

    /// Give back a frame previously returned by [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&self, page: PhysicalPage<Size4K>);
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space (e.g. via a higher-half direct map, HHDM).
///
/// - **Kernel**: adds the HHDM offset.
/// - **Tests**: indexes into a simulated RAM buffer.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable for the lifetime `'a`.
    /// - `T` must match the bytes at `pa`, and the caller must not create
    ///   aliasing `&mut` to the same memory.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Leaf-level page-table primitives over one address space.
///
/// Fork and fault handling go through this trait instead of
/// [`AddressSpace`] directly so a failing insert can be simulated.
pub trait PageMap {
    /// Raw leaf entry of `page`, or `None` if no page table reaches it.
    fn leaf(&self, page: VirtualPage<Size4K>) -> Option<PageTableEntry>;

    /// Overwrite an existing leaf. Returns the previous entry, or `None` (and
    /// writes nothing) if no page table reaches `page`.
    fn replace_leaf(
        &mut self,
        page: VirtualPage<Size4K>,
        entry: PageTableEntry,
    ) -> Option<PageTableEntry>;

    /// Install a new leaf, creating intermediate tables from `alloc`.
    ///
    /// # Errors
    /// See [`MapError`].
    fn map_4k<A: FrameAlloc + ?Sized>(
        &mut self,
        alloc: &A,
        page: VirtualPage<Size4K>,
        frame: PhysicalPage<Size4K>,
        perms: Permissions,
    ) -> Result<(), MapError>;

    /// Remove a present leaf and return it.
    fn unmap_4k(&mut self, page: VirtualPage<Size4K>) -> Option<PageTableEntry>;
}

//! # Address Space (x86-64, PML4-rooted)
//!
//! Handle to a single virtual address space: a tree of [`PageTable`]s rooted
//! at a PML4 frame.
//!
//! ## Ownership
//!
//! - The address space exclusively owns its **table** frames. They come from
//!   the [`FrameAlloc`] passed to [`map_4k`](AddressSpace::map_4k) and go back
//!   to it in [`free_tables`](AddressSpace::free_tables).
//! - It does **not** own the leaf frames it maps. Whoever maps a frame is
//!   responsible for its reference count.
//!
//! ## Safety
//!
//! - Mutating live mappings requires TLB maintenance by the caller
//!   ([`invalidate_page`](crate::invalidate_page)).
//! - The [`PhysMapper`] must yield writable references to table frames.
//! - Only 4 KiB leaves are ever created; huge pages are never produced here.

use crate::page_table::{Level, PageTable, PageTableEntry, TableIndex};
use crate::permissions::Permissions;
use crate::{FrameAlloc, PageMap, PhysMapper};
use core::fmt;
use kernel_memory_addresses::{
    PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage,
};
use log::error;

/// The PML4 root page for an [`AddressSpace`].
pub type RootPage = PhysicalPage<Size4K>;

/// Failure to install a mapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory while allocating a page table")]
    OutOfMemory,
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtualAddress),
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: RootPage,
    mapper: &'m M,
}

/// Borrow the table stored in `page`.
///
/// # Safety
/// `page` must hold a page table and no other live reference to it may be used
/// while the returned one is.
#[inline]
unsafe fn table_mut<'a, M: PhysMapper>(m: &M, page: PhysicalPage<Size4K>) -> &'a mut PageTable {
    unsafe { m.phys_to_mut::<PageTable>(page.base()) }
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Allocate and clear a fresh PML4.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if `alloc` has no frame left.
    pub fn new<A: FrameAlloc + ?Sized>(mapper: &'m M, alloc: &A) -> Result<Self, MapError> {
        let root = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
        unsafe { table_mut(mapper, root) }.zero();
        Ok(Self { root, mapper })
    }

    /// Physical page of the PML4.
    #[inline]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    #[inline]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Leaf slot of `page`, descending through existing tables only.
    fn leaf_slot(&self, page: VirtualPage<Size4K>) -> Option<&'m mut PageTableEntry> {
        let va = page.base();
        let mut table = self.root;
        for level in [Level::Pml4, Level::Pdpt, Level::Pd] {
            let t = unsafe { table_mut(self.mapper, table) };
            table = t.get(TableIndex::of(va, level)).page_4k()?;
        }
        let pt = unsafe { table_mut(self.mapper, table) };
        Some(pt.get_mut(TableIndex::of(va, Level::Pt)))
    }

    /// Leaf slot of `page`, allocating missing intermediate tables from `alloc`.
    ///
    /// Tables created before an allocation failure stay linked; they are
    /// reclaimed by [`free_tables`](Self::free_tables).
    fn leaf_slot_or_create<A: FrameAlloc + ?Sized>(
        &mut self,
        alloc: &A,
        page: VirtualPage<Size4K>,
    ) -> Result<&'m mut PageTableEntry, MapError> {
        let va = page.base();
        let mut table = self.root;
        for level in [Level::Pml4, Level::Pdpt, Level::Pd] {
            let t = unsafe { table_mut(self.mapper, table) };
            let idx = TableIndex::of(va, level);
            table = if let Some(next) = t.get(idx).page_4k() {
                next
            } else {
                let next = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
                unsafe { table_mut(self.mapper, next) }.zero();
                t.set(idx, PageTableEntry::make_table(next));
                next
            };
        }
        let pt = unsafe { table_mut(self.mapper, table) };
        Ok(pt.get_mut(TableIndex::of(va, Level::Pt)))
    }

    /// Raw leaf entry of `page`, or `None` if no page table reaches it.
    ///
    /// A returned entry may still be non-present.
    #[must_use]
    pub fn leaf(&self, page: VirtualPage<Size4K>) -> Option<PageTableEntry> {
        self.leaf_slot(page).map(|e| *e)
    }

    /// Overwrite the leaf of `page` and return what was there.
    ///
    /// Nothing is written when no page table reaches `page`.
    pub fn replace_leaf(
        &mut self,
        page: VirtualPage<Size4K>,
        entry: PageTableEntry,
    ) -> Option<PageTableEntry> {
        self.leaf_slot(page)
            .map(|slot| core::mem::replace(slot, entry))
    }

    /// Map `page → frame` with `perms`, creating intermediate tables on demand.
    ///
    /// # Errors
    /// - [`MapError::OutOfMemory`] if a table frame could not be allocated.
    /// - [`MapError::AlreadyMapped`] if a present leaf is already installed.
    pub fn map_4k<A: FrameAlloc + ?Sized>(
        &mut self,
        alloc: &A,
        page: VirtualPage<Size4K>,
        frame: PhysicalPage<Size4K>,
        perms: Permissions,
    ) -> Result<(), MapError> {
        let slot = self.leaf_slot_or_create(alloc, page)?;
        if slot.is_present() {
            return Err(MapError::AlreadyMapped(page.base()));
        }
        *slot = PageTableEntry::make_4k(frame, perms);
        Ok(())
    }

    /// Clear the leaf of `page` if present and return the removed entry.
    pub fn unmap_4k(&mut self, page: VirtualPage<Size4K>) -> Option<PageTableEntry> {
        let slot = self.leaf_slot(page)?;
        if !slot.is_present() {
            return None;
        }
        Some(core::mem::replace(slot, PageTableEntry::zero()))
    }

    /// Translate a `VirtualAddress` to a `PhysicalAddress` if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (page, off) = va.split::<Size4K>();
        let frame = self.leaf(page)?.page_4k()?;
        Some(frame.join(off))
    }

    /// Return every table frame of this space to `alloc`.
    ///
    /// # Panics
    /// If a present leaf is still installed. Leaf frames have to be released
    /// by their owner before the tables go away.
    pub fn free_tables<A: FrameAlloc + ?Sized>(self, alloc: &A) {
        self.free_level(alloc, self.root, Level::Pml4);
    }

    fn free_level<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        table: PhysicalPage<Size4K>,
        level: Level,
    ) {
        let t = unsafe { table_mut(self.mapper, table) };
        for idx in TableIndex::all() {
            let e = t.get(idx);
            if e.is_zero() {
                continue;
            }
            match (e.page_4k(), level.next()) {
                (Some(child), Some(next)) => {
                    self.free_level(alloc, child, next);
                    t.set_zero(idx);
                }
                (Some(frame), None) => {
                    error!("page table {table} still maps {frame} at slot {idx:?}");
                    panic!("freeing page tables with a live leaf mapping");
                }
                // Non-present leftovers carry no ownership.
                (None, _) => t.set_zero(idx),
            }
        }
        alloc.free_4k(table);
    }
}

impl<M: PhysMapper> PageMap for AddressSpace<'_, M> {
    #[inline]
    fn leaf(&self, page: VirtualPage<Size4K>) -> Option<PageTableEntry> {
        Self::leaf(self, page)
    }

    #[inline]
    fn replace_leaf(
        &mut self,
        page: VirtualPage<Size4K>,
        entry: PageTableEntry,
    ) -> Option<PageTableEntry> {
        Self::replace_leaf(self, page, entry)
    }

    #[inline]
    fn map_4k<A: FrameAlloc + ?Sized>(
        &mut self,
        alloc: &A,
        page: VirtualPage<Size4K>,
        frame: PhysicalPage<Size4K>,
        perms: Permissions,
    ) -> Result<(), MapError> {
        Self::map_4k(self, alloc, page, frame, perms)
    }

    #[inline]
    fn unmap_4k(&mut self, page: VirtualPage<Size4K>) -> Option<PageTableEntry> {
        Self::unmap_4k(self, page)
    }
}

impl<M: PhysMapper> fmt::Debug for AddressSpace<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

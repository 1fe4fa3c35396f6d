//! # Page Table
//!
//! One 4 KiB table of 512 entries, used at every level of the walk.
//!
//! - [`TableIndex`]: 9-bit index extracted from a virtual address for a level.
//! - [`PageTableEntry`]: a single entry; either a link to the next table or
//!   (at [`Level::Pt`]) a 4 KiB leaf.
//! - [`PageTable`]: the 4 KiB-aligned array.
//!
//! After modifying live mappings the caller performs the TLB maintenance
//! (see [`invalidate_page`](crate::invalidate_page)).

use crate::permissions::{CorruptedEntry, Permissions};
use crate::PageEntryBits;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Number of entries in every table.
pub const ENTRIES: usize = 512;

/// Paging level, top to bottom.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    /// Page Map Level 4, VA bits `[47:39]`.
    Pml4,
    /// Page Directory Pointer Table, VA bits `[38:30]`.
    Pdpt,
    /// Page Directory, VA bits `[29:21]`.
    Pd,
    /// Page Table, VA bits `[20:12]`. Holds the 4 KiB leaves.
    Pt,
}

impl Level {
    pub const ALL: [Self; 4] = [Self::Pml4, Self::Pdpt, Self::Pd, Self::Pt];

    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pml4 => 39,
            Self::Pdpt => 30,
            Self::Pd => 21,
            Self::Pt => 12,
        }
    }

    /// The level below, or `None` for [`Level::Pt`].
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pml4 => Some(Self::Pdpt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pd => Some(Self::Pt),
            Self::Pt => None,
        }
    }
}

/// Index into a table at some level. Range is `0..512`.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// Extract the index for `level` from a virtual address.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn of(va: VirtualAddress, level: Level) -> Self {
        Self(((va.as_u64() >> level.shift()) & 0x1FF) as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 512`.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// `0..512` in order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn all() -> impl Iterator<Item = Self> {
        (0..ENTRIES as u16).map(Self)
    }
}

/// All four indices of `va`, PML4 first.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> [TableIndex; 4] {
    [
        TableIndex::of(va, Level::Pml4),
        TableIndex::of(va, Level::Pdpt),
        TableIndex::of(va, Level::Pd),
        TableIndex::of(va, Level::Pt),
    ]
}

/// A single table entry at any level.
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageTableEntry(PageEntryBits);

impl PageTableEntry {
    /// A zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: PageEntryBits) -> Self {
        Self(bits)
    }

    /// Create a present 4 KiB leaf for `frame` with `perms`.
    #[inline]
    #[must_use]
    pub const fn make_4k(frame: PhysicalPage<Size4K>, perms: Permissions) -> Self {
        let bits = PageEntryBits::new()
            .with_present(true)
            .with_physical_page(frame);
        Self(perms.apply(bits))
    }

    /// Create a link to the next-level table stored in `table`.
    #[inline]
    #[must_use]
    pub const fn make_table(table: PhysicalPage<Size4K>) -> Self {
        Self(PageEntryBits::new_table_link().with_physical_page(table))
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    /// True if no bit at all is set.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0.into_bits() == 0
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> PageEntryBits {
        self.0
    }

    /// Frame referenced by the entry, regardless of the present bit.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage<Size4K> {
        self.0.physical_page()
    }

    /// If present, the next-level table (non-leaf) or mapped page (leaf).
    #[inline]
    #[must_use]
    pub fn page_4k(self) -> Option<PhysicalPage<Size4K>> {
        if !self.is_present() {
            return None;
        }
        debug_assert!(!self.0.large_page(), "huge pages are never created");
        Some(self.frame())
    }

    /// Decoded leaf permissions.
    ///
    /// # Errors
    /// [`CorruptedEntry`] if writable and copy-on-write are both set.
    #[inline]
    pub const fn permissions(self) -> Result<Permissions, CorruptedEntry> {
        Permissions::decode(self.0)
    }

    /// Same frame and hardware state bits, new permissions.
    #[inline]
    #[must_use]
    pub const fn with_permissions(self, perms: Permissions) -> Self {
        Self(perms.apply(self.0))
    }

    /// Same permissions and state bits, different frame.
    #[inline]
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalPage<Size4K>) -> Self {
        Self(self.0.with_physical_page(frame))
    }
}

/// 512 entries, 4 KiB aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageTableEntry::zero(); ENTRIES],
        }
    }

    /// Clear all entries.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::zero());
    }

    /// Plain load; does not imply any TLB synchronization.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageTableEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn get_mut(&mut self, i: TableIndex) -> &mut PageTableEntry {
        &mut self.entries[i.as_usize()]
    }

    /// Plain store; the caller handles TLB invalidation.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageTableEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    pub const fn set_zero(&mut self, i: TableIndex) {
        self.set(i, PageTableEntry::zero());
    }

    /// Iterate over the entries that are not entirely zero.
    pub fn iter_used(&self) -> impl Iterator<Item = (TableIndex, PageTableEntry)> + '_ {
        TableIndex::all()
            .map(|i| (i, self.get(i)))
            .filter(|(_, e)| !e.is_zero())
    }
}

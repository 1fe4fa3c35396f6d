use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// A single 64-bit x86-64 page table entry in its raw bitfield form.
///
/// This is the common superset of the fields found at all four paging levels
/// (PML4E, PDPTE, PDE, PTE). Only 4 KiB mappings are ever created, so `PS`
/// stays clear everywhere.
///
/// ### Bit layout
///
/// | Bits      | Name              | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P`               | Present |
/// | 1         | `RW`              | Writable |
/// | 2         | `US`              | User-mode accessible |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (leaf only) |
/// | 7         | `PS` / `PAT`      | Large page (never set here) |
/// | 8         | `G`               | Global (leaf only) |
/// | 9         | `COW`             | Software: copy-on-write pending |
/// | 10–11     | OS avail low      | Free for OS use |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Free for OS use |
/// | 59–62     | `PKU`             | Protection key or OS use |
/// | 63        | `NX`              | Execute disable |
///
/// `writable` and `copy_on_write` are never set together on a leaf that
/// this crate wrote; see [`Permissions`](crate::Permissions).
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// # use kernel_vmem::PageEntryBits;
/// let page = PhysicalPage::<Size4K>::from_number(0x12);
/// let e = PageEntryBits::new().with_present(true).with_physical_page(page);
/// assert!(e.present());
/// assert_eq!(e.physical_page(), page);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Permissions intersect over the walk; CR0.WP makes this binding for
    /// supervisor stores as well.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on the first write through a leaf.
    pub dirty: bool,

    /// Page Size (PS, bit 7). Always clear.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// Copy-on-write (bit 9, OS-available).
    ///
    /// Ignored by the MMU. Marks a read-only leaf whose frame is shared; a
    /// store must first obtain a private copy.
    pub copy_on_write: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available_low: u8,

    /// Physical address bits [51:12].
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (bits 59..=62) if PKU is enabled; otherwise OS use.
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage<Size4K>) {
        self.set_phys_addr_bits_51_12(page.number());
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_page(mut self, page: PhysicalPage<Size4K>) -> Self {
        self.set_physical_page(page);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(self.phys_addr_bits_51_12())
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        self.physical_page().base()
    }

    /// Flags for a link to a next-level table.
    ///
    /// Non-leaf entries are maximally permissive (present, writable, user);
    /// the leaf decides what an access may actually do.
    #[inline]
    #[must_use]
    pub const fn new_table_link() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }
}

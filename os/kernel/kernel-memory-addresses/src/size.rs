use core::fmt;
use core::hash::Hash;

mod sealed {
    pub trait Sealed {}
}

/// Granularity of a page.
///
/// Sealed: frames are owned, counted and copied in whole 4 KiB units, so
/// [`Size4K`] is the only implementor.
pub trait PageSize: sealed::Sealed + Copy + Eq + Ord + Hash + fmt::Debug {
    /// Bytes per page.
    const SIZE: u64;
    /// Number of low address bits that select a byte inside the page.
    const SHIFT: u32;
    /// Suffix used when printing pages.
    const LABEL: &'static str;
    /// The in-page bits of an address.
    const MASK: u64 = Self::SIZE - 1;
}

/// 4 KiB page.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;

impl sealed::Sealed for Size4K {}

impl PageSize for Size4K {
    const SIZE: u64 = 4096;
    const SHIFT: u32 = 12;
    const LABEL: &'static str = "4K";
}

const _: () = assert!(1 << Size4K::SHIFT == Size4K::SIZE);

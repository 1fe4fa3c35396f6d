use crate::{PageOffset, PageSize, PhysicalPage, VirtualPage};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Both address kinds share one shape; only the page type they split into
/// and the debug tag differ.
macro_rules! address {
    ($(#[$meta:meta])* $name:ident => $page:ident, $tag:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            #[inline]
            #[must_use]
            pub const fn zero() -> Self {
                Self(0)
            }

            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// The page of size `S` this address falls into.
            #[inline]
            #[must_use]
            pub const fn page<S: PageSize>(self) -> $page<S> {
                $page::<S>::containing_address(self)
            }

            #[inline]
            #[must_use]
            pub const fn offset<S: PageSize>(self) -> PageOffset<S> {
                PageOffset::of(self.0)
            }

            /// Page plus in-page offset; `join` on the page puts them back together.
            #[inline]
            #[must_use]
            pub const fn split<S: PageSize>(self) -> ($page<S>, PageOffset<S>) {
                (self.page::<S>(), self.offset::<S>())
            }

            #[inline]
            #[must_use]
            pub const fn is_aligned<S: PageSize>(self) -> bool {
                self.0 & S::MASK == 0
            }

            #[inline]
            #[must_use]
            pub const fn checked_add(self, bytes: u64) -> Option<Self> {
                match self.0.checked_add(bytes) {
                    Some(raw) => Some(Self(raw)),
                    None => None,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "(0x{:016X})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:016X}", self.0)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(addr: $name) -> Self {
                addr.0
            }
        }

        impl Add<u64> for $name {
            type Output = Self;

            #[inline]
            fn add(self, bytes: u64) -> Self {
                Self(self.0 + bytes)
            }
        }

        impl AddAssign<u64> for $name {
            #[inline]
            fn add_assign(&mut self, bytes: u64) {
                self.0 += bytes;
            }
        }
    };
}

address! {
    /// Physical address of RAM.
    ///
    /// Carries intent only. Whether the address lies inside the managed
    /// frame range is the frame allocator's business.
    PhysicalAddress => PhysicalPage, "PA"
}

address! {
    /// Virtual address as seen through some address space's page tables.
    ///
    /// Canonicality is not checked; callers compare against the user
    /// ceiling from `kernel-info` where it matters.
    VirtualAddress => VirtualPage, "VA"
}

use crate::{PageOffset, PageSize, PhysicalAddress, VirtualAddress};
use core::fmt;
use core::marker::PhantomData;

/// A page is stored as its number, so it is aligned by construction.
macro_rules! page {
    ($(#[$meta:meta])* $name:ident => $addr:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name<S: PageSize> {
            number: u64,
            size: PhantomData<S>,
        }

        impl<S: PageSize> $name<S> {
            /// The page holding `addr`.
            #[inline]
            #[must_use]
            pub const fn containing_address(addr: $addr) -> Self {
                Self::from_number(addr.as_u64() >> S::SHIFT)
            }

            /// Page number `number`, i.e. the page starting at `number * S::SIZE`.
            #[inline]
            #[must_use]
            pub const fn from_number(number: u64) -> Self {
                Self {
                    number,
                    size: PhantomData,
                }
            }

            #[inline]
            #[must_use]
            pub const fn number(self) -> u64 {
                self.number
            }

            #[inline]
            #[must_use]
            pub const fn base(self) -> $addr {
                $addr::new(self.number << S::SHIFT)
            }

            #[inline]
            #[must_use]
            pub const fn join(self, offset: PageOffset<S>) -> $addr {
                $addr::new((self.number << S::SHIFT) | offset.as_u64())
            }

            /// The following page, or `None` if this is the last one.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Option<Self> {
                if self.number < u64::MAX >> S::SHIFT {
                    Some(Self::from_number(self.number + 1))
                } else {
                    None
                }
            }
        }

        impl<S: PageSize> fmt::Display for $name<S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}/{}", self.base(), S::LABEL)
            }
        }

        impl<S: PageSize> fmt::Debug for $name<S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "<{}>(#{:#x})"), S::LABEL, self.number)
            }
        }

        /// Only addresses on a page boundary convert; the error hands the
        /// address back.
        impl<S: PageSize> TryFrom<$addr> for $name<S> {
            type Error = $addr;

            fn try_from(addr: $addr) -> Result<Self, $addr> {
                if addr.is_aligned::<S>() {
                    Ok(Self::containing_address(addr))
                } else {
                    Err(addr)
                }
            }
        }

        impl<S: PageSize> From<$name<S>> for $addr {
            #[inline]
            fn from(page: $name<S>) -> Self {
                page.base()
            }
        }
    };
}

page! {
    /// A physical frame of size `S`.
    ///
    /// ```rust
    /// # use kernel_memory_addresses::*;
    /// let frame = PhysicalAddress::new(0x0008_1234).page::<Size4K>();
    /// assert_eq!(frame.base().as_u64(), 0x0008_1000);
    /// assert_eq!(frame.number(), 0x81);
    /// ```
    PhysicalPage => PhysicalAddress, "PhysicalPage"
}

page! {
    /// A virtual page of size `S`.
    VirtualPage => VirtualAddress, "VirtualPage"
}

use crate::PageSize;
use core::fmt;
use core::marker::PhantomData;

/// Byte position inside a page of size `S`; always below `S::SIZE`.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageOffset<S: PageSize> {
    value: u64,
    size: PhantomData<S>,
}

impl<S: PageSize> PageOffset<S> {
    /// The in-page bits of `raw`; everything above them is dropped.
    #[inline]
    #[must_use]
    pub const fn of(raw: u64) -> Self {
        Self {
            value: raw & S::MASK,
            size: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.value
    }

    /// Bytes from here to the end of the page. Never zero.
    #[inline]
    #[must_use]
    pub const fn remaining(self) -> u64 {
        S::SIZE - self.value
    }
}

impl<S: PageSize> fmt::Debug for PageOffset<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:#x}/{}", self.value, S::LABEL)
    }
}

//! # Managed frames
//!
//! [`ManagedRange`] is the physical range the allocator owns,
//! `[kernel_end, phys_top)` rounded inward to page boundaries. [`Frame`] is a
//! page of that range; the only ways to get one are
//! [`ManagedRange::frame`] (validated) and the allocator itself.

use core::fmt;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};

/// Why a physical address is not a managed frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("{0} is not page aligned")]
    Misaligned(PhysicalAddress),
    #[error("{addr} lies below the managed range starting at {start}")]
    BelowKernelEnd {
        addr: PhysicalAddress,
        start: PhysicalAddress,
    },
    #[error("{addr} lies at or above the managed range ending at {end}")]
    AbovePhysTop {
        addr: PhysicalAddress,
        end: PhysicalAddress,
    },
}

/// A page-aligned frame inside a [`ManagedRange`].
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Frame(PhysicalPage<Size4K>);

impl Frame {
    /// Caller guarantees `page` lies in the managed range.
    #[inline]
    pub(crate) const fn new_unchecked(page: PhysicalPage<Size4K>) -> Self {
        Self(page)
    }

    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage<Size4K> {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.0.base()
    }

    /// Global frame index, `address / PAGE_SIZE`.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0.number()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(#{:#x} @ {})", self.number(), self.base())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Frame> for PhysicalPage<Size4K> {
    #[inline]
    fn from(value: Frame) -> Self {
        value.0
    }
}

/// Physical frames owned by the allocator, `[start, end)` in frame numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ManagedRange {
    start: u64,
    end: u64,
}

impl ManagedRange {
    /// Frames between the end of the kernel image and the top of RAM.
    ///
    /// `kernel_end` is rounded up and `phys_top` rounded down to page
    /// boundaries. An inverted range yields an empty one.
    #[must_use]
    pub const fn new(kernel_end: PhysicalAddress, phys_top: PhysicalAddress) -> Self {
        let start = kernel_end.as_u64().div_ceil(Size4K::SIZE);
        let end = phys_top.as_u64() / Size4K::SIZE;
        Self {
            start,
            end: if end < start { start } else { end },
        }
    }

    /// First managed address.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.start * Size4K::SIZE)
    }

    /// Exclusive end of the managed addresses.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.end * Size4K::SIZE)
    }

    /// Number of frames.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Validate `addr` as a managed frame.
    ///
    /// # Errors
    /// [`FrameError`] if `addr` is misaligned or outside the range.
    pub fn frame(&self, addr: PhysicalAddress) -> Result<Frame, FrameError> {
        let page = PhysicalPage::<Size4K>::try_from(addr).map_err(FrameError::Misaligned)?;
        if page.number() < self.start {
            return Err(FrameError::BelowKernelEnd {
                addr,
                start: self.start(),
            });
        }
        if page.number() >= self.end {
            return Err(FrameError::AbovePhysTop {
                addr,
                end: self.end(),
            });
        }
        Ok(Frame::new_unchecked(page))
    }

    /// Same as [`frame`](Self::frame) for an already aligned page.
    ///
    /// # Errors
    /// [`FrameError`] if `page` is outside the range.
    #[inline]
    pub fn frame_of(&self, page: PhysicalPage<Size4K>) -> Result<Frame, FrameError> {
        self.frame(page.base())
    }

    /// Position of `frame` in per-frame tables.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(&self, frame: Frame) -> usize {
        debug_assert!(frame.number() >= self.start && frame.number() < self.end);
        (frame.number() - self.start) as usize
    }

    /// All frames, ascending.
    pub fn frames(&self) -> impl DoubleEndedIterator<Item = Frame> + use<> {
        (self.start..self.end).map(|n| Frame::new_unchecked(PhysicalPage::from_number(n)))
    }
}

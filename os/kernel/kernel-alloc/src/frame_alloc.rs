//! # Reference-counted physical frame allocator
//!
//! Two pieces of shared state, each behind its own [`SpinLock`]:
//!
//! - `kmem`: the free pool, an intrusive singly linked list threaded through
//!   the first word of every free frame (no heap needed for the pool itself).
//! - `refcnt`: one `u32` per managed frame, the number of live mappings.
//!
//! At most one of the two locks is held at any time and neither is held
//! while a frame is being filled with a debug pattern.
//!
//! ```text
//!          allocate()                   retain()/inc_ref()
//!  ┌──────┐ ───────────► ┌───────────┐ ───────────────────► ┌───────────┐
//!  │ free │   count = 1  │ live (1)  │                      │ live (n)  │
//!  │ (0)  │ ◄─────────── └───────────┘ ◄─────────────────── └───────────┘
//!  └──────┘  release()                    release()/dec_ref()
//!           count 1 → 0                      count n → n-1
//! ```
//!
//! Bookkeeping violations (an address that is not a managed frame, a count
//! dropping below zero, retaining a free frame) mean the kernel's own state is
//! corrupt. They are logged and then panic.

use crate::frame::{Frame, FrameError, ManagedRange};
use alloc::boxed::Box;
use alloc::vec;
use kernel_info::memory::{ALLOC_FILL_BYTE, FREE_FILL_BYTE, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::{error, trace, warn};

/// The free pool is empty.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("out of physical memory")]
pub struct OutOfMemory;

/// Link value terminating the free list.
const NIL: u64 = u64::MAX;

#[allow(clippy::cast_possible_truncation)]
type FrameBytes = [u8; PAGE_SIZE as usize];

struct FreeList {
    head: Option<Frame>,
    len: usize,
}

/// Physical frame allocator with per-frame reference counts.
pub struct FrameAllocator<'m, M: PhysMapper> {
    mapper: &'m M,
    range: ManagedRange,
    free: SpinLock<FreeList>,
    refs: SpinLock<Box<[u32]>>,
}

impl<'m, M: PhysMapper> FrameAllocator<'m, M> {
    /// Take ownership of `range` and put every frame in it into the free pool.
    ///
    /// Every frame is scrubbed with the free pattern and starts with a count
    /// of zero. Frames are handed out in ascending address order afterwards.
    pub fn new(mapper: &'m M, range: ManagedRange) -> Self {
        let this = Self {
            mapper,
            range,
            free: SpinLock::named("kmem", FreeList { head: None, len: 0 }),
            refs: SpinLock::named("refcnt", vec![0; range.len()].into_boxed_slice()),
        };
        for frame in range.frames().rev() {
            this.fill(frame, FREE_FILL_BYTE);
            this.push_free(frame);
        }
        this
    }

    #[inline]
    #[must_use]
    pub const fn range(&self) -> &ManagedRange {
        &self.range
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Frames currently in the free pool.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.free.with_lock(|fl| fl.len)
    }

    /// Frames managed in total.
    #[inline]
    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.range.len()
    }

    /// Remove one frame from the free pool.
    ///
    /// The frame is filled with the allocation pattern and its count is 1.
    ///
    /// # Errors
    /// [`OutOfMemory`] if the pool is empty. Never waits.
    pub fn allocate(&self) -> Result<Frame, OutOfMemory> {
        let Some(frame) = self.pop_free() else {
            warn!(
                "frame allocator exhausted ({} frames managed)",
                self.total_frames()
            );
            return Err(OutOfMemory);
        };

        self.fill(frame, ALLOC_FILL_BYTE);

        let i = self.range.index_of(frame);
        self.refs.with_lock(|refs| {
            debug_assert_eq!(refs[i], 0, "frame {frame} left the free pool while referenced");
            refs[i] = 1;
        });
        Ok(frame)
    }

    /// Drop one reference to `frame`; the last one returns it to the pool.
    ///
    /// A frame whose count reaches zero is scrubbed with the free pattern
    /// before it becomes allocatable again.
    ///
    /// # Panics
    /// If the count is already zero (double free).
    pub fn release(&self, frame: Frame) {
        if self.decrement(frame) > 0 {
            return;
        }
        trace!("frame {frame} returned to the free pool");
        self.fill(frame, FREE_FILL_BYTE);
        self.push_free(frame);
    }

    /// Add one reference to a live frame.
    ///
    /// # Panics
    /// If the frame is in the free pool or the count would overflow.
    pub fn retain(&self, frame: Frame) {
        let i = self.range.index_of(frame);
        self.refs.with_lock(|refs| {
            let count = &mut refs[i];
            if *count == 0 {
                error!("retain on free frame {frame}");
                panic!("reference added to a frame in the free pool");
            }
            let Some(next) = count.checked_add(1) else {
                error!("reference count of frame {frame} overflows");
                panic!("reference count overflow");
            };
            *count = next;
        });
    }

    /// Current count of `frame`.
    #[must_use]
    pub fn frame_ref_count(&self, frame: Frame) -> u32 {
        let i = self.range.index_of(frame);
        self.refs.with_lock(|refs| refs[i])
    }

    /// Release the frame at `addr`.
    ///
    /// # Panics
    /// If `addr` is not a managed frame, or on double free.
    pub fn free(&self, addr: PhysicalAddress) {
        self.release(self.checked("free", addr));
    }

    /// Reference count of the frame at `addr`.
    ///
    /// # Panics
    /// If `addr` is not a managed frame.
    #[must_use]
    pub fn ref_count(&self, addr: PhysicalAddress) -> u32 {
        self.frame_ref_count(self.checked("ref_count", addr))
    }

    /// Add a reference to the frame at `addr`.
    ///
    /// # Panics
    /// If `addr` is not a managed frame or the frame is free.
    pub fn inc_ref(&self, addr: PhysicalAddress) {
        self.retain(self.checked("inc_ref", addr));
    }

    /// Remove a reference from the frame at `addr` and return the new count.
    ///
    /// This does not reclaim the frame at zero; [`free`](Self::free) does.
    ///
    /// # Panics
    /// If `addr` is not a managed frame or the count is already zero.
    pub fn dec_ref(&self, addr: PhysicalAddress) -> u32 {
        self.decrement(self.checked("dec_ref", addr))
    }

    /// Validate `addr` once at an address-taking entry point.
    fn checked(&self, op: &str, addr: PhysicalAddress) -> Frame {
        match self.range.frame(addr) {
            Ok(frame) => frame,
            Err(e) => invalid_frame(op, e),
        }
    }

    fn decrement(&self, frame: Frame) -> u32 {
        let i = self.range.index_of(frame);
        self.refs.with_lock(|refs| {
            let count = &mut refs[i];
            let Some(next) = count.checked_sub(1) else {
                error!("reference count of frame {frame} would drop below zero");
                panic!("reference count underflow (double free?)");
            };
            *count = next;
            next
        })
    }

    fn pop_free(&self) -> Option<Frame> {
        self.free.with_lock(|fl| {
            let frame = fl.head?;
            let next = *unsafe { self.link(frame) };
            fl.head = self.decode_link(next);
            fl.len -= 1;
            Some(frame)
        })
    }

    fn push_free(&self, frame: Frame) {
        self.free.with_lock(|fl| {
            *unsafe { self.link(frame) } = fl.head.map_or(NIL, |f| f.base().as_u64());
            fl.head = Some(frame);
            fl.len += 1;
        });
    }

    fn decode_link(&self, raw: u64) -> Option<Frame> {
        if raw == NIL {
            return None;
        }
        match self.range.frame(PhysicalAddress::new(raw)) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("free list link {raw:#x} is corrupt: {e}");
                panic!("free list corrupted");
            }
        }
    }

    /// The link word of a free frame.
    ///
    /// # Safety
    /// `frame` must be in the free pool (or about to be pushed) and the
    /// `kmem` lock must be held.
    unsafe fn link<'a>(&self, frame: Frame) -> &'a mut u64 {
        unsafe { self.mapper.phys_to_mut::<u64>(frame.base()) }
    }

    fn fill(&self, frame: Frame, byte: u8) {
        // The frame is exclusively ours: just dequeued or about to be queued.
        let bytes = unsafe { self.mapper.phys_to_mut::<FrameBytes>(frame.base()) };
        bytes.fill(byte);
    }
}

#[cold]
fn invalid_frame(op: &str, e: FrameError) -> ! {
    error!("{op}: {e}");
    panic!("{op}: invalid frame address: {e}");
}

/// Page-table frames come from the same pool as everything else.
impl<M: PhysMapper> FrameAlloc for FrameAllocator<'_, M> {
    fn alloc_4k(&self) -> Option<PhysicalPage<Size4K>> {
        self.allocate().ok().map(Frame::page)
    }

    fn free_4k(&self, page: PhysicalPage<Size4K>) {
        self.free(page.base());
    }
}

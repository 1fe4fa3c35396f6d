//! # Kernel Physical Memory Allocation
//!
//! Reference-counted physical frames and the per-process memory operations
//! built on top of them.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Vmm (memory context)                │
//! │    • create / destroy user address spaces           │
//! │    • anonymous mappings, unmapping                  │
//! │    • frame content access through the PhysMapper    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                FrameAllocator                       │
//! │    • intrusive free list ("kmem" lock)              │
//! │    • per-frame reference counts ("refcnt" lock)     │
//! │    • debug fill patterns on allocate / final free   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           ManagedRange / Frame                      │
//! │    • [kernel_end, phys_top), page granular          │
//! │    • validated address → frame conversion           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reference counts
//!
//! A frame's count is the number of present leaf mappings pointing at it
//! (page-table frames count their single owner). A frame is in the free pool
//! exactly when its count is zero.
//!
//! ## Two kinds of failure
//!
//! * Running out of frames is an ordinary [`OutOfMemory`](frame_alloc::OutOfMemory)
//!   value; the caller picks the policy.
//! * Handing back an address that is not a managed frame, or dropping a count
//!   below zero, means kernel bookkeeping is corrupt and panics after logging.
//!
//! ## Usage
//! ```rust
//! # use kernel_alloc::frame::ManagedRange;
//! # use kernel_alloc::frame_alloc::FrameAllocator;
//! # use kernel_memory_addresses::PhysicalAddress;
//! # use kernel_vmem::PhysMapper;
//! # #[repr(align(4096))] struct Ram([u8; 4 * 4096]);
//! # struct Identity(std::cell::UnsafeCell<Ram>);
//! # impl PhysMapper for Identity {
//! #     unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
//! #         unsafe { &mut *self.0.get().cast::<u8>().add(pa.as_u64() as usize).cast() }
//! #     }
//! # }
//! # let ram = Identity(std::cell::UnsafeCell::new(Ram([0; 4 * 4096])));
//! let range = ManagedRange::new(PhysicalAddress::new(0x1000), PhysicalAddress::new(0x4000));
//! let frames = FrameAllocator::new(&ram, range);
//! assert_eq!(frames.free_frames(), 3);
//!
//! let f = frames.allocate().unwrap();
//! assert_eq!(frames.frame_ref_count(f), 1);
//! frames.retain(f);
//! frames.release(f);
//! frames.release(f);
//! assert_eq!(frames.free_frames(), 3);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod frame;
pub mod frame_alloc;
pub mod vmm;

pub use frame::{Frame, FrameError, ManagedRange};
pub use frame_alloc::{FrameAllocator, OutOfMemory};
pub use vmm::{Vmm, VmmError};

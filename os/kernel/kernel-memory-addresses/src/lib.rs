//! # Typed Addresses
//!
//! `u64` newtypes that keep physical and virtual addresses apart at compile
//! time, together with the page views the frame allocator and the fork path
//! hand around.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | RAM; a physical page is a frame. |
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Addresses translated by page tables. |
//! | [`PageOffset<S>`] | Byte position inside a page. |
//!
//! Pages come in one size, [`Size4K`].
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0000_0000_0040_1ff0);
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.number(), 0x401);
//! assert_eq!(off.remaining(), 0x10);
//! assert_eq!(page.join(off), va);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod address;
mod offset;
mod page;
mod size;

pub use address::{PhysicalAddress, VirtualAddress};
pub use offset::PageOffset;
pub use page::{PhysicalPage, VirtualPage};
pub use size::{PageSize, Size4K};

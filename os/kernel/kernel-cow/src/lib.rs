//! # Copy-on-Write Process Memory
//!
//! Duplication of a user address space that shares frames instead of copying
//! them, and the fault path that makes a private copy once somebody writes.
//!
//! ```text
//!   fork_address_space()            store fault / copy_out()
//!  ┌─────────────────────┐         ┌──────────────────────────┐
//!  │ parent RW  → COW    │         │ COW leaf, count n        │
//!  │ child maps same     │ ──────► │  → new frame, copy bytes │
//!  │ frame, count + 1    │         │  → leaf RW, old count −1 │
//!  └─────────────────────┘         └──────────────────────────┘
//! ```
//!
//! ## Modules
//! - [`fork`]: [`duplicate`] and [`fork_address_space`].
//! - [`cow`]: [`resolve_cow_fault`], the per-page resolver.
//! - [`fault`]: page fault classification for trap dispatch; never kills a
//!   process itself, it returns a [`FaultOutcome`].
//! - [`usercopy`]: kernel reads and writes of user memory that honor
//!   copy-on-write and lazy allocation.
//! - [`lazy`]: the [`LazyAlloc`] collaborator and a zero-fill pager.
//!
//! Everything here works on a [`Vmm`](kernel_alloc::Vmm) context and any
//! [`PageMap`](kernel_vmem::PageMap); nothing touches global state.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod cow;
pub mod fault;
pub mod fork;
pub mod lazy;
pub mod usercopy;

pub use cow::{CowFaultError, resolve_cow_fault};
pub use fault::{FaultOutcome, KillReason, PageFault, PageFaultError, handle_page_fault};
pub use fork::{ForkError, duplicate, fork_address_space};
pub use lazy::{LazyAlloc, LazyError, NoPager, ZeroFillPager};
pub use usercopy::{CopyError, copy_in, copy_in_str, copy_out};

use kernel_memory_addresses::{Size4K, VirtualPage};
use kernel_vmem::{PageTableEntry, Permissions};
use log::error;

/// Permissions of a present leaf.
///
/// # Panics
/// If the entry is writable and copy-on-write at once; nothing in the kernel
/// writes such an entry.
pub(crate) fn leaf_permissions(entry: PageTableEntry, page: VirtualPage<Size4K>) -> Permissions {
    match entry.permissions() {
        Ok(perms) => perms,
        Err(e) => {
            error!("leaf of {page} is corrupt: {e}");
            panic!("corrupted page table entry: {e}");
        }
    }
}

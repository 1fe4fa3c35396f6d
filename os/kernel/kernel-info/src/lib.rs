//! # Kernel Memory Configuration
//!
//! Compile-time constants shared by the frame allocator, the page-table code
//! and the copy-on-write machinery. Everything here is a `const`; values that
//! are only known at boot (the end of the kernel image, the top of installed
//! RAM) are passed to the allocator explicitly at construction time.
//!
//! ```text
//! Physical Memory Layout:
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1MiB)         │
//! PHYS_LOAD   ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!             │       Kernel Image              │
//! kernel end  ├─────────────────────────────────┤ (linker symbol, boot time)
//!             │    Managed RAM                  │
//!             │  (reference-counted frames)     │
//! phys top    └─────────────────────────────────┘ (DEFAULT_PHYS_TOP unless told otherwise)
//!
//! Virtual Memory Layout (per process):
//! 0x0000_0000_0000_0000 ┌─────────────────────────┐
//!                       │ user pages [0, size)    │
//! USER_VA_CEILING       ├─────────────────────────┤ 0x0000_8000_0000_0000
//!                       │ non-canonical / kernel  │
//!                       └─────────────────────────┘
//! ```
//!
//! The fill patterns are written by the allocator on every allocation and
//! every final release so stale or uninitialized reads show up as obvious
//! byte patterns instead of plausible data.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;

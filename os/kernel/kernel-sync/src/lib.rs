//! # Kernel synchronization primitives
//!
//! Only what the memory subsystem needs: a named test-and-test-and-set
//! [`SpinLock`]. Critical sections guarded by it are short and must not
//! block, sleep, or take another spin lock.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};

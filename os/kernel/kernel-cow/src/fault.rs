//! # Page fault classification
//!
//! Trap entry reads CR2 and the error code the CPU pushed and hands both to
//! [`handle_page_fault`]. The verdict is either [`FaultOutcome::Resolved`]
//! (return to user mode and retry the access) or
//! [`FaultOutcome::Terminate`]; killing the process is up to the caller.
//!
//! Order of attempts:
//!
//! 1. A store to a present page is tried as a copy-on-write fault. Running out
//!    of memory there terminates; any other rejection falls through.
//! 2. A fault on a non-present page is offered to the lazy allocator.
//! 3. Everything else terminates.

use crate::cow::{CowFaultError, resolve_cow_fault};
use crate::lazy::{LazyAlloc, LazyError};
use bitfield_struct::bitfield;
use kernel_alloc::Vmm;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{PageMap, PhysMapper};
use log::{trace, warn};

/// Page-fault error code layout (x86-64).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15.1 “Page-Fault Exception (#PF)”.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(57)]
    __: u64,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (page not mapped or swapped out)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page (likely NX or SMEP)"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }

    /// A store that hit a present page: the copy-on-write candidate.
    #[inline]
    #[must_use]
    pub const fn is_protection_store(&self) -> bool {
        self.present() && self.write() && !self.instruction_fetch()
    }
}

/// One page fault as reported by the CPU.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageFault {
    /// Faulting linear address (CR2).
    pub address: VirtualAddress,
    pub error: PageFaultError,
}

impl PageFault {
    #[inline]
    #[must_use]
    pub const fn new(address: VirtualAddress, error: PageFaultError) -> Self {
        Self { address, error }
    }
}

/// Why the faulting process has to go.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum KillReason {
    #[error("out of memory while handling a fault at {0}")]
    OutOfMemory(VirtualAddress),
    #[error("illegal access at {address}: {}", .error.explain())]
    IllegalAccess {
        address: VirtualAddress,
        error: PageFaultError,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultOutcome {
    Resolved,
    Terminate(KillReason),
}

/// Classify a user page fault and try to resolve it.
pub fn handle_page_fault<M, P, L>(
    vmm: &Vmm<'_, M>,
    space: &mut P,
    fault: PageFault,
    lazy: &mut L,
) -> FaultOutcome
where
    M: PhysMapper,
    P: PageMap,
    L: LazyAlloc,
{
    let PageFault { address, error } = fault;

    if error.is_protection_store() {
        match resolve_cow_fault(vmm, space, address) {
            Ok(()) => return FaultOutcome::Resolved,
            Err(CowFaultError::OutOfMemory) => {
                return FaultOutcome::Terminate(KillReason::OutOfMemory(address));
            }
            Err(e) => trace!("store fault at {address} is not copy-on-write: {e}"),
        }
    }

    if !error.present() {
        match lazy.back_page(vmm, space, address) {
            Ok(()) => return FaultOutcome::Resolved,
            Err(LazyError::OutOfMemory) => {
                return FaultOutcome::Terminate(KillReason::OutOfMemory(address));
            }
            Err(e) => trace!("lazy allocation at {address} declined: {e}"),
        }
    }

    let reason = KillReason::IllegalAccess { address, error };
    warn!("page fault (error {:#x}): {reason}", error.into_bits());
    FaultOutcome::Terminate(reason)
}

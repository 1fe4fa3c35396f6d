//! # TLB maintenance
//!
//! On bare-metal x86-64 this issues `invlpg`. Hosted builds (unit tests,
//! tooling) have no TLB to manage and compile it to nothing.

use kernel_memory_addresses::{Size4K, VirtualPage};

/// Drop any cached translation of `page` on the current CPU.
///
/// Must be called after a live leaf loses permissions or changes frames.
/// Other CPUs running the same address space need a shootdown, which is the
/// scheduler's business.
#[inline]
pub fn invalidate_page(page: VirtualPage<Size4K>) {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    unsafe {
        core::arch::asm!(
            "invlpg [{}]",
            in(reg) page.base().as_u64(),
            options(nostack, preserves_flags)
        );
    }

    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    let _ = page;
}

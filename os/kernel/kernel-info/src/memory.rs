//! # Memory Layout

use kernel_memory_addresses::{PageSize, Size4K};

/// Size of one frame / page in bytes.
pub const PAGE_SIZE: u64 = Size4K::SIZE;

/// Where the kernel image is placed in *physical* memory.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Default exclusive upper bound of managed physical RAM (128 MiB).
///
/// Boot code overrides this with the top of the largest usable region of the
/// firmware memory map when it knows better.
pub const DEFAULT_PHYS_TOP: u64 = PHYS_LOAD + 128 * 1024 * 1024;

/// Exclusive ceiling of user virtual addresses.
///
/// Everything at or above this address is either non-canonical or belongs to
/// the kernel half; copy-on-write faults there are rejected outright.
pub const USER_VA_CEILING: u64 = 0x0000_8000_0000_0000;

/// Byte pattern written over a frame when it is handed out.
pub const ALLOC_FILL_BYTE: u8 = 0x05;

/// Byte pattern written over a frame when its last reference goes away.
pub const FREE_FILL_BYTE: u8 = 0x01;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(PHYS_LOAD.is_multiple_of(PAGE_SIZE));
    assert!(DEFAULT_PHYS_TOP.is_multiple_of(PAGE_SIZE));
    assert!(USER_VA_CEILING.is_multiple_of(PAGE_SIZE));
    assert!(ALLOC_FILL_BYTE != FREE_FILL_BYTE);
};

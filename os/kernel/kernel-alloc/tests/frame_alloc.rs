mod common;

use common::{KERNEL_FRAMES, PAGE, TestRam};
use kernel_alloc::{Frame, FrameAllocator, OutOfMemory};
use kernel_info::memory::{ALLOC_FILL_BYTE, FREE_FILL_BYTE};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::FrameAlloc;
use std::sync::Barrier;
use std::thread;

fn pa(frame: u64) -> PhysicalAddress {
    PhysicalAddress::new(frame * PAGE as u64)
}

/// Number of managed frames whose count is zero.
fn zero_counts(frames: &FrameAllocator<'_, TestRam>) -> usize {
    frames
        .range()
        .frames()
        .filter(|&f| frames.frame_ref_count(f) == 0)
        .count()
}

#[test]
fn new_allocator_has_everything_free() {
    let ram = TestRam::with_frames(16);
    let frames = ram.allocator();

    assert_eq!(frames.total_frames(), 16 - KERNEL_FRAMES as usize);
    assert_eq!(frames.free_frames(), frames.total_frames());
    assert_eq!(zero_counts(&frames), frames.total_frames());

    // Scrubbed on the way into the pool; the first word holds the link.
    let bytes = ram.bytes(pa(KERNEL_FRAMES));
    assert!(bytes[8..].iter().all(|&b| b == FREE_FILL_BYTE));
}

#[test]
fn allocate_fills_and_counts_one() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();

    let f = frames.allocate().unwrap();
    assert_eq!(f.number(), KERNEL_FRAMES);
    assert_eq!(frames.frame_ref_count(f), 1);
    assert_eq!(frames.ref_count(f.base()), 1);
    assert!(ram.bytes(f.base()).iter().all(|&b| b == ALLOC_FILL_BYTE));
    assert_eq!(frames.free_frames(), frames.total_frames() - 1);
}

#[test]
fn exhaustion_is_an_error_not_a_wait() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();

    let got: Vec<Frame> = (0..frames.total_frames())
        .map(|_| frames.allocate().unwrap())
        .collect();
    let numbers: Vec<u64> = got.iter().map(|f| f.number()).collect();
    assert_eq!(numbers, (KERNEL_FRAMES..8).collect::<Vec<_>>());

    assert_eq!(frames.allocate(), Err(OutOfMemory));
    assert_eq!(frames.free_frames(), 0);

    frames.release(got[2]);
    assert_eq!(frames.allocate(), Ok(got[2]));
}

#[test]
fn shared_frame_survives_until_last_reference() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();

    let f = frames.allocate().unwrap();
    frames.inc_ref(f.base());
    frames.inc_ref(f.base());
    assert_eq!(frames.ref_count(f.base()), 3);

    let before = frames.free_frames();
    frames.free(f.base());
    frames.free(f.base());
    assert_eq!(frames.ref_count(f.base()), 1);
    assert_eq!(frames.free_frames(), before);
    // Still the allocation pattern: nobody scrubbed it.
    assert!(ram.bytes(f.base()).iter().all(|&b| b == ALLOC_FILL_BYTE));

    frames.free(f.base());
    assert_eq!(frames.ref_count(f.base()), 0);
    assert_eq!(frames.free_frames(), before + 1);
}

#[test]
fn dec_ref_returns_new_count() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();

    let f = frames.allocate().unwrap();
    frames.inc_ref(f.base());
    assert_eq!(frames.dec_ref(f.base()), 1);
    assert_eq!(frames.dec_ref(f.base()), 0);
    // dec_ref never reclaims.
    assert_eq!(frames.free_frames(), frames.total_frames() - 1);
}

#[test]
fn reused_frame_never_shows_previous_tenant() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();

    let f = frames.allocate().unwrap();
    let secret = [0x5Au8; PAGE];
    unsafe {
        use kernel_vmem::PhysMapper;
        *ram.phys_to_mut::<[u8; PAGE]>(f.base()) = secret;
    }

    frames.free(f.base());
    let scrubbed = ram.bytes(f.base());
    assert!(scrubbed[8..].iter().all(|&b| b == FREE_FILL_BYTE));

    // LIFO pool: the same frame comes right back.
    let g = frames.allocate().unwrap();
    assert_eq!(g, f);
    let fresh = ram.bytes(g.base());
    assert!(fresh.iter().all(|&b| b == ALLOC_FILL_BYTE));
    assert!(!fresh.contains(&0x5A));
}

#[test]
fn free_pool_iff_count_zero() {
    let ram = TestRam::with_frames(32);
    let frames = ram.allocator();

    let live: Vec<Frame> = (0..10).map(|_| frames.allocate().unwrap()).collect();
    for f in &live[..4] {
        frames.retain(*f);
    }
    for f in &live[2..7] {
        frames.release(*f);
    }
    assert_eq!(zero_counts(&frames), frames.free_frames());

    // live[2], live[3] had 2 refs: still alive. live[4..7] went back.
    assert_eq!(frames.frame_ref_count(live[2]), 1);
    assert_eq!(frames.frame_ref_count(live[5]), 0);
    assert_eq!(frames.free_frames(), frames.total_frames() - 7);
}

#[test]
fn frame_alloc_trait_uses_the_same_pool() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();

    let page = frames.alloc_4k().unwrap();
    assert_eq!(frames.ref_count(page.base()), 1);
    frames.free_4k(page);
    assert_eq!(frames.ref_count(page.base()), 0);
    assert_eq!(frames.free_frames(), frames.total_frames());
}

#[test]
#[should_panic(expected = "invalid frame address")]
fn free_misaligned_is_fatal() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();
    frames.free(PhysicalAddress::new(KERNEL_FRAMES * PAGE as u64 + 8));
}

#[test]
#[should_panic(expected = "below the managed range")]
fn free_inside_kernel_image_is_fatal() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();
    frames.free(pa(1));
}

#[test]
#[should_panic(expected = "above the managed range")]
fn free_beyond_top_is_fatal() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();
    frames.free(pa(8));
}

#[test]
#[should_panic(expected = "invalid frame address")]
fn ref_count_checks_range_too() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();
    let _ = frames.ref_count(pa(0));
}

#[test]
#[should_panic(expected = "underflow")]
fn double_free_is_fatal() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();
    let f = frames.allocate().unwrap();
    frames.free(f.base());
    frames.free(f.base());
}

#[test]
#[should_panic(expected = "underflow")]
fn dec_ref_below_zero_is_fatal() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();
    frames.dec_ref(pa(KERNEL_FRAMES));
}

#[test]
#[should_panic(expected = "free pool")]
fn inc_ref_on_free_frame_is_fatal() {
    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();
    frames.inc_ref(pa(KERNEL_FRAMES));
}

#[test]
fn concurrent_allocate_release_keeps_pool_consistent() {
    let threads = 8;
    let rounds = 500;

    let ram = TestRam::with_frames(64);
    let frames = ram.allocator();
    let total = frames.total_frames();
    let start = Barrier::new(threads);

    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                start.wait();
                for _ in 0..rounds {
                    let Ok(f) = frames.allocate() else {
                        thread::yield_now();
                        continue;
                    };
                    assert_eq!(frames.frame_ref_count(f), 1);
                    frames.retain(f);
                    frames.release(f);
                    frames.release(f);
                }
            });
        }
    });

    assert_eq!(frames.free_frames(), total);
    assert_eq!(zero_counts(&frames), total);
}

#[test]
fn concurrent_count_updates_on_one_frame_are_exact() {
    let threads = 8;
    let iters = 2_000;

    let ram = TestRam::with_frames(8);
    let frames = ram.allocator();
    let f = frames.allocate().unwrap();
    let start = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let frames = &frames;
            let start = &start;
            s.spawn(move || {
                start.wait();
                for _ in 0..iters {
                    if t % 2 == 0 {
                        frames.retain(f);
                    } else {
                        frames.retain(f);
                        frames.release(f);
                    }
                }
            });
        }
    });

    let expected = 1 + (threads as u32 / 2) * iters;
    assert_eq!(frames.frame_ref_count(f), expected);
}

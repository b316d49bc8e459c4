//! Allocator API ([MODULE H]).
//!
//! The five size-classified entry points named in spec §4.H —
//! [`get_mem`], [`alloc_mem`], [`free_mem`], [`realloc_mem`], [`mem_size`]
//! — plus the diagnostic queries of §6: [`current_heap_status`],
//! [`small_block_status`], [`small_block_contention`]. This is the only
//! module that classifies a raw request size into tiny/small/medium/large;
//! everything downstream of it is reached through [`crate::tiny`],
//! [`crate::small`], [`crate::medium`] or [`crate::large`] directly.
//!
//! Grounded on the teacher's top-level `GlobalAlloc` dispatch in `lib.rs`
//! (the only place the old scaffold routed a `Layout` to its segment/page
//! machinery), generalized from mimalloc's single size-to-page mapping to
//! this spec's four-way tiny/small/medium/large classification.

use core::ptr::NonNull;

use crate::header::*;
use crate::large;
use crate::medium;
use crate::small;
use crate::stats::HeapStatus;
use crate::tiny;

enum Owner {
    Small,
    Medium,
    Large,
}

/// Identify which manager owns a live block from its header word alone
/// (invariant 2, §3): exactly one of {neither flag}, {`IS_MEDIUM`},
/// {`IS_LARGE_OR_POOL_IN_USE`} holds.
#[inline]
unsafe fn classify(header_addr: usize) -> Owner {
    let header = *(header_addr as *const usize);
    if is_medium(header) {
        Owner::Medium
    } else if is_large_or_pool_in_use(header) {
        Owner::Large
    } else {
        Owner::Small
    }
}

/// `get_mem(size)` (§4.H): null for `size <= 0`; otherwise an
/// uninitialized block of at least `size` bytes, routed by class.
pub fn get_mem(size: isize) -> Option<NonNull<u8>> {
    if size <= 0 {
        return None;
    }
    let size = size as usize;
    if size > MAX_MEDIUM {
        return large::LARGE.alloc(size);
    }
    match small::class_for_payload(size) {
        Some(class_idx) if tiny::is_tiny_class(class_idx) => tiny::alloc(class_idx),
        Some(class_idx) => small::alloc(small::default_types(), class_idx),
        None => medium::MEDIUM.alloc(size),
    }
}

/// `alloc_mem(size)` (§4.H): as [`get_mem`], zero-filled. Large blocks skip
/// the fill — the page provider already returns zeroed memory (§4.A).
pub fn alloc_mem(size: isize) -> Option<NonNull<u8>> {
    if size <= 0 {
        return None;
    }
    let usize_size = size as usize;
    if usize_size > MAX_MEDIUM {
        return large::LARGE.alloc(usize_size);
    }
    let ptr = get_mem(size)?;
    unsafe { zero_fill(ptr.as_ptr(), usize_size) };
    Some(ptr)
}

/// `free_mem(ptr)` (§4.H): 0 on success, -1 if the header shows the block
/// is already free (double-free guard; the block is left untouched). A
/// null pointer is a no-op returning 0.
pub fn free_mem(ptr: Option<NonNull<u8>>) -> i32 {
    let ptr = match ptr {
        Some(p) => p,
        None => return 0,
    };
    let header_addr = ptr.as_ptr() as usize - HEADER_SIZE;
    let header = unsafe { *(header_addr as *const usize) };
    if is_free(header) {
        return -1;
    }
    if crate::config::report_leaks() {
        // Poison the first payload word to break a dangling vtable read,
        // per §4.H/§9 (the deref-as-vtable leak heuristic itself is out of
        // scope; only the poisoning write is carried over).
        unsafe { *(ptr.as_ptr() as *mut usize) = 0 };
    }
    match unsafe { classify(header_addr) } {
        Owner::Medium => medium::MEDIUM.free(ptr),
        Owner::Large => large::LARGE.free(ptr),
        Owner::Small => small::free(header_addr),
    }
    0
}

/// `realloc_mem(ptr, size)` (§4.H). Null `ptr` behaves as [`get_mem`];
/// `size <= 0` behaves as [`free_mem`] and reports no replacement pointer.
/// Otherwise: large blocks use [`large::LargeBlockManager::realloc`]
/// directly (§4.D); medium blocks try in-place resize first and fall back
/// to allocate-copy-free on growth that can't be satisfied from the upper
/// neighbor; small/tiny blocks shrink in place when the current slot still
/// fits, otherwise grow to the amortized next class (§4.F/§4.H).
pub fn realloc_mem(ptr: Option<NonNull<u8>>, size: isize) -> Option<NonNull<u8>> {
    let ptr = match ptr {
        Some(p) => p,
        None => return get_mem(size),
    };
    if size <= 0 {
        free_mem(Some(ptr));
        return None;
    }
    let new_size = size as usize;
    let header_addr = ptr.as_ptr() as usize - HEADER_SIZE;

    match unsafe { classify(header_addr) } {
        Owner::Large => large::LARGE.realloc(ptr, new_size),
        Owner::Medium => {
            if new_size <= MAX_MEDIUM {
                if let Some(resized) = medium::MEDIUM.realloc(ptr, new_size) {
                    return Some(resized);
                }
            }
            let old_size = medium::MEDIUM.payload_size(ptr);
            let new_ptr = get_mem(new_size as isize)?;
            unsafe {
                core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
            }
            medium::MEDIUM.free(ptr);
            Some(new_ptr)
        }
        Owner::Small => {
            let old_class_size = small::owning_class_size(header_addr);
            if new_size + HEADER_SIZE <= old_class_size {
                return Some(ptr);
            }
            let old_size = old_class_size - HEADER_SIZE;
            let new_ptr = match small::growth_class_for(new_size) {
                Some(class_idx) => small::alloc(small::default_types(), class_idx)?,
                None => get_mem(new_size as isize)?,
            };
            unsafe {
                core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
            }
            small::free(header_addr);
            Some(new_ptr)
        }
    }
}

/// `mem_size(ptr)` (§4.H): true payload capacity — class size minus header
/// for small/tiny, size-and-flags minus header for medium, minus the
/// (larger) large header for large blocks.
pub fn mem_size(ptr: NonNull<u8>) -> usize {
    let header_addr = ptr.as_ptr() as usize - HEADER_SIZE;
    match unsafe { classify(header_addr) } {
        Owner::Medium => medium::MEDIUM.payload_size(ptr),
        Owner::Large => large::LARGE.payload_size(ptr),
        Owner::Small => small::payload_size(header_addr),
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn zero_fill(dst: *mut u8, len: usize) {
    use core::arch::x86_64::{_mm_setzero_si128, _mm_store_si128, __m128i};
    let zero = _mm_setzero_si128();
    let mut i = 0;
    while i + 16 <= len {
        _mm_store_si128(dst.add(i) as *mut __m128i, zero);
        i += 16;
    }
    if i < len {
        core::ptr::write_bytes(dst.add(i), 0, len - i);
    }
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn zero_fill(dst: *mut u8, len: usize) {
    core::ptr::write_bytes(dst, 0, len);
}

/// Snapshot of every counter (§6), assembled on demand from the arenas and
/// per-class small/tiny counters rather than maintained incrementally —
/// cheap enough to call freely, never touched on the allocation fast path.
pub fn current_heap_status() -> HeapStatus {
    let medium_stats = &medium::MEDIUM.stats;
    let large_stats = &large::LARGE.stats;

    let (small_get_sleep, small_free_sleep, small_block_count, small_block_bytes) = small_class_totals();

    let global_sleep_count =
        medium_stats.sleep_count() + large_stats.sleep_count() + small_get_sleep + small_free_sleep;

    HeapStatus {
        medium_current_bytes: medium_stats.current_bytes(),
        medium_cumulative_bytes: medium_stats.cumulative_bytes(),
        medium_peak_bytes: medium_stats.peak_bytes(),
        medium_sleep_count: medium_stats.sleep_count(),
        medium_acquire_calls: medium_stats.acquire_calls(),
        medium_release_calls: medium_stats.release_calls(),
        medium_sleep_micros: medium_stats.sleep_micros(),
        large_current_bytes: large_stats.current_bytes(),
        large_cumulative_bytes: large_stats.cumulative_bytes(),
        large_peak_bytes: large_stats.peak_bytes(),
        large_sleep_count: large_stats.sleep_count(),
        large_acquire_calls: large_stats.acquire_calls(),
        large_release_calls: large_stats.release_calls(),
        large_sleep_micros: large_stats.sleep_micros(),
        global_sleep_count,
        small_get_sleep_count: small_get_sleep,
        small_free_sleep_count: small_free_sleep,
        small_block_count,
        small_block_bytes,
    }
}

/// Per-class totals across every arena: the default arena plus every tiny
/// replica, keyed by class index so a class's counters read the same
/// whether a given allocation happened to land in a tiny arena or the
/// default one (§6's `small_block_status`/`small_block_contention` report
/// per *class*, not per arena).
fn per_class_counters() -> ([u64; SMALL_CLASS_COUNT], [u64; SMALL_CLASS_COUNT], [u64; SMALL_CLASS_COUNT], [u64; SMALL_CLASS_COUNT]) {
    let mut total_gets = [0u64; SMALL_CLASS_COUNT];
    let mut current_live = [0u64; SMALL_CLASS_COUNT];
    let mut get_sleep = [0u64; SMALL_CLASS_COUNT];
    let mut free_sleep = [0u64; SMALL_CLASS_COUNT];

    for (i, t) in small::default_types().iter().enumerate() {
        total_gets[i] += t.total_gets();
        current_live[i] += t.current_live();
        get_sleep[i] += t.get_sleep_count();
        free_sleep[i] += t.free_sleep_count();
    }
    for arena in tiny::arenas_status() {
        for (i, t) in arena.iter().enumerate() {
            total_gets[i] += t.total_gets();
            current_live[i] += t.current_live();
            get_sleep[i] += t.get_sleep_count();
            free_sleep[i] += t.free_sleep_count();
        }
    }

    (total_gets, current_live, get_sleep, free_sleep)
}

fn small_class_totals() -> (u64, u64, u64, u64) {
    let (_, current_live, get_sleep, free_sleep) = per_class_counters();
    let mut get_sleep_total = 0u64;
    let mut free_sleep_total = 0u64;
    let mut block_count = 0u64;
    let mut block_bytes = 0u64;
    for i in 0..SMALL_CLASS_COUNT {
        get_sleep_total += get_sleep[i];
        free_sleep_total += free_sleep[i];
        block_count += current_live[i];
        block_bytes += current_live[i] * SMALL_CLASS_SIZES[i] as u64;
    }
    (get_sleep_total, free_sleep_total, block_count, block_bytes)
}

/// Sort key for [`small_block_status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortBy {
    TotalAllocs,
    CurrentLive,
    ClassSize,
}

/// One row of [`small_block_status`]'s report.
#[derive(Clone, Copy, Debug)]
pub struct SmallBlockStatusEntry {
    pub total_allocs: u64,
    pub current_live: u64,
    pub class_size: usize,
}

/// `small_block_status(max, order_by)` (§6): up to `max` size classes with
/// a non-zero allocation count, sorted descending by `order_by`.
pub fn small_block_status(max: usize, order_by: SortBy) -> Vec<SmallBlockStatusEntry> {
    let (total_gets, current_live, _, _) = per_class_counters();

    let mut entries: Vec<SmallBlockStatusEntry> = (0..SMALL_CLASS_COUNT)
        .filter(|&i| total_gets[i] > 0)
        .map(|i| SmallBlockStatusEntry {
            total_allocs: total_gets[i],
            current_live: current_live[i],
            class_size: SMALL_CLASS_SIZES[i],
        })
        .collect();

    entries.sort_by(|a, b| match order_by {
        SortBy::TotalAllocs => b.total_allocs.cmp(&a.total_allocs),
        SortBy::CurrentLive => b.current_live.cmp(&a.current_live),
        SortBy::ClassSize => b.class_size.cmp(&a.class_size),
    });
    entries.truncate(max);
    entries
}

/// One row of [`small_block_contention`]'s report: exactly one of
/// `get_class_size`/`free_class_size` is non-zero, identifying which
/// direction this sleep count belongs to.
#[derive(Clone, Copy, Debug)]
pub struct ContentionEntry {
    pub sleep_count: u64,
    pub get_class_size: usize,
    pub free_class_size: usize,
}

/// `small_block_contention(max)` (§6): one record per (class, direction)
/// pair with a non-zero sleep counter, sorted descending by sleep count.
pub fn small_block_contention(max: usize) -> Vec<ContentionEntry> {
    let (_, _, get_sleep, free_sleep) = per_class_counters();

    let mut entries = Vec::new();
    for i in 0..SMALL_CLASS_COUNT {
        if get_sleep[i] > 0 {
            entries.push(ContentionEntry {
                sleep_count: get_sleep[i],
                get_class_size: SMALL_CLASS_SIZES[i],
                free_class_size: 0,
            });
        }
        if free_sleep[i] > 0 {
            entries.push(ContentionEntry {
                sleep_count: free_sleep[i],
                get_class_size: 0,
                free_class_size: SMALL_CLASS_SIZES[i],
            });
        }
    }
    entries.sort_by(|a, b| b.sleep_count.cmp(&a.sleep_count));
    entries.truncate(max);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_mem_rejects_nonpositive_size() {
        assert!(get_mem(0).is_none());
        assert!(get_mem(-1).is_none());
    }

    #[test]
    fn round_trip_across_every_class() {
        for size in [8usize, 32, 128, 256, 2608, 2609, 10_000, 300_000] {
            let p = get_mem(size as isize).expect("alloc");
            assert_eq!(p.as_ptr() as usize % USER_ALIGN, 0);
            assert!(mem_size(p) >= size);
            assert_eq!(free_mem(Some(p)), 0);
        }
    }

    #[test]
    fn alloc_mem_zeroes_payload() {
        let p = alloc_mem(256).expect("alloc");
        let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), 256) };
        assert!(bytes.iter().all(|&b| b == 0));
        free_mem(Some(p));
    }

    #[test]
    fn free_mem_null_is_noop() {
        assert_eq!(free_mem(None), 0);
    }

    #[test]
    fn double_free_is_rejected() {
        let p = get_mem(64).expect("alloc");
        assert_eq!(free_mem(Some(p)), 0);
        assert_eq!(free_mem(Some(p)), -1);
    }

    #[test]
    fn realloc_preserves_prefix() {
        let p = get_mem(64).expect("alloc");
        unsafe { core::ptr::write_bytes(p.as_ptr(), 0xAB, 64) };
        let p2 = realloc_mem(Some(p), 4096).expect("realloc");
        let bytes = unsafe { core::slice::from_raw_parts(p2.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0xAB));
        free_mem(Some(p2));
    }

    #[test]
    fn realloc_zero_size_frees() {
        let p = get_mem(64).expect("alloc");
        assert!(realloc_mem(Some(p), 0).is_none());
    }

    #[test]
    fn realloc_null_ptr_allocates() {
        let p = realloc_mem(None, 128).expect("alloc");
        free_mem(Some(p));
    }
}

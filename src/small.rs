//! Small Block Manager ([MODULE F]).
//!
//! 46 fixed size classes backed by medium-block-hosted pools of equal-size
//! slots, each with an in-slot singly-linked free list (spec §4.F). Tiny
//! requests (§4.G, [`crate::tiny`]) are served by replicated copies of the
//! first few classes of this same machinery; everything else routes through
//! the single default set of types defined here.
//!
//! Grounded on the teacher's per-size-class `PageQueue`/`Heap::pages` split
//! in `types.rs` (one free-list head per size class, routed through a
//! lookup table) generalized to this spec's pool/slot layout, which has no
//! direct mimalloc counterpart (mimalloc pages are fixed-size OS segments,
//! not medium-block-carved pools with a `first_free` in-slot thread).

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::header::*;
use crate::lock::{SpinGuard, SpinLock, SPIN_SMALL_FREE, SPIN_SMALL_GET};
use crate::medium;

/// Header word layout of a small-block pool (spec §3's "Small block pool"
/// entity): owning type, prev/next in the type's partial-free list, head of
/// the in-slot free list, and a packed blocks-in-use/capacity word. Five
/// words (40 bytes) rather than six keeps the first slot's header at
/// `pool_addr + 40 ≡ 8 (mod 16)`, so slot bodies land on a 16-byte boundary
/// the same way medium bodies do — the pool's own body pointer (from
/// [`medium::MediumBlockInfo::alloc_for_small_pool`]) is itself 16-aligned,
/// and every slot after the header is `block_size`-strided, so this only
/// holds because `block_size` is a multiple of 16 for every entry in
/// [`SMALL_CLASS_SIZES`].
const POOL_OWNER: usize = 0;
const POOL_PREV: usize = 1;
const POOL_NEXT: usize = 2;
const POOL_FIRST_FREE: usize = 3;
const POOL_COUNTS: usize = 4;
const POOL_HEADER_WORDS: usize = 5;
pub const POOL_HEADER_SIZE: usize = POOL_HEADER_WORDS * HEADER_SIZE;

#[inline]
unsafe fn pool_word(pool_addr: usize, slot: usize) -> usize {
    *((pool_addr + slot * HEADER_SIZE) as *const usize)
}
#[inline]
unsafe fn set_pool_word(pool_addr: usize, slot: usize, v: usize) {
    *((pool_addr + slot * HEADER_SIZE) as *mut usize) = v;
}

#[inline]
unsafe fn pool_counts(pool_addr: usize) -> (u32, u32) {
    let w = pool_word(pool_addr, POOL_COUNTS);
    ((w >> 32) as u32, w as u32) // (capacity, blocks_in_use)
}
#[inline]
unsafe fn set_pool_counts(pool_addr: usize, capacity: u32, in_use: u32) {
    set_pool_word(pool_addr, POOL_COUNTS, ((capacity as usize) << 32) | in_use as usize);
}

/// One of the 46 fixed size classes, sized to roughly one cache line (spec
/// §3). The struct itself is the sentinel of its own partial-free-pools
/// list, per the "sentinel is a stable field of the owning struct" design
/// note (§9): `partial_head == 0` means the list is empty, never a pointer
/// back to this struct.
pub struct SmallBlockType {
    pub block_size: usize,
    min_pool_size: usize,
    optimal_pool_size: usize,
    lock: SpinLock,
    partial_head: core::cell::UnsafeCell<usize>,
    partial_tail: core::cell::UnsafeCell<usize>,
    /// Current sequential-feed pool (0 = none), and its cursor/limit.
    feed_pool: core::cell::UnsafeCell<usize>,
    feed_next: core::cell::UnsafeCell<usize>,
    feed_end: core::cell::UnsafeCell<usize>,
    get_sleep: AtomicU64,
    free_sleep: AtomicU64,
    total_gets: AtomicU64,
    total_frees: AtomicU64,
}

unsafe impl Sync for SmallBlockType {}

impl SmallBlockType {
    pub(crate) fn new(block_size: usize) -> Self {
        // A pool should host at least ~16 slots; cap the optimal pool body
        // at one medium-manager pool's usable capacity so carving never
        // demands more than a single medium pool can supply.
        let min_pool_size = (block_size * 8).max(POOL_HEADER_SIZE + block_size);
        let optimal_pool_size = (block_size * 64).max(min_pool_size);
        SmallBlockType {
            block_size,
            min_pool_size,
            optimal_pool_size,
            lock: SpinLock::new(),
            partial_head: core::cell::UnsafeCell::new(0),
            partial_tail: core::cell::UnsafeCell::new(0),
            feed_pool: core::cell::UnsafeCell::new(0),
            feed_next: core::cell::UnsafeCell::new(0),
            feed_end: core::cell::UnsafeCell::new(0),
            get_sleep: AtomicU64::new(0),
            free_sleep: AtomicU64::new(0),
            total_gets: AtomicU64::new(0),
            total_frees: AtomicU64::new(0),
        }
    }

    #[inline]
    fn partial_head(&self) -> &mut usize {
        unsafe { &mut *self.partial_head.get() }
    }
    #[inline]
    fn partial_tail(&self) -> &mut usize {
        unsafe { &mut *self.partial_tail.get() }
    }
    #[inline]
    fn feed_pool(&self) -> &mut usize {
        unsafe { &mut *self.feed_pool.get() }
    }
    #[inline]
    fn feed_next(&self) -> &mut usize {
        unsafe { &mut *self.feed_next.get() }
    }
    #[inline]
    fn feed_end(&self) -> &mut usize {
        unsafe { &mut *self.feed_end.get() }
    }

    pub fn get_sleep_count(&self) -> u64 {
        self.get_sleep.load(Ordering::Relaxed)
    }
    pub fn free_sleep_count(&self) -> u64 {
        self.free_sleep.load(Ordering::Relaxed)
    }
    pub fn total_gets(&self) -> u64 {
        self.total_gets.load(Ordering::Relaxed)
    }
    pub fn current_live(&self) -> u64 {
        self.total_gets
            .load(Ordering::Relaxed)
            .saturating_sub(self.total_frees.load(Ordering::Relaxed))
    }

    // ---- partial-free-pools list (this struct is its own sentinel) -----

    fn partial_link(&self, pool_addr: usize) {
        let tail = *self.partial_tail();
        unsafe {
            set_pool_word(pool_addr, POOL_PREV, tail);
            set_pool_word(pool_addr, POOL_NEXT, 0);
        }
        if tail != 0 {
            unsafe { set_pool_word(tail, POOL_NEXT, pool_addr) };
        } else {
            *self.partial_head() = pool_addr;
        }
        *self.partial_tail() = pool_addr;
    }

    fn partial_unlink(&self, pool_addr: usize) {
        let prev = unsafe { pool_word(pool_addr, POOL_PREV) };
        let next = unsafe { pool_word(pool_addr, POOL_NEXT) };
        if prev != 0 {
            unsafe { set_pool_word(prev, POOL_NEXT, next) };
        } else {
            *self.partial_head() = next;
        }
        if next != 0 {
            unsafe { set_pool_word(next, POOL_PREV, prev) };
        } else {
            *self.partial_tail() = prev;
        }
    }

    fn first_slot(pool_addr: usize) -> usize {
        pool_addr + POOL_HEADER_SIZE
    }

    fn format_pool(&self, pool_addr: usize, capacity: u32) {
        unsafe {
            set_pool_word(pool_addr, POOL_OWNER, self as *const _ as usize);
            set_pool_word(pool_addr, POOL_PREV, 0);
            set_pool_word(pool_addr, POOL_NEXT, 0);
            set_pool_word(pool_addr, POOL_FIRST_FREE, 0);
            set_pool_counts(pool_addr, capacity, 0);
        }
    }

    /// Carve a fresh medium sub-block, install it as the current
    /// sequential-feed pool, and hand back its first slot (§4.F step 4).
    fn new_feed_pool(&self) -> Option<NonNull<u8>> {
        let (body, granted) = medium::MEDIUM.alloc_for_small_pool(self.min_pool_size, self.optimal_pool_size)?;
        let pool_addr = body.as_ptr() as usize;
        let capacity = ((granted - POOL_HEADER_SIZE) / self.block_size) as u32;
        self.format_pool(pool_addr, capacity);
        *self.feed_pool() = pool_addr;
        let first = Self::first_slot(pool_addr);
        *self.feed_next() = first + self.block_size;
        *self.feed_end() = first + capacity as usize * self.block_size;
        unsafe {
            set_pool_counts(pool_addr, capacity, 1);
            set_pool_word(first, 0, pool_addr); // used-slot header: owning pool, no flags
        }
        NonNull::new((first + HEADER_SIZE) as *mut u8)
    }

    /// Allocation protocol, §4.F steps 2-4 (lock already held by the
    /// caller). `pub(crate)` so [`crate::tiny`]'s round-robin probe can
    /// drive the same state machine under its own `try_lock`.
    pub(crate) fn alloc_locked(&self) -> Option<NonNull<u8>> {
        // Step 2: pop from the head of the partial-free list.
        let head = *self.partial_head();
        if head != 0 {
            let first_free = unsafe { pool_word(head, POOL_FIRST_FREE) };
            debug_assert!(first_free != 0, "pool on partial list must have a free slot");
            let next_free = payload_of(unsafe { pool_word(first_free, 0) });
            unsafe {
                set_pool_word(head, POOL_FIRST_FREE, next_free);
                set_pool_word(first_free, 0, head); // mark used: header = owning pool
            }
            let (capacity, in_use) = unsafe { pool_counts(head) };
            let in_use = in_use + 1;
            unsafe { set_pool_counts(head, capacity, in_use) };
            if in_use == capacity {
                self.partial_unlink(head);
            }
            self.total_gets.fetch_add(1, Ordering::Relaxed);
            return NonNull::new((first_free + HEADER_SIZE) as *mut u8);
        }

        // Step 3: sequential feed from the pool that hasn't been filled once.
        let feed_pool = *self.feed_pool();
        if feed_pool != 0 && *self.feed_next() < *self.feed_end() {
            let addr = *self.feed_next();
            *self.feed_next() += self.block_size;
            let (capacity, in_use) = unsafe { pool_counts(feed_pool) };
            unsafe {
                set_pool_word(addr, 0, feed_pool);
                set_pool_counts(feed_pool, capacity, in_use + 1);
            }
            self.total_gets.fetch_add(1, Ordering::Relaxed);
            return NonNull::new((addr + HEADER_SIZE) as *mut u8);
        }
        if feed_pool != 0 && *self.feed_next() >= *self.feed_end() {
            // Exhausted: if it still has free slots released back onto its
            // own list meanwhile, let it join the partial list like any
            // other pool; otherwise it simply stops being the feed pool.
            let (capacity, in_use) = unsafe { pool_counts(feed_pool) };
            if in_use < capacity {
                self.partial_link(feed_pool);
            }
            *self.feed_pool() = 0;
        }

        // Step 4: carve a brand new medium sub-block.
        let ptr = self.new_feed_pool();
        if ptr.is_some() {
            self.total_gets.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    /// Free protocol, §4.F steps 2-4 (lock already held by the caller).
    fn free_locked(&self, header_addr: usize) {
        let pool_addr = payload_of(unsafe { pool_word(header_addr, 0) });
        debug_assert_eq!(
            unsafe { pool_word(pool_addr, POOL_OWNER) },
            self as *const _ as usize,
            "freed block routed to the wrong size class"
        );
        let (capacity, in_use) = unsafe { pool_counts(pool_addr) };
        let in_use = in_use - 1;

        if in_use == 0 && pool_addr != *self.feed_pool() {
            self.partial_unlink(pool_addr);
            unsafe { set_pool_counts(pool_addr, capacity, 0) };
            // `first_free == 0` on a just-drained pool (never the feed pool
            // by this branch's own guard) unambiguously means "give the
            // medium block back" rather than "this is the feed pool" (§9
            // Open Question: the two cases are told apart by the feed-pool
            // pointer check above, not by `first_free` alone).
            medium::MEDIUM.free(unsafe { NonNull::new_unchecked(pool_addr as *mut u8) });
            return;
        }

        let was_full = unsafe { pool_word(pool_addr, POOL_FIRST_FREE) } == 0 && in_use + 1 == capacity;
        unsafe {
            let old_first_free = pool_word(pool_addr, POOL_FIRST_FREE);
            set_pool_word(header_addr, 0, old_first_free | IS_FREE);
            set_pool_word(pool_addr, POOL_FIRST_FREE, header_addr);
            set_pool_counts(pool_addr, capacity, in_use);
        }
        if was_full {
            self.partial_link(pool_addr);
        }
    }

    fn lock(&self) -> SpinGuard<'_> {
        self.lock.lock(SPIN_SMALL_GET, &self.get_sleep)
    }
    pub(crate) fn try_lock(&self) -> Option<SpinGuard<'_>> {
        self.lock.try_lock()
    }
}

/// Lazily-built table of the 46 default size classes (the "single default
/// small-class arena" that ordinary small/medium-adjacent requests use, and
/// that tiny requests fall back to on total tiny-arena contention, §4.G).
static DEFAULT_TYPES: OnceLock<[SmallBlockType; SMALL_CLASS_COUNT]> = OnceLock::new();

pub fn default_types() -> &'static [SmallBlockType; SMALL_CLASS_COUNT] {
    DEFAULT_TYPES.get_or_init(|| core::array::from_fn(|i| SmallBlockType::new(SMALL_CLASS_SIZES[i])))
}

/// Getmem lookup table (§4.F "Getmem lookup table"): for each 16-byte
/// granularity bucket, the index of the smallest class able to satisfy it.
/// Built once; `class_index_for_block_size` already implements the same
/// lookup directly off `SMALL_CLASS_SIZES`; this wrapper exists so callers
/// routing by payload size (not block size) share one entry point.
#[inline]
pub fn class_for_payload(payload: usize) -> Option<usize> {
    class_index_for_block_size(payload + HEADER_SIZE)
}

/// Realloc-upsize target class (§4.H: "small-class upsize always growing to
/// the next class size that accommodates 2x + 32 B"), so a block that grows
/// once is less likely to need growing again soon. Falls back to the
/// tightest class that merely fits `new_payload` when no class is large
/// enough for the amortized target; `None` means even [`SMALL_SIZE_MAX`] is
/// too small and the caller should route the new allocation through the
/// medium manager instead.
pub fn growth_class_for(new_payload: usize) -> Option<usize> {
    let amortized = 2 * new_payload + 32;
    class_for_payload(amortized).or_else(|| class_for_payload(new_payload))
}

/// Blocking allocation on one size class, with the opportunistic
/// next-two-classes upgrade before falling through to spin-then-yield
/// (§4.C's "small-get path additionally attempts to acquire the lock of the
/// next two size classes up before yielding").
pub fn alloc(types: &[SmallBlockType], class_idx: usize) -> Option<NonNull<u8>> {
    if let Some(guard) = types[class_idx].try_lock() {
        let r = types[class_idx].alloc_locked();
        drop(guard);
        return r;
    }

    for upgrade in 1..=2 {
        if let Some(c2) = class_idx.checked_add(upgrade) {
            if c2 < types.len() {
                if let Some(guard) = types[c2].try_lock() {
                    if let Some(ptr) = types[c2].alloc_locked() {
                        drop(guard);
                        return Some(ptr);
                    }
                    // OOM on the upgraded class: release and fall through to
                    // the normal spin-then-yield path on the original class.
                }
            }
        }
    }

    let guard = types[class_idx].lock();
    let r = types[class_idx].alloc_locked();
    drop(guard);
    r
}

/// Free a small block through its owning type's lock (§4.F free protocol).
/// `header_addr` is `ptr - HEADER_SIZE`; the owning pool (and therefore the
/// owning type) is read from the header before any lock is taken, so no
/// class index needs to be threaded through `free_mem`.
pub fn free(header_addr: usize) {
    let pool_addr = payload_of(unsafe { *(header_addr as *const usize) });
    let owner_addr = unsafe { pool_word(pool_addr, POOL_OWNER) };
    let owner = unsafe { &*(owner_addr as *const SmallBlockType) };
    let _guard = owner.lock.lock(SPIN_SMALL_FREE, &owner.free_sleep);
    owner.free_locked(header_addr);
    owner.total_frees.fetch_add(1, Ordering::Relaxed);
}

pub fn payload_size(header_addr: usize) -> usize {
    let pool_addr = payload_of(unsafe { *(header_addr as *const usize) });
    let owner_addr = unsafe { pool_word(pool_addr, POOL_OWNER) };
    let owner = unsafe { &*(owner_addr as *const SmallBlockType) };
    owner.block_size - HEADER_SIZE
}

pub fn owning_class_size(header_addr: usize) -> usize {
    let pool_addr = payload_of(unsafe { *(header_addr as *const usize) });
    let owner_addr = unsafe { pool_word(pool_addr, POOL_OWNER) };
    unsafe { (&*(owner_addr as *const SmallBlockType)).block_size }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_class_get_free_roundtrip() {
        let types = default_types();
        let idx = class_for_payload(32).unwrap();
        let mut ptrs = Vec::new();
        for _ in 0..5000 {
            let p = alloc(types, idx).expect("alloc");
            ptrs.push(p);
        }
        for p in ptrs {
            let header_addr = p.as_ptr() as usize - HEADER_SIZE;
            free(header_addr);
        }
        assert_eq!(types[idx].current_live(), 0);
    }

    #[test]
    fn class_lookup_matches_table() {
        assert_eq!(class_for_payload(1).unwrap(), 0);
        assert_eq!(SMALL_CLASS_SIZES[class_for_payload(1).unwrap()], 16);
        assert_eq!(SMALL_CLASS_SIZES[class_for_payload(SMALL_SIZE_MAX).unwrap()], 2616);
        assert!(class_for_payload(SMALL_SIZE_MAX + 1).is_none());
    }
}

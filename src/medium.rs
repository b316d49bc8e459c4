//! Medium Block Manager ([MODULE E]).
//!
//! Fixed `POOL_SIZE`-byte pools split into variable sub-blocks with
//! boundary tags, indexed by `BIN_COUNT` size-class bins and a two-level
//! bitmap (spec §3, §4.E). This is the allocator's busiest internal
//! collaborator: the tiny/small managers carve their backing pools from
//! here, and every direct medium-sized `get_mem` call lands here too.
//!
//! Grounded on the teacher's `segment.rs` for the "pool is a big OS
//! allocation subdivided on demand, freed back to the OS when empty"
//! shape, generalized from mimalloc's fixed-size-page segments to this
//! spec's variable-size, boundary-tagged, binned-free-list design — the
//! two are structurally unrelated beyond "a page provider-backed pool
//! manager under one global lock", so the bin/bitmap/boundary-tag
//! machinery itself is original to this spec, not lifted from mimalloc.
//!
//! **Boundary-tag layout deviation (see DESIGN.md).** The spec describes a
//! one-word leading header and a trailing size tag present only on *free*
//! blocks, disambiguated by a `PREV_MEDIUM_FREE` header bit. Taken
//! literally that layout cannot keep every block's body pointer 16-aligned
//! (invariant 1): consecutive blocks' header addresses would alternate
//! residues mod 16 once the header is a single 8-byte word and bodies
//! follow the spec's 256-byte bin grid. This implementation instead keeps
//! an 8-byte trailing tag on *every* medium block, used or free — a
//! superset of what the spec's invariants require of free blocks, and
//! enough to keep every block's footprint (`body_size + 16`) a multiple of
//! 16, so body pointers stay aligned without any per-request padding.
//! `PREV_MEDIUM_FREE` is still maintained and checked exactly as specified,
//! as the fast-path signal for whether to consult that tag.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::header::*;
use crate::lock::{SpinLock, SPIN_MEDIUM};
use crate::os;
use crate::stats::Arena;

/// prev, next, and one reserved word. Three words (24 bytes) puts
/// `first_block`'s header at `pool_addr + 24 ≡ 8 (mod 16)`, so its body
/// (`+8` further) lands on a 16-byte boundary; every later block inherits
/// the same residue because each one's total footprint is a multiple of 16
/// (see module docs).
const POOL_HEADER_SIZE: usize = 3 * HEADER_SIZE;
/// Bytes usable for blocks in a freshly acquired pool (reserves one
/// trailing header word for the permanent zero-size sentinel).
const POOL_USABLE_BYTES: usize = MEDIUM_POOL_SIZE - POOL_HEADER_SIZE - HEADER_SIZE;

/// Per-block overhead: one leading header word, one trailing size tag.
const BLOCK_OVERHEAD: usize = 2 * HEADER_SIZE;

/// Minimum body size a free block must have to host next/prev free-list
/// pointers.
const MIN_FREE_BODY: usize = 2 * HEADER_SIZE;

struct MediumState {
    /// Bit `i` of `bin_bitmap[g]` set iff bin `g*32+i` is non-empty.
    bin_bitmap: [u32; GROUP_COUNT],
    /// Bit `g` set iff any bin in group `g` is non-empty.
    group_bitmap: u32,
    /// Head address of each bin's free list (0 = empty).
    bins: [usize; BIN_COUNT],
    pools_head: usize, // 0 = none
    pools_tail: usize,
    seq_feed_pool: usize, // 0 = none
    seq_feed_next: usize,
    seq_feed_left: usize,
}

impl MediumState {
    const fn new() -> Self {
        MediumState {
            bin_bitmap: [0; GROUP_COUNT],
            group_bitmap: 0,
            bins: [0; BIN_COUNT],
            pools_head: 0,
            pools_tail: 0,
            seq_feed_pool: 0,
            seq_feed_next: 0,
            seq_feed_left: 0,
        }
    }
}

pub struct MediumBlockInfo {
    lock: SpinLock,
    pub stats: Arena,
    state: UnsafeCell<MediumState>,
}

unsafe impl Sync for MediumBlockInfo {}

impl MediumBlockInfo {
    pub const fn new() -> Self {
        MediumBlockInfo {
            lock: SpinLock::new(),
            stats: Arena::new(),
            state: UnsafeCell::new(MediumState::new()),
        }
    }

    fn lock(&self) -> crate::lock::SpinGuard<'_> {
        self.lock
            .lock_timed(SPIN_MEDIUM, self.stats.sleep_counter(), Some(self.stats.sleep_micros_counter()))
    }

    fn state(&self) -> &mut MediumState {
        unsafe { &mut *self.state.get() }
    }

    // ---- header/body helpers --------------------------------------

    unsafe fn header(addr: usize) -> usize {
        *(addr as *const usize)
    }

    unsafe fn set_header(addr: usize, value: usize) {
        *(addr as *mut usize) = value;
    }

    /// Write the trailing size tag for a block whose header is at `addr`
    /// and whose body is `size` bytes (present on every block, see module
    /// docs, not only free ones).
    unsafe fn set_trailing_tag(addr: usize, size: usize) {
        *((addr + HEADER_SIZE + size) as *mut usize) = size;
    }

    unsafe fn trailing_tag_before(addr: usize) -> usize {
        *((addr - HEADER_SIZE) as *const usize)
    }

    unsafe fn free_next(header_addr: usize) -> usize {
        *((header_addr + HEADER_SIZE) as *const usize)
    }
    unsafe fn set_free_next(header_addr: usize, v: usize) {
        *((header_addr + HEADER_SIZE) as *mut usize) = v;
    }
    unsafe fn free_prev(header_addr: usize) -> usize {
        *((header_addr + 2 * HEADER_SIZE) as *const usize)
    }
    unsafe fn set_free_prev(header_addr: usize, v: usize) {
        *((header_addr + 2 * HEADER_SIZE) as *mut usize) = v;
    }

    fn bin_index_for_size(size: usize) -> usize {
        medium_bin_index(size)
    }

    /// Total bytes a block of body `size` occupies in the pool, including
    /// its leading header and trailing tag.
    #[inline]
    fn footprint(size: usize) -> usize {
        size + BLOCK_OVERHEAD
    }

    // ---- bitmap bookkeeping ------------------------------------------

    fn bin_insert(state: &mut MediumState, header_addr: usize, size: usize) {
        let idx = Self::bin_index_for_size(size);
        let head = state.bins[idx];
        unsafe {
            Self::set_free_next(header_addr, head);
            Self::set_free_prev(header_addr, 0);
            if head != 0 {
                Self::set_free_prev(head, header_addr);
            }
        }
        state.bins[idx] = header_addr;
        let g = idx / BINS_PER_GROUP;
        let b = idx % BINS_PER_GROUP;
        state.bin_bitmap[g] |= 1 << b;
        state.group_bitmap |= 1 << g;
    }

    fn bin_remove(state: &mut MediumState, header_addr: usize, size: usize) {
        let idx = Self::bin_index_for_size(size);
        unsafe {
            let prev = Self::free_prev(header_addr);
            let next = Self::free_next(header_addr);
            if prev != 0 {
                Self::set_free_next(prev, next);
            } else {
                state.bins[idx] = next;
            }
            if next != 0 {
                Self::set_free_prev(next, prev);
            }
        }
        if state.bins[idx] == 0 {
            let g = idx / BINS_PER_GROUP;
            let b = idx % BINS_PER_GROUP;
            state.bin_bitmap[g] &= !(1 << b);
            if state.bin_bitmap[g] == 0 {
                state.group_bitmap &= !(1 << (idx / BINS_PER_GROUP));
            }
        }
    }

    /// Best-fit-upward bin search (§4.E step 1-3), restricted to groups
    /// `<= max_group` when carving a small-block pool (`AllowedGroupsMask`,
    /// §4.E's "Small-block pool allocation").
    fn find_bin(state: &MediumState, target_idx: usize, max_group: usize) -> Option<usize> {
        let g = target_idx / BINS_PER_GROUP;
        let b = target_idx % BINS_PER_GROUP;

        if g <= max_group {
            let mask_in_group = if b == 31 {
                1u32 << 31
            } else {
                !((1u32 << b) - 1)
            };
            let hits = state.bin_bitmap[g] & mask_in_group;
            if hits != 0 {
                let j = hits.trailing_zeros() as usize;
                return Some(g * BINS_PER_GROUP + j);
            }
        }

        let group_mask_above = if g + 1 >= 32 {
            0
        } else {
            !((1u32 << (g + 1)) - 1)
        };
        let group_limit_mask = if max_group + 1 >= 32 {
            u32::MAX
        } else {
            (1u32 << (max_group + 1)) - 1
        };
        let candidate_groups = state.group_bitmap & group_mask_above & group_limit_mask;
        if candidate_groups != 0 {
            let g2 = candidate_groups.trailing_zeros() as usize;
            let j = state.bin_bitmap[g2].trailing_zeros() as usize;
            return Some(g2 * BINS_PER_GROUP + j);
        }
        None
    }

    // ---- pool list -----------------------------------------------------

    fn pool_link(state: &mut MediumState, pool_addr: usize) {
        unsafe {
            *((pool_addr) as *mut usize) = state.pools_tail; // prev
            *((pool_addr + HEADER_SIZE) as *mut usize) = 0; // next
        }
        if state.pools_tail != 0 {
            unsafe { *((state.pools_tail + HEADER_SIZE) as *mut usize) = pool_addr };
        } else {
            state.pools_head = pool_addr;
        }
        state.pools_tail = pool_addr;
    }

    fn pool_unlink(state: &mut MediumState, pool_addr: usize) {
        let prev = unsafe { *(pool_addr as *const usize) };
        let next = unsafe { *((pool_addr + HEADER_SIZE) as *const usize) };
        if prev != 0 {
            unsafe { *((prev + HEADER_SIZE) as *mut usize) = next };
        } else {
            state.pools_head = next;
        }
        if next != 0 {
            unsafe { *(next as *mut usize) = prev };
        } else {
            state.pools_tail = prev;
        }
    }

    fn new_pool(&self, state: &mut MediumState) -> bool {
        let mem = match os::acquire(MEDIUM_POOL_SIZE, &self.stats) {
            Some(p) => p,
            None => return false,
        };
        let pool_addr = mem.as_ptr() as usize;
        self.pool_link(state, pool_addr);
        let first_block = pool_addr + POOL_HEADER_SIZE;
        unsafe { Self::set_header(first_block, 0) }; // sentinel until carved
        state.seq_feed_pool = pool_addr;
        state.seq_feed_next = first_block;
        state.seq_feed_left = POOL_USABLE_BYTES;
        true
    }

    /// Finalize the currently-exhausted sequential feed pool: bin
    /// whatever bytes remain unformatted as one free block (§4.E).
    fn retire_sequential_feed(state: &mut MediumState) {
        if state.seq_feed_pool == 0 {
            return;
        }
        if state.seq_feed_left >= MIN_FREE_BODY + BLOCK_OVERHEAD {
            let addr = state.seq_feed_next;
            let body_size = state.seq_feed_left - BLOCK_OVERHEAD;
            // `addr` is the sentinel slot a lower neighbor's free may have
            // already tagged with `PREV_MEDIUM_FREE` (`set_prev_free_of_upper`
            // writes into it even while unformatted); inherit that bit
            // instead of dropping it, same as `grant_or_split`'s
            // `inherited_prev_free`.
            let inherited_prev_free = unsafe { Self::header(addr) } & PREV_MEDIUM_FREE;
            unsafe {
                Self::set_header(addr, body_size | IS_MEDIUM | IS_FREE | inherited_prev_free);
                Self::set_trailing_tag(addr, body_size);
            }
            Self::bin_insert(state, addr, body_size);
        }
        state.seq_feed_pool = 0;
        state.seq_feed_left = 0;
    }

    /// Carve `body_size` bytes directly from the active sequential-feed
    /// pool, starting a new pool first if necessary.
    fn feed_from_sequential(&self, state: &mut MediumState, body_size: usize) -> Option<usize> {
        let needed = Self::footprint(body_size);
        if state.seq_feed_pool == 0 || state.seq_feed_left < needed + HEADER_SIZE {
            self.retire_sequential_feed(state);
            if !self.new_pool(state) {
                return None;
            }
            if state.seq_feed_left < needed + HEADER_SIZE {
                return None; // request larger than a whole pool can host
            }
        }
        let addr = state.seq_feed_next;
        // Same inherited-bit concern as `retire_sequential_feed`: `addr` may
        // already carry `PREV_MEDIUM_FREE` from a lower neighbor's free
        // while this slot was still the unformatted sentinel.
        let inherited_prev_free = unsafe { Self::header(addr) } & PREV_MEDIUM_FREE;
        unsafe {
            Self::set_header(addr, body_size | IS_MEDIUM | inherited_prev_free);
            Self::set_trailing_tag(addr, body_size);
        }
        state.seq_feed_next += needed;
        state.seq_feed_left -= needed;
        unsafe { Self::set_header(state.seq_feed_next, 0) }; // re-establish sentinel
        Some(addr)
    }

    // ---- public allocation surface -------------------------------------

    /// Allocate a medium block able to hold `payload_size` bytes, returning
    /// the header address and granted body size. `max_group` restricts
    /// which bin groups may be searched (`GROUP_COUNT - 1` for ordinary
    /// medium requests; a lower ceiling for small-block pool carving so
    /// tiny/small pools cannot starve large medium requests, §4.E).
    fn alloc_block(&self, payload_size: usize, max_group: usize) -> Option<(usize, usize)> {
        let body_size = round16(payload_size.max(MIN_MED - HEADER_SIZE));
        let _guard = self.lock();
        let state = self.state();

        // Bin index is keyed by body size alone, matching every
        // `bin_insert`/`bin_remove` call site below — the target index here
        // must use the same key a free block of this size would be filed
        // under.
        let target_idx = Self::bin_index_for_size(body_size);
        if let Some(idx) = Self::find_bin(state, target_idx, max_group) {
            let header_addr = state.bins[idx];
            let orig_header = unsafe { Self::header(header_addr) };
            let got_size = payload_of(orig_header);
            Self::bin_remove(state, header_addr, got_size);
            let header_addr = self.grant_or_split(state, header_addr, orig_header, got_size, body_size);
            self.stats.add(HEADER_SIZE as i64 + body_size as i64);
            return Some((header_addr, body_size));
        }

        let addr = self.feed_from_sequential(state, body_size)?;
        self.stats.add(HEADER_SIZE as i64 + body_size as i64);
        Some((addr, body_size))
    }

    fn grant_or_split(
        &self,
        state: &mut MediumState,
        header_addr: usize,
        orig_header: usize,
        free_size: usize,
        request_size: usize,
    ) -> usize {
        let inherited_prev_free = orig_header & PREV_MEDIUM_FREE;
        // free_size's footprint is free_size + 16; splitting off a granted
        // block of request_size (footprint request_size + 16) leaves a
        // remainder whose body is free_size - request_size - 16 (the
        // granted block's own header+tag no longer belong to the
        // remainder).
        if free_size >= request_size + MIN_MED + BLOCK_OVERHEAD {
            let remainder_addr = header_addr + Self::footprint(request_size);
            let remainder_size = free_size - request_size - BLOCK_OVERHEAD;
            unsafe {
                Self::set_header(header_addr, request_size | IS_MEDIUM | inherited_prev_free);
                Self::set_trailing_tag(header_addr, request_size);
                // The remainder's lower neighbor is the block just granted
                // above, which is in use, so its own PREV_MEDIUM_FREE bit
                // must be clear.
                Self::set_header(remainder_addr, remainder_size | IS_MEDIUM | IS_FREE);
                Self::set_trailing_tag(remainder_addr, remainder_size);
            }
            Self::bin_insert(state, remainder_addr, remainder_size);
        } else {
            unsafe {
                Self::set_header(header_addr, free_size | IS_MEDIUM | inherited_prev_free);
                Self::set_trailing_tag(header_addr, free_size);
                Self::set_prev_free_of_upper(header_addr, free_size, false);
            }
        }
        header_addr
    }

    unsafe fn set_prev_free_of_upper(header_addr: usize, size: usize, free: bool) {
        let upper = header_addr + Self::footprint(size);
        let h = Self::header(upper);
        if h == 0 && !free {
            return; // sentinel: nothing to tag
        }
        let h = if free { h | PREV_MEDIUM_FREE } else { h & !PREV_MEDIUM_FREE };
        Self::set_header(upper, h);
    }

    pub fn alloc(&self, payload_size: usize) -> Option<NonNull<u8>> {
        let max_group = GROUP_COUNT - 1;
        let (header_addr, _size) = self.alloc_block(payload_size, max_group)?;
        NonNull::new((header_addr + HEADER_SIZE) as *mut u8)
    }

    /// Carve a block for a small-block pool, sized between `min_size` and
    /// `optimal_size`, restricted to low bin groups (§4.E). Returns the
    /// body pointer and the granted body size.
    pub fn alloc_for_small_pool(&self, min_size: usize, optimal_size: usize) -> Option<(NonNull<u8>, usize)> {
        let max_group = (Self::bin_index_for_size(optimal_size) / BINS_PER_GROUP)
            .min(GROUP_COUNT - 1);
        // `alloc_block` always grants an exact-size fit (splitting any
        // larger free block it finds down to the request), which already
        // realizes "oversize candidates are split to the optimal size and
        // the remainder rebinned" (§4.E).
        let (header_addr, granted) = self
            .alloc_block(optimal_size, max_group)
            .or_else(|| self.alloc_block(min_size, GROUP_COUNT - 1))?;
        let ptr = NonNull::new((header_addr + HEADER_SIZE) as *mut u8)?;
        Some((ptr, granted))
    }

    /// Free a medium block previously returned by [`Self::alloc`] or
    /// [`Self::alloc_for_small_pool`]. Coalesces with free neighbors and
    /// releases the whole pool to the OS if it becomes entirely empty and
    /// is not the active sequential-feed pool (§4.E).
    pub fn free(&self, body: NonNull<u8>) {
        let header_addr = body.as_ptr() as usize - HEADER_SIZE;
        let _guard = self.lock();
        let state = self.state();
        unsafe { self.free_locked(state, header_addr) };
    }

    unsafe fn free_locked(&self, state: &mut MediumState, mut header_addr: usize) {
        let header = Self::header(header_addr);
        debug_assert!(!is_free(header), "double free of a medium block");
        let mut size = payload_of(header);
        self.stats.add(-(HEADER_SIZE as i64 + size as i64));

        // Merge with the upper neighbor if free.
        let upper_addr = header_addr + Self::footprint(size);
        let upper_header = Self::header(upper_addr);
        if upper_header != 0 && is_free(upper_header) {
            let upper_size = payload_of(upper_header);
            Self::bin_remove(state, upper_addr, upper_size);
            size = size + BLOCK_OVERHEAD + upper_size;
        }

        // Own lower-neighbor-is-free flag, preserved on whichever block ends
        // up as the final header after merging downward.
        let mut final_prev_free = prev_medium_free(header);

        // Merge with the lower neighbor if its PREV_MEDIUM_FREE flag says so.
        if prev_medium_free(header) {
            let lower_size = Self::trailing_tag_before(header_addr);
            let lower_addr = header_addr - Self::footprint(lower_size);
            final_prev_free = prev_medium_free(Self::header(lower_addr));
            Self::bin_remove(state, lower_addr, lower_size);
            size = lower_size + BLOCK_OVERHEAD + size;
            header_addr = lower_addr;
        }

        // Whole-pool reclaim: the merged block spans the pool's entire body.
        let pool_start = Self::locate_pool(state, header_addr);
        if self.spans_whole_pool(pool_start, header_addr, size) && state.seq_feed_pool != pool_start {
            Self::pool_unlink(state, pool_start);
            let region = unsafe { NonNull::new_unchecked(pool_start as *mut u8) };
            os::release(region, MEDIUM_POOL_SIZE, &self.stats);
            return;
        }

        let prev_free_bit = if final_prev_free { PREV_MEDIUM_FREE } else { 0 };
        Self::set_header(header_addr, size | IS_MEDIUM | IS_FREE | prev_free_bit);
        Self::set_trailing_tag(header_addr, size);
        Self::set_prev_free_of_upper(header_addr, size, true);
        Self::bin_insert(state, header_addr, size);
    }

    /// Pools are not power-of-2 sized, so recovering the owning pool from
    /// an arbitrary block address means walking the (typically short)
    /// global pool list rather than masking bits off the address.
    fn locate_pool(state: &MediumState, addr: usize) -> usize {
        let mut p = state.pools_head;
        while p != 0 {
            if addr >= p && addr < p + MEDIUM_POOL_SIZE {
                return p;
            }
            p = unsafe { *((p + HEADER_SIZE) as *const usize) };
        }
        debug_assert!(false, "address does not belong to any medium pool");
        0
    }

    fn spans_whole_pool(&self, pool_start: usize, header_addr: usize, size: usize) -> bool {
        let first_block = pool_start + POOL_HEADER_SIZE;
        if header_addr != first_block {
            return false;
        }
        let sentinel_addr = header_addr + Self::footprint(size);
        sentinel_addr == pool_start + MEDIUM_POOL_SIZE - HEADER_SIZE
    }

    pub fn payload_size(&self, body: NonNull<u8>) -> usize {
        let header_addr = body.as_ptr() as usize - HEADER_SIZE;
        payload_of(unsafe { Self::header(header_addr) })
    }

    /// In-place resize per §4.E/§4.H: downsize trims to `new_size` (never
    /// below `MIN_MED`), splitting the excess back into a free block when
    /// there is enough of it; upsize merges the upper neighbor in place
    /// when it is free and large enough. Returns `None` when growth can't
    /// be satisfied in place, leaving the block untouched so the caller
    /// falls back to allocate-copy-free.
    pub fn realloc(&self, body: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let new_size = round16(new_size.max(MIN_MED - HEADER_SIZE));
        let header_addr = body.as_ptr() as usize - HEADER_SIZE;
        let _guard = self.lock();
        let state = self.state();
        let header = unsafe { Self::header(header_addr) };
        let size = payload_of(header);
        let prev_free = prev_medium_free(header);

        if new_size <= size {
            if size >= new_size + MIN_MED + BLOCK_OVERHEAD {
                let remainder_addr = header_addr + Self::footprint(new_size);
                let remainder_size = size - new_size - BLOCK_OVERHEAD;
                unsafe {
                    Self::set_header(header_addr, new_size | IS_MEDIUM | if prev_free { PREV_MEDIUM_FREE } else { 0 });
                    Self::set_trailing_tag(header_addr, new_size);
                    Self::set_header(remainder_addr, remainder_size | IS_MEDIUM | IS_FREE);
                    Self::set_trailing_tag(remainder_addr, remainder_size);
                    Self::set_prev_free_of_upper(remainder_addr, remainder_size, true);
                }
                Self::bin_insert(state, remainder_addr, remainder_size);
                self.stats.add(-((size - new_size) as i64));
            }
            return Some(body);
        }

        let upper_addr = header_addr + Self::footprint(size);
        let upper_header = unsafe { Self::header(upper_addr) };
        if upper_header != 0 && is_free(upper_header) {
            let upper_size = payload_of(upper_header);
            let combined = size + BLOCK_OVERHEAD + upper_size;
            if combined >= new_size {
                Self::bin_remove(state, upper_addr, upper_size);
                if combined >= new_size + MIN_MED + BLOCK_OVERHEAD {
                    let remainder_addr = header_addr + Self::footprint(new_size);
                    let remainder_size = combined - new_size - BLOCK_OVERHEAD;
                    unsafe {
                        Self::set_header(header_addr, new_size | IS_MEDIUM | if prev_free { PREV_MEDIUM_FREE } else { 0 });
                        Self::set_trailing_tag(header_addr, new_size);
                        Self::set_header(remainder_addr, remainder_size | IS_MEDIUM | IS_FREE);
                        Self::set_trailing_tag(remainder_addr, remainder_size);
                        Self::set_prev_free_of_upper(remainder_addr, remainder_size, true);
                    }
                    Self::bin_insert(state, remainder_addr, remainder_size);
                } else {
                    unsafe {
                        Self::set_header(header_addr, combined | IS_MEDIUM | if prev_free { PREV_MEDIUM_FREE } else { 0 });
                        Self::set_trailing_tag(header_addr, combined);
                        Self::set_prev_free_of_upper(header_addr, combined, false);
                    }
                }
                self.stats.add((combined.min(new_size) as i64 - size as i64).max(0));
                return Some(body);
            }
        }

        None
    }
}

pub static MEDIUM: MediumBlockInfo = MediumBlockInfo::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_roundtrip() {
        let p = MEDIUM.alloc(3000).expect("alloc");
        assert!(MEDIUM.payload_size(p) >= 3000);
        MEDIUM.free(p);
    }

    #[test]
    fn adjacent_blocks_coalesce() {
        let a = MEDIUM.alloc(3120).expect("alloc a");
        let b = MEDIUM.alloc(3120).expect("alloc b");
        let c = MEDIUM.alloc(3120).expect("alloc c");
        MEDIUM.free(a);
        MEDIUM.free(c);
        MEDIUM.free(b);
        // No direct way to inspect bins from here; re-allocating a block
        // close to the combined size should succeed without growing the
        // pool count, exercised more thoroughly in the integration tests.
        let d = MEDIUM.alloc(3 * 3120 - 64).expect("alloc merged region");
        MEDIUM.free(d);
    }

    #[test]
    fn body_pointers_are_16_aligned() {
        let mut ptrs = Vec::new();
        for sz in [2900usize, 5000, 10_000, 200_000] {
            let p = MEDIUM.alloc(sz).expect("alloc");
            assert_eq!(p.as_ptr() as usize % 16, 0);
            ptrs.push(p);
        }
        for p in ptrs {
            MEDIUM.free(p);
        }
    }
}

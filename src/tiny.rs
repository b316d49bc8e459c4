//! Tiny Block Front-End ([MODULE G]).
//!
//! Replicates the first `config::TINY_CLASSES` small-block size classes
//! across `config::TINY_ARENAS` independent arenas to spread lock
//! contention on the hottest, smallest allocations (spec §4.G). A
//! process-wide round-robin counter picks a starting arena per call; on
//! contention the probe walks the remaining arenas non-blocking before
//! falling back to the single default small-class arena
//! ([`crate::small::default_types`]).
//!
//! Grounded on the teacher's sharded free-list pattern (`Heap` per thread in
//! `types.rs`, selected without a global lock); generalized here from
//! thread-local sharding to round-robin sharding, since the spec calls for
//! an explicit atomic counter rather than thread-local storage.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::config;
use crate::header::SMALL_CLASS_SIZES;
use crate::small::{self, SmallBlockType};

type TinyArena = [SmallBlockType; config::TINY_CLASSES];

static ARENAS: OnceLock<[TinyArena; config::TINY_ARENAS]> = OnceLock::new();
static TINY_CURRENT_ARENA: AtomicUsize = AtomicUsize::new(0);

fn arenas() -> &'static [TinyArena; config::TINY_ARENAS] {
    ARENAS.get_or_init(|| {
        core::array::from_fn(|_| core::array::from_fn(|class_idx| SmallBlockType::new(SMALL_CLASS_SIZES[class_idx])))
    })
}

/// Exposes the replicated arenas to [`crate::api`]'s diagnostic queries,
/// which must aggregate per-class counters across every arena copy plus the
/// single default arena ([`crate::small::default_types`]).
pub(crate) fn arenas_status() -> &'static [TinyArena; config::TINY_ARENAS] {
    arenas()
}

/// Whether `class_idx` is one of the replicated tiny classes.
#[inline]
pub fn is_tiny_class(class_idx: usize) -> bool {
    class_idx < config::TINY_CLASSES
}

/// Round-robin-then-probe-then-fallback allocation (§4.G). `class_idx` must
/// satisfy [`is_tiny_class`]; callers check this via
/// [`crate::header::class_index_for_block_size`] before routing here.
pub fn alloc(class_idx: usize) -> Option<NonNull<u8>> {
    debug_assert!(is_tiny_class(class_idx));
    let arenas = arenas();
    let start = TINY_CURRENT_ARENA.fetch_add(1, Ordering::Relaxed) % config::TINY_ARENAS;

    for step in 0..config::TINY_ARENAS {
        let a = (start + step) % config::TINY_ARENAS;
        if let Some(guard) = arenas[a][class_idx].try_lock() {
            let result = arenas[a][class_idx].alloc_locked();
            drop(guard);
            if result.is_some() {
                return result;
            }
            // This arena's type is momentarily out of backing pools (OOM on
            // its own carve); keep walking rather than giving up the whole
            // allocation, since another arena's copy may still have room.
        }
    }

    // Total failure across every tiny arena: fall through to the single
    // default small-class arena, blocking (spin-then-yield) as usual.
    small::alloc(small::default_types(), class_idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HEADER_SIZE;

    #[test]
    fn round_robin_spreads_across_arenas() {
        let before = TINY_CURRENT_ARENA.load(Ordering::Relaxed);
        let mut ptrs = Vec::new();
        for _ in 0..32 {
            ptrs.push(alloc(0).expect("alloc"));
        }
        let after = TINY_CURRENT_ARENA.load(Ordering::Relaxed);
        assert_eq!(after - before, 32);
        for p in ptrs {
            let header_addr = p.as_ptr() as usize - HEADER_SIZE;
            small::free(header_addr);
        }
    }
}

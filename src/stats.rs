//! Statistics counters.
//!
//! One [`Arena`] per Medium and Large manager: current bytes, cumulative
//! bytes, sleep count, plus debug-only peak/acquire/release/sleep-time
//! counters. All counters are free-standing atomics rather than a counter
//! guarded by the manager's own lock, so a status read never contends with
//! an allocation in flight.

use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::config;

/// A per-manager statistics bucket (one for Medium, one for Large).
#[derive(Default)]
pub struct Arena {
    current_bytes: AtomicI64,
    cumulative_bytes: AtomicI64,
    sleep_count: AtomicU64,
    peak_bytes: AtomicI64,
    acquire_calls: AtomicU64,
    release_calls: AtomicU64,
    sleep_micros: AtomicU64,
}

impl Arena {
    pub const fn new() -> Self {
        Arena {
            current_bytes: AtomicI64::new(0),
            cumulative_bytes: AtomicI64::new(0),
            sleep_count: AtomicU64::new(0),
            peak_bytes: AtomicI64::new(0),
            acquire_calls: AtomicU64::new(0),
            release_calls: AtomicU64::new(0),
            sleep_micros: AtomicU64::new(0),
        }
    }

    /// Apply a signed byte delta (positive on acquire/growth, negative on
    /// release/shrink). Updates current and cumulative bytes, and — in
    /// debug mode — the advisory peak-bytes watermark.
    pub fn add(&self, amount: i64) {
        if amount == 0 {
            return;
        }
        let current = self.current_bytes.fetch_add(amount, Ordering::Relaxed) + amount;
        if amount > 0 {
            self.cumulative_bytes.fetch_add(amount, Ordering::Relaxed);
        }
        if config::debug_stats() {
            // Advisory: peak tracking is a best-effort load-compare-store,
            // acceptable to race under concurrent load.
            let mut peak = self.peak_bytes.load(Ordering::Relaxed);
            while current > peak {
                match self.peak_bytes.compare_exchange_weak(
                    peak,
                    current,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => peak = observed,
                }
            }
        }
    }

    pub fn current_bytes(&self) -> i64 {
        self.current_bytes.load(Ordering::Relaxed)
    }

    pub fn cumulative_bytes(&self) -> i64 {
        self.cumulative_bytes.load(Ordering::Relaxed)
    }

    pub fn peak_bytes(&self) -> i64 {
        self.peak_bytes.load(Ordering::Relaxed)
    }

    /// Exposes the counter the spin lock bumps directly on every fallthrough
    /// to a yield, so `Arena`'s own `sleep_count` — the one `HeapStatus`
    /// reports — is the one actually incremented, rather than a separate
    /// shadow counter the manager would otherwise have to keep in sync.
    pub fn sleep_counter(&self) -> &AtomicU64 {
        &self.sleep_count
    }

    /// Exposes the debug-only total-sleep-microseconds counter for the same
    /// reason as [`Self::sleep_counter`]: the lock writes directly into the
    /// `Arena` it reports from, instead of a shadow counter the manager
    /// would have to relay by hand.
    pub fn sleep_micros_counter(&self) -> &AtomicU64 {
        &self.sleep_micros
    }

    pub fn sleep_micros(&self) -> u64 {
        self.sleep_micros.load(Ordering::Relaxed)
    }

    pub fn sleep_count(&self) -> u64 {
        self.sleep_count.load(Ordering::Relaxed)
    }

    pub fn note_acquire_call(&self) {
        if config::debug_stats() {
            self.acquire_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn note_release_call(&self) {
        if config::debug_stats() {
            self.release_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn acquire_calls(&self) -> u64 {
        self.acquire_calls.load(Ordering::Relaxed)
    }

    pub fn release_calls(&self) -> u64 {
        self.release_calls.load(Ordering::Relaxed)
    }
}

/// Process-wide statistics snapshot returned by `current_heap_status()`.
/// `medium`/`large` are the arenas owned by those managers; the remaining
/// fields summarize small/tiny contention, which has no single owning
/// arena (it is per size-class, see [`crate::small`]). The
/// `*_acquire_calls`/`*_release_calls`/`*_sleep_micros` fields are the
/// debug-only counters named in §4.B's "In debug mode additionally..."
/// clause; they read zero outside the `debug_stats` feature, since `Arena`
/// never increments them without it.
pub struct HeapStatus {
    pub medium_current_bytes: i64,
    pub medium_cumulative_bytes: i64,
    pub medium_peak_bytes: i64,
    pub medium_sleep_count: u64,
    pub medium_acquire_calls: u64,
    pub medium_release_calls: u64,
    pub medium_sleep_micros: u64,
    pub large_current_bytes: i64,
    pub large_cumulative_bytes: i64,
    pub large_peak_bytes: i64,
    pub large_sleep_count: u64,
    pub large_acquire_calls: u64,
    pub large_release_calls: u64,
    pub large_sleep_micros: u64,
    pub global_sleep_count: u64,
    pub small_get_sleep_count: u64,
    pub small_free_sleep_count: u64,
    pub small_block_count: u64,
    pub small_block_bytes: u64,
}

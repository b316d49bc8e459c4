//! Compile-time and process-wide tunables.
//!
//! Mirrors the `cfg`-gated constant style of the teacher's `types.rs`:
//! knobs that are naturally compile-time stay behind Cargo features: see
//! `BOOST`, `ASSUME_MULTITHREAD`, `PAUSE_MORE`, `NO_REMAP`, `REPORT_LEAKS`,
//! `DEBUG`, `STANDALONE` in spec §6.

use core::sync::atomic::{AtomicUsize, Ordering};

/// `TINY_CLASSES_PO2 ∈ {3,4,4}` (§6): number of tiny size classes replicated
/// across arenas. `boost` and `booster` both widen this to 16; they differ
/// only in `TINY_ARENAS` below.
pub const TINY_CLASSES: usize = if cfg!(feature = "boost") { 16 } else { 8 };

/// `TINY_ARENAS_PO2 ∈ {3,4,5}` (§6): number of round-robin tiny arenas.
/// Plain `boost` doubles this to 16; `booster` doubles it again to 32.
pub const TINY_ARENAS: usize = if cfg!(feature = "booster") {
    32
} else if cfg!(feature = "boost") {
    16
} else {
    8
};

/// Whether the host platform supports in-place page remapping for large
/// blocks. Linux has `mremap(2)`; every other target falls back to
/// copy-based reallocation, same as `NO_REMAP` forces unconditionally.
pub const fn remap_supported() -> bool {
    if cfg!(feature = "no_remap") {
        false
    } else {
        cfg!(target_os = "linux")
    }
}

/// Scales every `N_spin` constant in the lock module. 1 on modern Intel
/// where `pause` is ~140 cycles, 10 on older microarchitectures or when
/// `pause_more` is requested.
static SPIN_FACTOR: AtomicUsize = AtomicUsize::new(if cfg!(feature = "pause_more") { 10 } else { 1 });

pub fn spin_factor() -> usize {
    SPIN_FACTOR.load(Ordering::Relaxed)
}

/// Allows a host embedding this crate to raise the spin factor at runtime
/// (e.g. after detecting an older microarchitecture), without requiring a
/// rebuild. Has no effect once set below 1.
pub fn set_spin_factor(factor: usize) {
    if factor >= 1 {
        SPIN_FACTOR.store(factor, Ordering::Relaxed);
    }
}

pub const fn report_leaks() -> bool {
    cfg!(feature = "report_leaks")
}

pub const fn debug_stats() -> bool {
    cfg!(feature = "debug_stats")
}

/// Gates the `IsMultiThread` fast path in [`crate::lock`]: when set, every
/// [`crate::lock::SpinLock::lock_timed`] call takes the full CAS/spin/yield
/// protocol immediately instead of first checking whether a second thread
/// has ever been observed. Useful when the embedding process is known to be
/// multithreaded from the start, so the single-thread fast path would never
/// fire anyway and its bookkeeping is pure overhead.
pub const fn assume_multithread() -> bool {
    cfg!(feature = "assume_multithread")
}

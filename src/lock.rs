//! Spin-Wait Lock.
//!
//! A one-byte atomic flag per lock object: bounded spin on contention, then
//! an OS yield with a sleep-counter increment, then retry. Never blocks
//! indefinitely — only the OS scheduler's own fairness bounds the wait.
//! Each manager embeds its own [`SpinLock`] rather than sharing one, so
//! contention on medium blocks never stalls small or large allocations.

use core::cell::Cell;
use core::hint;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use core::time::Duration;

use crate::config;

/// Per-lock-class spin budgets before falling back to a yield (§4.C).
/// Scaled by [`config::spin_factor`].
pub const SPIN_SMALL_GET: usize = 10;
pub const SPIN_SMALL_FREE: usize = 2;
pub const SPIN_MEDIUM: usize = 500;
pub const SPIN_LARGE: usize = 500;

/// Process-wide "has a second thread ever called into a lock" latch: the
/// `IsMultiThread` fast-path check (§6). Until it flips, [`SpinLock::lock_timed`]
/// skips the CAS/spin/yield protocol entirely — with only one thread ever
/// observed, there is no contention to protect against, so a plain
/// load-then-store suffices. `assume_multithread` (§6) disables this fast
/// path unconditionally, treating every call as contended from the start.
static OWNER_THREAD: AtomicUsize = AtomicUsize::new(0);
static IS_MULTITHREADED: AtomicBool = AtomicBool::new(false);

thread_local! {
    // Stable Rust exposes no integer `ThreadId`; the address of this cell
    // is a cheap, unique-per-thread tag for as long as the thread lives.
    static THREAD_TAG: Cell<u8> = Cell::new(0);
}

#[inline]
fn current_thread_tag() -> usize {
    THREAD_TAG.with(|c| c as *const Cell<u8> as usize)
}

/// `true` once a second distinct thread has been observed calling into any
/// lock, or immediately under `assume_multithread`.
#[inline]
fn is_multithreaded() -> bool {
    if config::assume_multithread() {
        return true;
    }
    if IS_MULTITHREADED.load(Ordering::Relaxed) {
        return true;
    }
    let tag = current_thread_tag();
    match OWNER_THREAD.compare_exchange(0, tag, Ordering::Relaxed, Ordering::Relaxed) {
        Ok(_) => false,                  // first thread ever seen through this path
        Err(owner) if owner == tag => false, // same thread calling again
        Err(_) => {
            IS_MULTITHREADED.store(true, Ordering::Relaxed);
            true
        }
    }
}

/// A single-byte spin-then-yield lock, matching the teacher's flag field
/// but applied generically so the small/medium/large managers each embed
/// one rather than duplicating the protocol.
pub struct SpinLock {
    locked: AtomicBool,
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinLock {
    pub const fn new() -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquire protocol per §4.C: CAS, bounded spin, yield-and-retry.
    /// `spin_budget` is the lock-class-specific `N_spin` constant;
    /// `sleep_counter` is incremented every time the lock falls through to
    /// the OS yield. `sleep_micros` is the arena's debug-only total-sleep
    /// counter (§4.B); `None` for locks with no owning `Arena` (small/tiny
    /// classes only keep a sleep *count*, per §4.B/§6).
    pub fn lock(&self, spin_budget: usize, sleep_counter: &AtomicU64) -> SpinGuard<'_> {
        self.lock_timed(spin_budget, sleep_counter, None)
    }

    pub fn lock_timed(
        &self,
        spin_budget: usize,
        sleep_counter: &AtomicU64,
        sleep_micros: Option<&AtomicU64>,
    ) -> SpinGuard<'_> {
        if !is_multithreaded() {
            // No second thread has ever been seen: nothing to contend with,
            // so skip the CAS/spin/yield protocol and just take the lock.
            if !self.locked.load(Ordering::Relaxed) {
                self.locked.store(true, Ordering::Relaxed);
                return SpinGuard { lock: self };
            }
            // Found it already held despite believing we're alone (e.g. a
            // racing thread crossed the `is_multithreaded` check, or a
            // reentrant call) — fall through to the real protocol below.
        }

        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinGuard { lock: self };
            }

            let budget = spin_budget.saturating_mul(config::spin_factor()).max(1);
            let mut spun = 0;
            loop {
                if spun >= budget {
                    break;
                }
                if !self.locked.load(Ordering::Relaxed) {
                    break;
                }
                hint::spin_loop();
                spun += 1;
            }

            if !self.locked.load(Ordering::Relaxed) {
                continue; // try the CAS again without yielding
            }

            sleep_counter.fetch_add(1, Ordering::Relaxed);
            let timer = SleepTimer::start();
            crate::os::yield_now();
            if let Some(micros_counter) = sleep_micros {
                if config::debug_stats() {
                    micros_counter.fetch_add(timer.elapsed().as_micros() as u64, Ordering::Relaxed);
                }
            }
        }
    }

    /// Non-blocking attempt used by the tiny front-end's opportunistic
    /// probe of neighboring size classes (§4.G).
    pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinGuard { lock: self })
        } else {
            None
        }
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// RAII guard releasing a [`SpinLock`] on drop.
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Times a spin-then-yield wait for the debug `total sleep microseconds`
/// counter (§4.B). Only active under `debug_stats`; otherwise a no-op that
/// costs nothing on the fast path.
pub struct SleepTimer {
    start: Option<std::time::Instant>,
}

impl SleepTimer {
    pub fn start() -> Self {
        SleepTimer {
            start: if config::debug_stats() {
                Some(std::time::Instant::now())
            } else {
                None
            },
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.map(|s| s.elapsed()).unwrap_or_default()
    }
}

//! `rheap`: a general-purpose multi-threaded heap allocator.
//!
//! Replaces the host process's default allocator with a design tuned for
//! long-running, many-core, allocation-heavy services: round-robin tiny
//! arenas for the hottest small sizes, a medium-block pool indexed by a
//! two-level bitmap of binned free lists, and an OS-backed large-block
//! list with in-place remap on resize. See the `api` module for the
//! public entry points, and `status` for a human-readable summary.

pub mod api;
pub mod config;
pub mod header;
pub mod large;
pub mod lock;
pub mod medium;
pub mod os;
pub mod small;
pub mod stats;
pub mod status;
pub mod tiny;

#[cfg(all(feature = "global", not(feature = "standalone")))]
mod global_alloc {
    use core::alloc::{GlobalAlloc, Layout};
    use core::ptr::NonNull;

    use crate::api;
    use crate::header::USER_ALIGN;

    /// Installs `rheap` as the process-wide allocator via
    /// `#[global_allocator]`. Gated behind the `global` feature
    /// (default-enabled) so the crate can also be linked purely as a
    /// library, mirroring the `STANDALONE` compile-time option (§6) that
    /// omits the runtime-hook installation.
    pub struct RHeap;

    unsafe impl GlobalAlloc for RHeap {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            // Alignment beyond the allocator's own 16-byte guarantee is out
            // of scope (§1 Non-goals): such a request cannot be satisfied
            // and is reported as an allocation failure, per `GlobalAlloc`'s
            // contract.
            if layout.align() > USER_ALIGN {
                return core::ptr::null_mut();
            }
            api::get_mem(layout.size() as isize)
                .map(|p| p.as_ptr())
                .unwrap_or(core::ptr::null_mut())
        }

        unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
            if layout.align() > USER_ALIGN {
                return core::ptr::null_mut();
            }
            api::alloc_mem(layout.size() as isize)
                .map(|p| p.as_ptr())
                .unwrap_or(core::ptr::null_mut())
        }

        unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
            api::free_mem(NonNull::new(ptr));
        }

        unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
            if layout.align() > USER_ALIGN {
                return core::ptr::null_mut();
            }
            api::realloc_mem(NonNull::new(ptr), new_size as isize)
                .map(|p| p.as_ptr())
                .unwrap_or(core::ptr::null_mut())
        }
    }
}

#[cfg(all(feature = "global", not(feature = "standalone")))]
pub use global_alloc::RHeap;

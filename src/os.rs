//! Page Provider Facade.
//!
//! Reserves, releases and (where supported) remaps anonymous,
//! zero-initialized OS pages: `#[cfg(unix)]` over `libc::{mmap, munmap,
//! mremap}`, `#[cfg(windows)]` over `winapi::um::memoryapi`. Every other
//! manager goes through this module rather than calling the OS directly, so
//! the platform split lives in exactly one place.

use core::ptr::NonNull;
use log::warn;

use crate::stats::Arena;

#[cfg(unix)]
fn os_page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(windows)]
fn os_page_size() -> usize {
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
    unsafe {
        let mut si: SYSTEM_INFO = core::mem::zeroed();
        GetSystemInfo(&mut si);
        si.dwPageSize as usize
    }
}

fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) / align * align
}

/// Round a requested size up to a 64 KiB allocation granularity, which is
/// both the large-block rounding unit and a sane OS mmap granule.
pub fn good_alloc_size(size: usize) -> usize {
    align_up(size, 64 * 1024)
}

/// Reserve a zero-initialized, read+write, page-aligned region of at least
/// `size` bytes. Returns `None` on OOM, the page provider's only error
/// kind, which callers surface onward as a null result.
pub fn acquire(size: usize, stats: &Arena) -> Option<NonNull<u8>> {
    if size == 0 {
        return None;
    }
    let size = align_up(size, os_page_size());

    #[cfg(unix)]
    let ptr = unsafe {
        let p = libc::mmap(
            core::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if p == libc::MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    };

    #[cfg(windows)]
    let ptr = unsafe {
        use winapi::um::memoryapi::VirtualAlloc;
        use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};
        VirtualAlloc(
            core::ptr::null_mut(),
            size,
            MEM_RESERVE | MEM_COMMIT,
            PAGE_READWRITE,
        ) as *mut u8
    };

    stats.note_acquire_call();
    match NonNull::new(ptr) {
        Some(p) => {
            stats.add(size as i64);
            Some(p)
        }
        None => {
            warn!(
                "rheap: OS page acquire failed for {} bytes (errno {})",
                size,
                last_os_error()
            );
            None
        }
    }
}

/// Release the entire region previously returned by [`acquire`].
pub fn release(ptr: NonNull<u8>, size: usize, stats: &Arena) {
    let size = align_up(size, os_page_size());
    #[cfg(unix)]
    let ok = unsafe { libc::munmap(ptr.as_ptr() as *mut _, size) == 0 };
    #[cfg(windows)]
    let ok = unsafe {
        use winapi::um::memoryapi::VirtualFree;
        use winapi::um::winnt::MEM_RELEASE;
        VirtualFree(ptr.as_ptr() as *mut _, 0, MEM_RELEASE) != 0
    };
    stats.note_release_call();
    if ok {
        stats.add(-(size as i64));
    } else {
        warn!(
            "rheap: OS page release failed for {:p}, size {} (errno {})",
            ptr.as_ptr(),
            size,
            last_os_error()
        );
    }
}

/// Grow or shrink a region in place via OS page remapping. `None` means
/// "unsupported on this platform/config"; callers fall back to
/// acquire/copy/release.
pub fn remap(ptr: NonNull<u8>, old_size: usize, new_size: usize, stats: &Arena) -> Option<NonNull<u8>> {
    if !crate::config::remap_supported() {
        return None;
    }
    #[cfg(target_os = "linux")]
    {
        let old_size = align_up(old_size, os_page_size());
        let new_size = align_up(new_size, os_page_size());
        let result = unsafe {
            libc::mremap(
                ptr.as_ptr() as *mut _,
                old_size,
                new_size,
                libc::MREMAP_MAYMOVE,
            )
        };
        if result == libc::MAP_FAILED {
            warn!(
                "rheap: mremap failed for {:p}, {} -> {} bytes (errno {})",
                ptr.as_ptr(),
                old_size,
                new_size,
                last_os_error()
            );
            return None;
        }
        stats.add(new_size as i64 - old_size as i64);
        NonNull::new(result as *mut u8)
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (ptr, old_size, new_size, stats);
        None
    }
}

/// Relinquish the CPU to another runnable thread. Used only on the spin
/// lock's fallback path — never on the allocation fast path.
pub fn yield_now() {
    std::thread::yield_now();
}

#[cfg(unix)]
fn last_os_error() -> i32 {
    errno::errno().0
}

#[cfg(windows)]
fn last_os_error() -> u32 {
    unsafe { winapi::um::errhandlingapi::GetLastError() }
}

//! Human-readable status printer.
//!
//! Outside THE CORE per spec §1 ("the human-readable status printer" is
//! listed among the external collaborators), but carried as ambient
//! diagnostic tooling the way the teacher's own stats module prints a
//! summary at process exit. Formats [`HeapStatus`] for `eprintln!`/`log`
//! consumption; never called from an allocation path.

use core::fmt;

use crate::stats::HeapStatus;

impl fmt::Display for HeapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "rheap status:")?;
        writeln!(
            f,
            "  medium: {} B live ({} B cumulative, peak {} B), {} sleeps ({} acquires, {} releases, {} us asleep)",
            self.medium_current_bytes,
            self.medium_cumulative_bytes,
            self.medium_peak_bytes,
            self.medium_sleep_count,
            self.medium_acquire_calls,
            self.medium_release_calls,
            self.medium_sleep_micros
        )?;
        writeln!(
            f,
            "  large:  {} B live ({} B cumulative, peak {} B), {} sleeps ({} acquires, {} releases, {} us asleep)",
            self.large_current_bytes,
            self.large_cumulative_bytes,
            self.large_peak_bytes,
            self.large_sleep_count,
            self.large_acquire_calls,
            self.large_release_calls,
            self.large_sleep_micros
        )?;
        writeln!(
            f,
            "  small:  {} blocks live, {} B live, {} get-sleeps, {} free-sleeps",
            self.small_block_count, self.small_block_bytes, self.small_get_sleep_count, self.small_free_sleep_count
        )?;
        write!(f, "  total sleeps (all managers): {}", self.global_sleep_count)
    }
}

/// Render the current process-wide heap status, as produced by
/// [`crate::api::current_heap_status`]. A thin convenience wrapper so
/// callers that just want text don't need to import `HeapStatus` directly.
pub fn format_status() -> String {
    crate::api::current_heap_status().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_formats_without_panicking() {
        let text = format_status();
        assert!(text.contains("rheap status"));
    }
}

//! Thread-count reader for the current process.
//!
//! On Linux this parses the `Threads:` field of `/proc/self/status`. On
//! other platforms `None` is returned so the crate still compiles
//! everywhere; callers fall back to reporting zero threads.

#[cfg(target_os = "linux")]
pub(crate) fn thread_count() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("Threads:") {
            return rest.trim().parse::<u32>().ok();
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn thread_count() -> Option<u32> {
    None
}

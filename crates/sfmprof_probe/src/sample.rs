use std::time::Instant;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// A point-in-time reading of the profiled process, immutable once captured.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSample {
    /// Monotonic capture instant, used for time-weighted averaging.
    pub taken_at: Instant,
    /// Resident set size in bytes.
    pub resident_memory_bytes: u64,
    /// Instantaneous CPU usage where 100.0 is one fully busy core. Values
    /// above 100.0 mean the process is running on several cores at once.
    pub cpu_percent: f64,
    /// OS threads owned by the process, 0 where the platform offers no
    /// cheap way to count them.
    pub thread_count: u32,
    /// Live child processes attributed to the session at capture time.
    pub subprocess_count: u32,
}

impl ResourceSample {
    /// An all-zero reading, used when no probe data is available yet.
    pub fn zeroed(taken_at: Instant) -> Self {
        Self {
            taken_at,
            resident_memory_bytes: 0,
            cpu_percent: 0.0,
            thread_count: 0,
            subprocess_count: 0,
        }
    }

    /// Resident memory expressed in megabytes.
    pub fn memory_mb(&self) -> f64 {
        self.resident_memory_bytes as f64 / BYTES_PER_MB
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_is_reported_in_mb() {
        let mut sample = ResourceSample::zeroed(Instant::now());
        sample.resident_memory_bytes = 512 * 1024 * 1024;
        let mb = sample.memory_mb();
        assert!((mb - 512.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zeroed_sample_is_empty() {
        let sample = ResourceSample::zeroed(Instant::now());
        assert_eq!(sample.resident_memory_bytes, 0);
        assert_eq!(sample.thread_count, 0);
        assert_eq!(sample.subprocess_count, 0);
    }
}

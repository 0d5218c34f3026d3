use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default cadence of the background resource sampler.
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(50);

/// Floor for caller-supplied sampling intervals. Anything below this turns
/// the sampler into a busy loop that distorts the CPU figures it reports.
pub const MIN_SAMPLING_INTERVAL: Duration = Duration::from_millis(1);

/// Tuning knobs for a profiling session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerOptions {
    /// Cadence of the background resource sampler.
    pub sampling_interval: Duration,
    /// Enumerate the OS process table each tick to count child processes
    /// spawned by the profiled process. Off by default; full-table scans
    /// are much more expensive than single-process refreshes.
    pub subprocess_monitoring: bool,
    /// Collect CPU, thread-count, and child-process readings in addition
    /// to memory. Off reduces each sample to the memory reading alone.
    pub detailed_metrics: bool,
}

impl Default for ProfilerOptions {
    fn default() -> Self {
        Self {
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            subprocess_monitoring: false,
            detailed_metrics: true,
        }
    }
}

impl ProfilerOptions {
    #[must_use]
    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval.max(MIN_SAMPLING_INTERVAL);
        self
    }

    #[must_use]
    pub fn with_subprocess_monitoring(mut self, enabled: bool) -> Self {
        self.subprocess_monitoring = enabled;
        self
    }

    #[must_use]
    pub fn with_detailed_metrics(mut self, enabled: bool) -> Self {
        self.detailed_metrics = enabled;
        self
    }

    /// Sampling interval clamped to the supported floor.
    pub fn effective_interval(&self) -> Duration {
        self.sampling_interval.max(MIN_SAMPLING_INTERVAL)
    }
}

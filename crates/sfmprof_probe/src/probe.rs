use std::time::Instant;

use sysinfo::{Pid, ProcessRefreshKind, System};
use tracing::warn;

use crate::proc_status;
use crate::sample::ResourceSample;

/// Polls resource usage of the current process.
///
/// A failed read never aborts a session: the previous good reading is
/// carried forward with a fresh timestamp, the failure is counted, and a
/// warning is logged on the first occurrence only.
pub struct ResourceProbe {
    system: System,
    pid: Option<Pid>,
    refresh: ProcessRefreshKind,
    detailed: bool,
    last_good: Option<ResourceSample>,
    failed_reads: u64,
    warned: bool,
}

impl ResourceProbe {
    /// Probe the calling process. `detailed` adds CPU and thread-count
    /// readings on top of the always-on memory reading.
    pub fn for_current_process(detailed: bool) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(reason) => {
                warn!("resource probe disabled, current pid unavailable: {reason}");
                None
            }
        };
        let refresh = if detailed {
            ProcessRefreshKind::new().with_cpu().with_memory()
        } else {
            ProcessRefreshKind::new().with_memory()
        };

        Self {
            system: System::new(),
            pid,
            refresh,
            detailed,
            last_good: None,
            failed_reads: 0,
            warned: false,
        }
    }

    /// Capture one reading. CPU figures are deltas between consecutive
    /// calls, so the very first reading of a session reports 0.0.
    pub fn sample(&mut self) -> ResourceSample {
        let taken_at = Instant::now();
        let Some(pid) = self.pid else {
            return self.record_failure(taken_at);
        };
        if !self.system.refresh_process_specifics(pid, self.refresh) {
            return self.record_failure(taken_at);
        }
        let Some(process) = self.system.process(pid) else {
            return self.record_failure(taken_at);
        };

        let mut sample = ResourceSample::zeroed(taken_at);
        sample.resident_memory_bytes = process.memory();
        if self.detailed {
            sample.cpu_percent = f64::from(process.cpu_usage());
            sample.thread_count = proc_status::thread_count().unwrap_or(0);
        }
        self.last_good = Some(sample);
        sample
    }

    /// Number of reads that had to fall back to a stale or zeroed sample.
    pub fn failed_reads(&self) -> u64 {
        self.failed_reads
    }

    fn record_failure(&mut self, taken_at: Instant) -> ResourceSample {
        self.failed_reads += 1;
        if !self.warned {
            warn!("resource read failed, carrying previous sample forward");
            self.warned = true;
        }
        match self.last_good {
            Some(previous) => ResourceSample {
                taken_at,
                ..previous
            },
            None => ResourceSample::zeroed(taken_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn samples_the_current_process() {
        let mut probe = ResourceProbe::for_current_process(true);
        let sample = probe.sample();
        assert!(sample.resident_memory_bytes > 0);
        assert!(sample.thread_count >= 1);
        assert_eq!(probe.failed_reads(), 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn memory_only_probe_skips_detail_fields() {
        let mut probe = ResourceProbe::for_current_process(false);
        let sample = probe.sample();
        assert!(sample.resident_memory_bytes > 0);
        assert_eq!(sample.thread_count, 0);
        assert!(sample.cpu_percent.abs() < f64::EPSILON);
    }
}

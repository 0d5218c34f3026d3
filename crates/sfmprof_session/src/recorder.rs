use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use sfmprof_config::ProfilerOptions;
use sfmprof_probe::{ChildReport, ResourceProbe, SubprocessMonitor, SysinfoLister};

use crate::label::SessionLabel;
use crate::stage::{StageInterval, StageTracker};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Point-in-time view of a running session.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveStats {
    pub elapsed: Duration,
    pub current_memory_bytes: u64,
    pub peak_memory_increment_bytes: u64,
    /// Time-weighted CPU average over the samples taken so far.
    pub average_cpu_percent: f64,
    pub samples: u64,
}

/// Immutable record of a finished session, ready for aggregation.
#[derive(Debug, Clone)]
pub struct SealedSession {
    pub label: SessionLabel,
    pub started_at: DateTime<Utc>,
    /// Thread that opened the session.
    pub owning_thread: ThreadId,
    /// Exact START-to-END span; the intervals sum to this.
    pub duration: Duration,
    pub intervals: Vec<StageInterval>,
    /// Peak resident memory above the first sample's baseline. A session
    /// that frees more than it allocates reports zero, not a negative
    /// number.
    pub peak_memory_increment_bytes: u64,
    /// Time-weighted CPU average where 100.0 is one fully busy core.
    pub average_cpu_percent: f64,
    pub max_thread_count: u32,
    /// Highest simultaneous child-process count observed.
    pub peak_subprocesses: u32,
    pub samples: u64,
    pub failed_samples: u64,
}

impl SealedSession {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    pub fn peak_memory_mb(&self) -> f64 {
        self.peak_memory_increment_bytes as f64 / BYTES_PER_MB
    }
}

/// Accumulated sampler readings, shared between the sampler thread and the
/// session owner.
#[derive(Debug, Clone, Default)]
struct SampleTotals {
    samples: u64,
    failed_samples: u64,
    /// Memory baseline from the first successful reading.
    first_memory_bytes: Option<u64>,
    last_memory_bytes: u64,
    peak_memory_bytes: u64,
    /// Sum of `cpu_percent * dt_ms` per sample.
    weighted_cpu_ms: f64,
    /// Sum of `dt_ms` per sample.
    weighted_ms: f64,
    max_thread_count: u32,
    peak_subprocesses: u32,
}

impl SampleTotals {
    fn peak_memory_increment(&self) -> u64 {
        self.first_memory_bytes
            .map_or(0, |first| self.peak_memory_bytes.saturating_sub(first))
    }

    fn average_cpu(&self) -> f64 {
        if self.weighted_ms > 0.0 {
            self.weighted_cpu_ms / self.weighted_ms
        } else {
            0.0
        }
    }
}

struct SamplerShared {
    totals: Mutex<SampleTotals>,
    subprocess_enabled: AtomicBool,
}

/// One profiling session: a stage tracker plus a background sampler
/// thread.
///
/// The sampler wakes every `sampling_interval`, takes a resource reading,
/// and folds it into the shared totals. Stopping signals the thread, which
/// takes one final reading before exiting, so even sessions shorter than
/// the interval get real figures. If the recorder is dropped without
/// [`stop`](Self::stop) the channel disconnects and the thread winds down
/// on its own.
pub struct SessionRecorder {
    label: SessionLabel,
    started_at: DateTime<Utc>,
    started: Instant,
    owning_thread: ThreadId,
    tracker: StageTracker,
    shared: Arc<SamplerShared>,
    stop_tx: Sender<()>,
    sampler: Option<JoinHandle<()>>,
}

impl SessionRecorder {
    pub fn start(label: SessionLabel, options: &ProfilerOptions) -> Self {
        let started_at = Utc::now();
        let started = Instant::now();
        let shared = Arc::new(SamplerShared {
            totals: Mutex::new(SampleTotals::default()),
            subprocess_enabled: AtomicBool::new(options.subprocess_monitoring),
        });

        let (stop_tx, stop_rx) = bounded(1);
        let interval = options.effective_interval();
        let detailed = options.detailed_metrics;
        let session_start_secs = started_at.timestamp().max(0) as u64;
        let thread_shared = Arc::clone(&shared);
        let sampler = thread::Builder::new()
            .name("sfmprof-sampler".to_owned())
            .spawn(move || {
                sampling_loop(
                    &thread_shared,
                    &stop_rx,
                    interval,
                    detailed,
                    started,
                    session_start_secs,
                );
            });
        let sampler = match sampler {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("failed to spawn sampler thread, session will have no resource figures: {err}");
                None
            }
        };

        debug!(label = %label, "profiling session started");
        Self {
            label,
            started_at,
            started,
            owning_thread: thread::current().id(),
            tracker: StageTracker::begin(started),
            shared,
            stop_tx,
            sampler,
        }
    }

    /// Record a named stage checkpoint at the current instant.
    pub fn mark_stage(&mut self, name: &str) {
        self.tracker.mark(name);
    }

    /// Toggle child-process counting mid-session. Children are attributed
    /// by the session's wall-clock start regardless of when the toggle
    /// flips. Has no effect on sessions opened with detailed metrics off.
    pub fn enable_subprocess_monitoring(&self, enabled: bool) {
        self.shared
            .subprocess_enabled
            .store(enabled, Ordering::Relaxed);
    }

    pub fn label(&self) -> &SessionLabel {
        &self.label
    }

    pub fn live_stats(&self) -> LiveStats {
        let totals = self.shared.totals.lock();
        LiveStats {
            elapsed: self.started.elapsed(),
            current_memory_bytes: totals.last_memory_bytes,
            peak_memory_increment_bytes: totals.peak_memory_increment(),
            average_cpu_percent: totals.average_cpu(),
            samples: totals.samples,
        }
    }

    /// Stop sampling, wait for the final reading, and seal the session.
    /// Blocks for at most one sampler tick.
    pub fn stop(self) -> SealedSession {
        let Self {
            label,
            started_at,
            started: _,
            owning_thread,
            tracker,
            shared,
            stop_tx,
            sampler,
        } = self;

        let _ = stop_tx.try_send(());
        if let Some(handle) = sampler {
            if handle.join().is_err() {
                warn!("sampler thread panicked, resource figures may be incomplete");
            }
        }

        let finalized = tracker.finalize();
        let totals = shared.totals.lock().clone();
        debug!(
            label = %label,
            duration_ms = finalized.total.as_secs_f64() * 1000.0,
            samples = totals.samples,
            "profiling session sealed"
        );

        SealedSession {
            label,
            started_at,
            owning_thread,
            duration: finalized.total,
            intervals: finalized.intervals,
            peak_memory_increment_bytes: totals.peak_memory_increment(),
            average_cpu_percent: totals.average_cpu(),
            max_thread_count: totals.max_thread_count,
            peak_subprocesses: totals.peak_subprocesses,
            samples: totals.samples,
            failed_samples: totals.failed_samples,
        }
    }
}

fn sampling_loop(
    shared: &SamplerShared,
    stop: &Receiver<()>,
    interval: Duration,
    detailed: bool,
    session_start: Instant,
    session_start_secs: u64,
) {
    let mut probe = ResourceProbe::for_current_process(detailed);
    let mut lister = SysinfoLister::new();
    // detailed_metrics = false strips the session down to memory figures,
    // so no monitor is built and the subprocess toggle stays inert.
    let mut monitor = if detailed {
        match SubprocessMonitor::for_current_process(session_start_secs) {
            Ok(monitor) => Some(monitor),
            Err(err) => {
                warn!("subprocess monitoring unavailable: {err}");
                None
            }
        }
    } else {
        None
    };
    let mut previous_tick = session_start;

    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                previous_tick = tick(shared, &mut probe, monitor.as_mut(), &mut lister, previous_tick);
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                // Final reading, so sessions shorter than one interval
                // still report real figures.
                tick(shared, &mut probe, monitor.as_mut(), &mut lister, previous_tick);
                break;
            }
        }
    }
}

fn tick(
    shared: &SamplerShared,
    probe: &mut ResourceProbe,
    monitor: Option<&mut SubprocessMonitor>,
    lister: &mut SysinfoLister,
    previous_tick: Instant,
) -> Instant {
    let children = match monitor {
        Some(monitor) if shared.subprocess_enabled.load(Ordering::Relaxed) => monitor.scan(lister),
        _ => ChildReport::default(),
    };

    let failures_before = probe.failed_reads();
    let mut sample = probe.sample();
    let good_read = probe.failed_reads() == failures_before;
    sample.subprocess_count = children.count_now;

    let dt_ms = sample
        .taken_at
        .saturating_duration_since(previous_tick)
        .as_secs_f64()
        * 1000.0;

    let mut totals = shared.totals.lock();
    totals.samples += 1;
    totals.failed_samples = probe.failed_reads();
    if good_read && totals.first_memory_bytes.is_none() {
        totals.first_memory_bytes = Some(sample.resident_memory_bytes);
    }
    totals.last_memory_bytes = sample.resident_memory_bytes;
    totals.peak_memory_bytes = totals.peak_memory_bytes.max(sample.resident_memory_bytes);
    totals.weighted_cpu_ms += sample.cpu_percent * dt_ms;
    totals.weighted_ms += dt_ms;
    totals.max_thread_count = totals.max_thread_count.max(sample.thread_count);
    totals.peak_subprocesses = totals.peak_subprocesses.max(sample.subprocess_count);
    drop(totals);

    sample.taken_at
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_options() -> ProfilerOptions {
        ProfilerOptions::default().with_sampling_interval(Duration::from_millis(5))
    }

    #[test]
    fn sealed_session_reports_samples_and_exact_interval_sum() {
        let mut recorder =
            SessionRecorder::start(SessionLabel::from("incremental_mapper"), &fast_options());
        thread::sleep(Duration::from_millis(30));
        recorder.mark_stage("feature_extraction");
        thread::sleep(Duration::from_millis(10));
        recorder.mark_stage("feature_matching");

        let sealed = recorder.stop();
        assert!(sealed.samples >= 1);
        assert!(sealed.duration >= Duration::from_millis(40));
        assert_eq!(sealed.intervals.len(), 3);

        let sum: Duration = sealed
            .intervals
            .iter()
            .map(|interval| interval.duration)
            .sum();
        assert_eq!(sum, sealed.duration);
    }

    #[test]
    fn session_without_marks_seals_into_one_interval() {
        let recorder = SessionRecorder::start(SessionLabel::from("warmup"), &fast_options());
        thread::sleep(Duration::from_millis(10));
        let sealed = recorder.stop();
        assert_eq!(sealed.intervals.len(), 1);
        assert_eq!(sealed.intervals[0].name, "START_to_END");
    }

    #[test]
    fn short_session_still_gets_a_final_sample() {
        let options =
            ProfilerOptions::default().with_sampling_interval(Duration::from_secs(3600));
        let recorder = SessionRecorder::start(SessionLabel::from("blink"), &options);
        let sealed = recorder.stop();
        assert!(sealed.samples >= 1);
    }

    #[test]
    fn live_stats_observe_the_running_sampler() {
        let recorder = SessionRecorder::start(SessionLabel::from("live"), &fast_options());
        thread::sleep(Duration::from_millis(40));
        let stats = recorder.live_stats();
        assert!(stats.samples >= 1);
        assert!(stats.elapsed >= Duration::from_millis(40));
        let sealed = recorder.stop();
        assert!(sealed.samples >= stats.samples);
    }

    #[test]
    fn owning_thread_is_the_thread_that_started_the_session() {
        let recorder = SessionRecorder::start(SessionLabel::from("owner"), &fast_options());
        assert_eq!(recorder.owning_thread, thread::current().id());
        let sealed = recorder.stop();
        assert_eq!(sealed.owning_thread, thread::current().id());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn disabling_detailed_metrics_strips_thread_and_subprocess_figures() {
        let options = ProfilerOptions::default()
            .with_sampling_interval(Duration::from_millis(10))
            .with_subprocess_monitoring(true)
            .with_detailed_metrics(false);
        let recorder = SessionRecorder::start(SessionLabel::from("memory_only"), &options);

        let mut child = std::process::Command::new("sleep")
            .arg("1")
            .spawn()
            .unwrap();
        thread::sleep(Duration::from_millis(100));

        let sealed = recorder.stop();
        let _ = child.wait();
        assert_eq!(sealed.max_thread_count, 0);
        assert_eq!(sealed.peak_subprocesses, 0);
        assert!(sealed.average_cpu_percent.abs() < f64::EPSILON);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn spawned_child_process_is_detected() {
        let options = ProfilerOptions::default()
            .with_sampling_interval(Duration::from_millis(10))
            .with_subprocess_monitoring(true);
        let recorder = SessionRecorder::start(SessionLabel::from("with_child"), &options);

        let mut child = std::process::Command::new("sleep")
            .arg("1")
            .spawn()
            .unwrap();
        thread::sleep(Duration::from_millis(400));

        let sealed = recorder.stop();
        let _ = child.wait();
        assert!(sealed.peak_subprocesses >= 1);
    }
}

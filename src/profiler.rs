use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::warn;

use sfmprof_config::ProfilerOptions;
use sfmprof_report::{
    AggregateSnapshot, Aggregator, ExportError, export_main, export_stage, stage_path_for,
};
use sfmprof_session::{LiveStats, SealedSession, SessionLabel, SessionRecorder};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Process-wide profiler used by the convenience entry points. Embedders
/// that need isolated aggregation construct their own [`Profiler`].
pub static GLOBAL_PROFILER: Lazy<Profiler> = Lazy::new(Profiler::default);

/// One profiling engine: an aggregate store plus the default labels
/// applied to sessions opened through
/// [`begin_session_with_defaults`](Profiler::begin_session_with_defaults).
///
/// Aggregates accumulate for the whole lifetime of the engine and are
/// never deleted; repeated pipeline runs under the same label fold into
/// the same statistics.
pub struct Profiler {
    aggregator: Arc<Aggregator>,
    default_labels: RwLock<Vec<(String, String)>>,
}

impl Default for Profiler {
    fn default() -> Self {
        Self {
            aggregator: Arc::new(Aggregator::new()),
            default_labels: RwLock::new(Vec::new()),
        }
    }
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static Profiler {
        &GLOBAL_PROFILER
    }

    /// Replace the default structured labels used by
    /// [`begin_session_with_defaults`](Self::begin_session_with_defaults).
    /// Pair order is preserved and significant.
    pub fn set_default_labels<I, K, V>(&self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        *self.default_labels.write() = pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
    }

    pub fn default_labels(&self) -> Vec<(String, String)> {
        self.default_labels.read().clone()
    }

    /// Open a session under an explicit label.
    pub fn begin_session(
        &self,
        label: impl Into<SessionLabel>,
        options: ProfilerOptions,
    ) -> SessionHandle {
        SessionHandle {
            recorder: Some(SessionRecorder::start(label.into(), &options)),
            aggregator: Arc::clone(&self.aggregator),
        }
    }

    /// Open a session labeled with the current default labels. Without
    /// installed defaults the session aggregates under a literal
    /// `unlabeled`.
    pub fn begin_session_with_defaults(&self, options: ProfilerOptions) -> SessionHandle {
        let pairs = self.default_labels();
        let label = if pairs.is_empty() {
            warn!("no default labels set, session will aggregate under \"unlabeled\"");
            SessionLabel::literal("unlabeled")
        } else {
            SessionLabel::Structured(pairs)
        };
        self.begin_session(label, options)
    }

    /// Consistent read-only view of everything aggregated so far.
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.aggregator.snapshot()
    }

    /// Plain-text rendering of the current aggregates.
    pub fn format_summary(&self) -> String {
        self.snapshot().to_string()
    }

    /// Export the main and stage tables. Both files are rendered from one
    /// snapshot, so they always describe the same set of sessions.
    pub fn export_csv(&self, main_path: &Path, stage_path: &Path) -> Result<(), ExportError> {
        let snapshot = self.snapshot();
        export_main(&snapshot.labels, main_path)?;
        export_stage(&snapshot.stages, stage_path)?;
        Ok(())
    }

    /// Export with the stage path derived from the main path:
    /// `profiling_results.csv` gains a `profiling_results_stages.csv`
    /// sibling.
    pub fn export_csv_auto(&self, main_path: &Path) -> Result<(), ExportError> {
        self.export_csv(main_path, &stage_path_for(main_path))
    }
}

/// Compact per-session figures returned by [`SessionHandle::finish`].
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub label: String,
    pub duration: Duration,
    /// Number of derived stage intervals, implicit anchors included.
    pub stage_count: usize,
    pub peak_memory_increment_bytes: u64,
    pub average_cpu_percent: f64,
    pub max_thread_count: u32,
    pub peak_subprocesses: u32,
    pub samples: u64,
}

impl SessionSummary {
    fn from_sealed(sealed: &SealedSession) -> Self {
        Self {
            label: sealed.label.canonical(),
            duration: sealed.duration,
            stage_count: sealed.intervals.len(),
            peak_memory_increment_bytes: sealed.peak_memory_increment_bytes,
            average_cpu_percent: sealed.average_cpu_percent,
            max_thread_count: sealed.max_thread_count,
            peak_subprocesses: sealed.peak_subprocesses,
            samples: sealed.samples,
        }
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    pub fn peak_memory_mb(&self) -> f64 {
        self.peak_memory_increment_bytes as f64 / BYTES_PER_MB
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.2} ms over {} stage(s), peak memory +{:.2} MB, average CPU {:.2}%",
            self.label,
            self.duration_ms(),
            self.stage_count,
            self.peak_memory_mb(),
            self.average_cpu_percent
        )
    }
}

/// Exclusive handle to one open session.
///
/// Dropping the handle without calling [`finish`](Self::finish) seals the
/// session implicitly with a warning; its statistics still reach the
/// aggregator and the background sampler is always wound down.
pub struct SessionHandle {
    recorder: Option<SessionRecorder>,
    aggregator: Arc<Aggregator>,
}

impl SessionHandle {
    /// Record a named stage checkpoint.
    pub fn mark_stage(&mut self, name: &str) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.mark_stage(name);
        }
    }

    /// Toggle child-process counting for this session.
    pub fn enable_subprocess_monitoring(&self, enabled: bool) {
        if let Some(recorder) = self.recorder.as_ref() {
            recorder.enable_subprocess_monitoring(enabled);
        }
    }

    /// Figures accumulated so far, without stopping the session.
    pub fn live_stats(&self) -> LiveStats {
        self.recorder
            .as_ref()
            .map(SessionRecorder::live_stats)
            .unwrap_or_default()
    }

    /// Stop the session, fold it into the aggregates, and return its
    /// figures.
    pub fn finish(mut self) -> SessionSummary {
        self.seal_and_record().unwrap_or_default()
    }

    fn seal_and_record(&mut self) -> Option<SessionSummary> {
        let recorder = self.recorder.take()?;
        let sealed = recorder.stop();
        let summary = SessionSummary::from_sealed(&sealed);
        self.aggregator.record(sealed);
        Some(summary)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.recorder.is_some() {
            warn!("profiling session dropped without finish(), sealing it now");
            self.seal_and_record();
        }
    }
}

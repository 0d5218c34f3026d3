//! Session-based performance profiling for SfM reconstruction pipelines.
//!
//! Pipeline stages open labeled sessions, mark named checkpoints inside
//! them, and finish them when the work is done. A background thread
//! samples process memory, CPU, threads, and optionally child processes
//! while a session runs. Finished sessions fold into per-label statistics
//! that accumulate across repeated runs and export to a pair of CSV files
//! for downstream comparison tooling.
//!
//! ```
//! use sfmprof::{Profiler, ProfilerOptions};
//!
//! let profiler = Profiler::new();
//! let mut session = profiler.begin_session(
//!     sfmprof::SessionLabel::structured([("pipeline", "sfm"), ("dataset", "demo")]),
//!     ProfilerOptions::default(),
//! );
//! session.mark_stage("feature_extraction");
//! let summary = session.finish();
//! assert_eq!(summary.stage_count, 2);
//! ```

pub mod logging;
pub mod profiler;

pub use crate::profiler::{GLOBAL_PROFILER, Profiler, SessionHandle, SessionSummary};
pub use sfmprof_config::{DEFAULT_SAMPLING_INTERVAL, MIN_SAMPLING_INTERVAL, ProfilerOptions};
pub use sfmprof_report::{AggregateSnapshot, ExportError, LabelRow, StageRow, stage_path_for};
pub use sfmprof_session::{LiveStats, SealedSession, SessionLabel, StageInterval};

/// The process-wide profiler.
pub fn global() -> &'static Profiler {
    Profiler::global()
}

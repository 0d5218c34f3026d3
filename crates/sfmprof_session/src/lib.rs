//! Profiling session lifecycle.
//!
//! A session is opened under a [`SessionLabel`], accumulates named stage
//! checkpoints while a background thread samples process resources, and is
//! sealed into an immutable [`SealedSession`] on stop. Sealed sessions are
//! the unit the aggregation layer consumes.

pub mod label;
pub mod recorder;
pub mod stage;

pub use crate::label::SessionLabel;
pub use crate::recorder::{LiveStats, SealedSession, SessionRecorder};
pub use crate::stage::{
    Checkpoint, END_MARK, FinalizedStages, START_MARK, StageInterval, StageTracker,
};

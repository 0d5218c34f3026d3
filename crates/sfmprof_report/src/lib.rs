//! Cross-session aggregation and CSV reporting.
//!
//! The [`Aggregator`] folds sealed sessions into per-label statistics and
//! per-label stage tables. [`csv`] renders a consistent snapshot of those
//! tables into the two result files consumed by downstream comparison
//! tooling.

pub mod aggregate;
pub mod csv;
mod summary;

pub use crate::aggregate::{AggregateSnapshot, Aggregator, LabelRow, StageRow};
pub use crate::csv::{ExportError, export_main, export_stage, stage_path_for};

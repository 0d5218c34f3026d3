//! OS-facing resource probing for profiling sessions.
//!
//! [`ResourceProbe`] polls memory, CPU, and thread-count figures for the
//! current process. [`SubprocessMonitor`] walks the OS process table to
//! count child processes spawned while a session is running. Both degrade
//! gracefully when the OS query layer misbehaves; a profiling run must
//! never take the profiled pipeline down with it.

pub mod lister;
pub mod monitor;
pub mod probe;
mod proc_status;
pub mod sample;

pub use crate::lister::{ProcessLister, ProcessRecord, SysinfoLister};
pub use crate::monitor::{ChildReport, SubprocessMonitor};
pub use crate::probe::ResourceProbe;
pub use crate::sample::ResourceSample;

use thiserror::Error;

/// Failures raised by the OS process query layer.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Enumerating the process table failed or produced no entries.
    #[error("process table query failed: {0}")]
    ProcessTable(String),
    /// The current process id could not be resolved.
    #[error("current process id is unavailable: {0}")]
    PidUnavailable(&'static str),
}

/// Resolve the pid of the calling process.
pub fn current_pid() -> Result<u32, ProbeError> {
    sysinfo::get_current_pid()
        .map(|pid| pid.as_u32())
        .map_err(ProbeError::PidUnavailable)
}

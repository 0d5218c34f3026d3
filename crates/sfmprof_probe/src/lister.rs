use sysinfo::{ProcessRefreshKind, System};

use crate::ProbeError;

/// The slice of a process-table entry the subprocess monitor cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub parent: Option<u32>,
    /// Seconds since the Unix epoch at which the process started. OS
    /// granularity is one second.
    pub start_time_secs: u64,
}

/// Capability seam over OS process enumeration.
///
/// Production code uses [`SysinfoLister`]; tests substitute an in-memory
/// fake so descendant counting stays deterministic.
pub trait ProcessLister: Send {
    fn list_processes(&mut self) -> Result<Vec<ProcessRecord>, ProbeError>;
}

/// [`ProcessLister`] backed by the sysinfo process table.
pub struct SysinfoLister {
    system: System,
    refresh: ProcessRefreshKind,
}

impl SysinfoLister {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            // Pid, parent link, and start time come with the bare listing;
            // no per-process CPU or memory refresh is needed here.
            refresh: ProcessRefreshKind::new(),
        }
    }
}

impl Default for SysinfoLister {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLister for SysinfoLister {
    fn list_processes(&mut self) -> Result<Vec<ProcessRecord>, ProbeError> {
        self.system.refresh_processes_specifics(self.refresh);
        let processes = self.system.processes();
        if processes.is_empty() {
            return Err(ProbeError::ProcessTable(
                "enumeration returned no processes".to_owned(),
            ));
        }
        Ok(processes
            .iter()
            .map(|(pid, process)| ProcessRecord {
                pid: pid.as_u32(),
                parent: process.parent().map(|parent| parent.as_u32()),
                start_time_secs: process.start_time(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn lists_the_current_process() {
        let mut lister = SysinfoLister::new();
        let records = lister.list_processes().unwrap();
        let own_pid = std::process::id();
        assert!(records.iter().any(|record| record.pid == own_pid));
    }
}

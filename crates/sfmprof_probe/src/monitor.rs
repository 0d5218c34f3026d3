use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::lister::{ProcessLister, ProcessRecord};
use crate::{ProbeError, current_pid};

/// Child-process totals reported by one monitor scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildReport {
    /// Descendants alive at scan time.
    pub count_now: u32,
    /// Highest simultaneous descendant count seen by any scan so far.
    pub peak_so_far: u32,
}

/// Counts child processes spawned by the profiled process during a session.
///
/// A scan walks parent links in the OS process table and counts transitive
/// descendants of the origin process, restricted to processes that started
/// at or after the session's wall-clock start. The start-time filter keeps
/// pre-existing long-lived children (daemons forked before profiling began)
/// out of the figures. OS start times have one second granularity and are
/// derived from boot time plus the process tick count, which can land a
/// full second under a wall-clock reading taken at the same instant, so
/// the threshold carries one second of slack below the session start.
pub struct SubprocessMonitor {
    origin_pid: u32,
    earliest_start_secs: u64,
    peak: u32,
    warned: bool,
}

impl SubprocessMonitor {
    pub fn new(origin_pid: u32, session_start_secs: u64) -> Self {
        Self {
            origin_pid,
            earliest_start_secs: session_start_secs.saturating_sub(1),
            peak: 0,
            warned: false,
        }
    }

    /// Monitor descendants of the calling process.
    pub fn for_current_process(session_start_secs: u64) -> Result<Self, ProbeError> {
        Ok(Self::new(current_pid()?, session_start_secs))
    }

    /// Run one scan. A failed enumeration degrades to an all-zero report
    /// with a warning on the first occurrence; the internal peak is kept,
    /// so later successful scans still report the true running peak.
    pub fn scan(&mut self, lister: &mut dyn ProcessLister) -> ChildReport {
        match lister.list_processes() {
            Ok(records) => {
                let count_now =
                    count_descendants(&records, self.origin_pid, self.earliest_start_secs);
                self.peak = self.peak.max(count_now);
                ChildReport {
                    count_now,
                    peak_so_far: self.peak,
                }
            }
            Err(err) => {
                if !self.warned {
                    warn!("subprocess scan failed, reporting zero children: {err}");
                    self.warned = true;
                }
                ChildReport::default()
            }
        }
    }

    pub fn peak(&self) -> u32 {
        self.peak
    }
}

/// Count transitive descendants of `origin_pid` started at or after
/// `earliest_start_secs`. Descent does not stop at filtered-out processes:
/// a pre-existing child can spawn new grandchildren that still belong to
/// the session.
fn count_descendants(
    records: &[ProcessRecord],
    origin_pid: u32,
    earliest_start_secs: u64,
) -> u32 {
    let mut children_of: HashMap<u32, Vec<&ProcessRecord>> = HashMap::new();
    for record in records {
        if let Some(parent) = record.parent {
            children_of.entry(parent).or_default().push(record);
        }
    }

    let mut count = 0_u32;
    let mut visited = HashSet::new();
    let mut frontier = vec![origin_pid];
    while let Some(pid) = frontier.pop() {
        if !visited.insert(pid) {
            continue;
        }
        let Some(children) = children_of.get(&pid) else {
            continue;
        };
        for child in children {
            if child.start_time_secs >= earliest_start_secs {
                count += 1;
            }
            frontier.push(child.pid);
        }
    }
    count
}

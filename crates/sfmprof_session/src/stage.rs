use std::time::{Duration, Instant};

use tracing::warn;

/// Name of the implicit checkpoint opening every session.
pub const START_MARK: &str = "START";

/// Name of the implicit checkpoint appended when a session is sealed.
pub const END_MARK: &str = "END";

/// A named instant inside a session.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub name: String,
    pub at: Instant,
}

/// Elapsed time between two adjacent checkpoints, named `{from}_to_{to}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInterval {
    pub name: String,
    pub duration: Duration,
}

/// Result of sealing a tracker: the derived intervals plus the exact
/// START-to-END span. The durations telescope, so they sum to `total`.
#[derive(Debug, Clone)]
pub struct FinalizedStages {
    pub intervals: Vec<StageInterval>,
    pub total: Duration,
}

/// Ordered checkpoint list for one running session.
///
/// Checkpoint names must be unique within the session; a repeated name is
/// recorded under a `_2`, `_3`, ... suffix with a warning instead of being
/// dropped. `END` is reserved for the implicit final checkpoint, so an
/// explicit `END` mark is suffixed the same way.
#[derive(Debug)]
pub struct StageTracker {
    checkpoints: Vec<Checkpoint>,
}

impl StageTracker {
    /// Open a tracker whose implicit `START` checkpoint sits at `start`.
    pub fn begin(start: Instant) -> Self {
        Self {
            checkpoints: vec![Checkpoint {
                name: START_MARK.to_owned(),
                at: start,
            }],
        }
    }

    /// Record a checkpoint at the current instant.
    pub fn mark(&mut self, name: &str) {
        self.mark_at(name, Instant::now());
    }

    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    /// Append the implicit `END` checkpoint and derive the intervals.
    pub fn finalize(mut self) -> FinalizedStages {
        // Cannot collide: explicit END marks were suffixed away on entry.
        self.push(END_MARK.to_owned(), Instant::now());
        let total = match (self.checkpoints.first(), self.checkpoints.last()) {
            (Some(first), Some(last)) => last.at.saturating_duration_since(first.at),
            _ => Duration::ZERO,
        };
        FinalizedStages {
            intervals: derive_intervals(&self.checkpoints),
            total,
        }
    }

    fn mark_at(&mut self, name: &str, at: Instant) {
        let name = self.unique_name(name);
        self.push(name, at);
    }

    /// Timestamps never regress: a reading earlier than its predecessor is
    /// pinned to the predecessor and yields a zero-length interval, which
    /// keeps the interval sum equal to the session span.
    fn push(&mut self, name: String, at: Instant) {
        let at = match self.checkpoints.last() {
            Some(previous) if at < previous.at => {
                warn!(
                    checkpoint = %name,
                    "clock regressed, pinning checkpoint to its predecessor"
                );
                previous.at
            }
            _ => at,
        };
        self.checkpoints.push(Checkpoint { name, at });
    }

    fn unique_name(&self, requested: &str) -> String {
        let taken = |candidate: &str| candidate == END_MARK || self.contains(candidate);
        if !taken(requested) {
            return requested.to_owned();
        }
        let mut suffix = 2_u32;
        loop {
            let candidate = format!("{requested}_{suffix}");
            if !taken(&candidate) {
                warn!(
                    "checkpoint name {requested:?} already taken, recording as {candidate:?}"
                );
                return candidate;
            }
            suffix += 1;
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.checkpoints
            .iter()
            .any(|checkpoint| checkpoint.name == name)
    }
}

fn derive_intervals(checkpoints: &[Checkpoint]) -> Vec<StageInterval> {
    checkpoints
        .windows(2)
        .map(|pair| StageInterval {
            name: format!("{}_to_{}", pair[0].name, pair[1].name),
            duration: pair[1].at.saturating_duration_since(pair[0].at),
        })
        .collect()
}

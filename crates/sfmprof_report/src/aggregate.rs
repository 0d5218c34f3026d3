use std::collections::HashSet;
use std::thread::ThreadId;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sfmprof_session::SealedSession;

/// Shard count for the per-label tables. Labels hash onto shards, so
/// sessions under unrelated labels never contend on a lock.
const SHARD_COUNT: usize = 16;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Cross-session statistics for one label.
#[derive(Debug, Clone)]
struct LabelStats {
    session_count: u64,
    /// Threads that opened sessions under this label.
    thread_ids: HashSet<ThreadId>,
    total_duration: Duration,
    min_duration: Duration,
    max_duration: Duration,
    /// Max of the per-session peak memory increments.
    peak_memory_increment_bytes: u64,
    /// Sum of `session_average_cpu * session_duration_ms`, divided by the
    /// total duration at export time.
    cpu_weighted_ms: f64,
    process_peak_threads: u32,
    total_subprocesses: u64,
    peak_subprocesses: u32,
}

impl LabelStats {
    fn new() -> Self {
        Self {
            session_count: 0,
            thread_ids: HashSet::new(),
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            peak_memory_increment_bytes: 0,
            cpu_weighted_ms: 0.0,
            process_peak_threads: 0,
            total_subprocesses: 0,
            peak_subprocesses: 0,
        }
    }

    fn record(&mut self, session: &SealedSession) {
        self.session_count += 1;
        self.thread_ids.insert(session.owning_thread);
        self.total_duration += session.duration;
        if session.duration < self.min_duration {
            self.min_duration = session.duration;
        }
        if session.duration > self.max_duration {
            self.max_duration = session.duration;
        }
        self.peak_memory_increment_bytes = self
            .peak_memory_increment_bytes
            .max(session.peak_memory_increment_bytes);
        self.cpu_weighted_ms += session.average_cpu_percent * session.duration_ms();
        self.process_peak_threads = self.process_peak_threads.max(session.max_thread_count);
        self.total_subprocesses += u64::from(session.peak_subprocesses);
        self.peak_subprocesses = self.peak_subprocesses.max(session.peak_subprocesses);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StageStats {
    total_duration: Duration,
    count: u64,
}

struct LabelEntry {
    /// Key/value decomposition captured from the first session recorded
    /// under this label, `None` for opaque labels.
    pairs: Option<Vec<(String, String)>>,
    stats: LabelStats,
    stages: AHashMap<String, StageStats>,
}

impl LabelEntry {
    fn new(pairs: Option<Vec<(String, String)>>) -> Self {
        Self {
            pairs,
            stats: LabelStats::new(),
            stages: AHashMap::new(),
        }
    }

    fn record(&mut self, session: &SealedSession) {
        self.stats.record(session);
        for interval in &session.intervals {
            let stage = self.stages.entry(interval.name.clone()).or_default();
            stage.total_duration += interval.duration;
            stage.count += 1;
        }
    }
}

/// One main-table row of a snapshot. Numbers are raw; the CSV layer owns
/// the two-decimal rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRow {
    pub label: String,
    pub pairs: Option<Vec<(String, String)>>,
    pub session_count: u64,
    pub profiling_threads: u64,
    pub total_ms: f64,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub peak_memory_mb: f64,
    pub average_cpu_percent: f64,
    pub process_peak_threads: u32,
    pub total_subprocesses: u64,
    pub peak_subprocesses: u32,
}

/// One stage-table row of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRow {
    pub label: String,
    pub interval: String,
    pub total_ms: f64,
    pub average_ms: f64,
    pub count: u64,
}

/// Consistent read-only view of the aggregate tables, sorted by label and
/// interval name so exports are deterministic.
#[derive(Debug, Clone, Default)]
pub struct AggregateSnapshot {
    pub labels: Vec<LabelRow>,
    pub stages: Vec<StageRow>,
}

/// Per-label statistics across all sessions of the process lifetime.
///
/// Entries are created lazily on the first session under a label and never
/// deleted. The canonical label string is the sole key; identical pairs in
/// a different order produce a different key and stay separate.
pub struct Aggregator {
    shards: [RwLock<AHashMap<String, LabelEntry>>; SHARD_COUNT],
    hasher: ahash::RandomState,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| RwLock::new(AHashMap::new())),
            hasher: ahash::RandomState::new(),
        }
    }

    /// Fold one sealed session into the tables. Updates for a given label
    /// are serialized by its shard lock; sessions under labels on other
    /// shards proceed in parallel.
    pub fn record(&self, session: SealedSession) {
        let key = session.label.canonical();
        let pairs = session.label.pairs().map(|pairs| pairs.to_vec());
        let shard = &self.shards[self.shard_index(&key)];
        let mut table = shard.write();
        table
            .entry(key)
            .or_insert_with(|| LabelEntry::new(pairs))
            .record(&session);
    }

    /// Number of distinct labels recorded so far.
    pub fn label_count(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Build a consistent view for export. Each shard is locked briefly in
    /// turn, so concurrent `record` calls are not held up for the whole
    /// snapshot.
    pub fn snapshot(&self) -> AggregateSnapshot {
        let mut labels = Vec::new();
        let mut stages = Vec::new();

        for shard in &self.shards {
            let table = shard.read();
            for (label, entry) in table.iter() {
                labels.push(label_row(label, entry));
                for (interval, stage) in &entry.stages {
                    stages.push(StageRow {
                        label: label.clone(),
                        interval: interval.clone(),
                        total_ms: ms(stage.total_duration),
                        average_ms: if stage.count == 0 {
                            0.0
                        } else {
                            ms(stage.total_duration) / stage.count as f64
                        },
                        count: stage.count,
                    });
                }
            }
        }

        labels.sort_by(|a, b| a.label.cmp(&b.label));
        stages.sort_by(|a, b| (&a.label, &a.interval).cmp(&(&b.label, &b.interval)));
        AggregateSnapshot { labels, stages }
    }

    fn shard_index(&self, key: &str) -> usize {
        self.hasher.hash_one(key) as usize % SHARD_COUNT
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn label_row(label: &str, entry: &LabelEntry) -> LabelRow {
    let stats = &entry.stats;
    let total_ms = ms(stats.total_duration);
    LabelRow {
        label: label.to_owned(),
        pairs: entry.pairs.clone(),
        session_count: stats.session_count,
        profiling_threads: stats.thread_ids.len() as u64,
        total_ms,
        average_ms: if stats.session_count == 0 {
            0.0
        } else {
            total_ms / stats.session_count as f64
        },
        min_ms: if stats.session_count == 0 {
            0.0
        } else {
            ms(stats.min_duration)
        },
        max_ms: ms(stats.max_duration),
        peak_memory_mb: stats.peak_memory_increment_bytes as f64 / BYTES_PER_MB,
        average_cpu_percent: if total_ms > 0.0 {
            stats.cpu_weighted_ms / total_ms
        } else {
            0.0
        },
        process_peak_threads: stats.process_peak_threads,
        total_subprocesses: stats.total_subprocesses,
        peak_subprocesses: stats.peak_subprocesses,
    }
}

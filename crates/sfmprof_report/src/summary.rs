use std::fmt;

use crate::aggregate::AggregateSnapshot;

impl fmt::Display for AggregateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Profiling summary: {} label(s)", self.labels.len())?;
        for row in &self.labels {
            writeln!(f, "Label: {}", row.label)?;
            writeln!(f, "  Sessions:       {}", row.session_count)?;
            writeln!(f, "  Threads:        {}", row.profiling_threads)?;
            writeln!(f, "  Total:          {:.2} ms", row.total_ms)?;
            writeln!(f, "  Average:        {:.2} ms", row.average_ms)?;
            writeln!(f, "  Min:            {:.2} ms", row.min_ms)?;
            writeln!(f, "  Max:            {:.2} ms", row.max_ms)?;
            writeln!(f, "  Peak memory:    {:.2} MB", row.peak_memory_mb)?;
            writeln!(f, "  Average CPU:    {:.2} %", row.average_cpu_percent)?;
            writeln!(f, "  Peak threads:   {}", row.process_peak_threads)?;
            writeln!(
                f,
                "  Subprocesses:   {} total, {} peak",
                row.total_subprocesses, row.peak_subprocesses
            )?;
            for stage in self.stages.iter().filter(|stage| stage.label == row.label) {
                writeln!(
                    f,
                    "    {}: {:.2} ms over {} run(s)",
                    stage.interval, stage.total_ms, stage.count
                )?;
            }
        }
        Ok(())
    }
}

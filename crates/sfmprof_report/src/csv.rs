use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::aggregate::{LabelRow, StageRow};

/// Metric columns of the main results file, after the label column(s).
pub const MAIN_METRIC_HEADERS: [&str; 11] = [
    "Session Count",
    "Profiling Threads",
    "Total Time(ms)",
    "Average Time(ms)",
    "Min Time(ms)",
    "Max Time(ms)",
    "Peak Memory(MB)",
    "Average CPU(%)",
    "Process Peak Threads",
    "Total Subprocesses",
    "Peak Subprocesses",
];

/// Columns of the stage results file.
pub const STAGE_HEADERS: [&str; 5] = [
    "Label",
    "Interval Name",
    "Total Duration(ms)",
    "Average Duration(ms)",
    "Count",
];

const OPAQUE_LABEL_HEADER: &str = "Label";

/// Export failures. The atomic write discipline guarantees that a failed
/// export never leaves a truncated file at the target path, so callers can
/// simply retry.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to create temporary file in {}: {source}", dir.display())]
    TempFile { dir: PathBuf, source: io::Error },
    #[error("failed to write profiling CSV {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to move profiling CSV into place at {}: {source}", path.display())]
    Persist { path: PathBuf, source: io::Error },
}

/// Derive the stage-file path from the main-file path:
/// `profiling_results.csv` becomes `profiling_results_stages.csv`.
pub fn stage_path_for(main_path: &Path) -> PathBuf {
    let stem = main_path.file_stem().and_then(|stem| stem.to_str());
    let extension = main_path.extension().and_then(|ext| ext.to_str());
    match (stem, extension) {
        (Some(stem), Some(extension)) => {
            main_path.with_file_name(format!("{stem}_stages.{extension}"))
        }
        (Some(stem), None) => main_path.with_file_name(format!("{stem}_stages")),
        _ => {
            let mut fallback = main_path.as_os_str().to_owned();
            fallback.push("_stages");
            PathBuf::from(fallback)
        }
    }
}

/// Write the main results table atomically to `path`.
pub fn export_main(rows: &[LabelRow], path: &Path) -> Result<(), ExportError> {
    write_atomic(path, &render_main(rows))?;
    debug!(path = %path.display(), rows = rows.len(), "wrote main profiling CSV");
    Ok(())
}

/// Write the stage results table atomically to `path`.
pub fn export_stage(rows: &[StageRow], path: &Path) -> Result<(), ExportError> {
    write_atomic(path, &render_stage(rows))?;
    debug!(path = %path.display(), rows = rows.len(), "wrote stage profiling CSV");
    Ok(())
}

/// Render the main table. When every label is structured, the label column
/// expands into one column per key (union of all keys, first-appearance
/// order); a single opaque label anywhere collapses the layout back to one
/// `Label` column holding canonical strings.
pub fn render_main(rows: &[LabelRow]) -> String {
    let key_columns = label_columns(rows);

    let mut header: Vec<String> = match &key_columns {
        Some(keys) => keys.iter().map(|key| escape_csv(key)).collect(),
        None => vec![OPAQUE_LABEL_HEADER.to_owned()],
    };
    header.extend(MAIN_METRIC_HEADERS.iter().map(|cell| (*cell).to_owned()));

    let mut out = String::new();
    out.push_str(&header.join(","));
    out.push('\n');

    for row in rows {
        let mut cells: Vec<String> = match &key_columns {
            Some(keys) => keys
                .iter()
                .map(|key| escape_csv(value_for(row, key)))
                .collect(),
            None => vec![escape_csv(&row.label)],
        };
        cells.push(row.session_count.to_string());
        cells.push(row.profiling_threads.to_string());
        cells.push(format!("{:.2}", row.total_ms));
        cells.push(format!("{:.2}", row.average_ms));
        cells.push(format!("{:.2}", row.min_ms));
        cells.push(format!("{:.2}", row.max_ms));
        cells.push(format!("{:.2}", row.peak_memory_mb));
        cells.push(format!("{:.2}", row.average_cpu_percent));
        cells.push(row.process_peak_threads.to_string());
        cells.push(row.total_subprocesses.to_string());
        cells.push(row.peak_subprocesses.to_string());
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

/// Render the stage table.
pub fn render_stage(rows: &[StageRow]) -> String {
    let mut out = String::new();
    out.push_str(&STAGE_HEADERS.join(","));
    out.push('\n');

    for row in rows {
        let cells = [
            escape_csv(&row.label),
            escape_csv(&row.interval),
            format!("{:.2}", row.total_ms),
            format!("{:.2}", row.average_ms),
            row.count.to_string(),
        ];
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

/// Dynamic key columns, or `None` when any label is opaque.
fn label_columns(rows: &[LabelRow]) -> Option<Vec<String>> {
    let mut keys: Vec<String> = Vec::new();
    for row in rows {
        let pairs = row.pairs.as_ref()?;
        for (key, _) in pairs {
            if !keys.iter().any(|existing| existing == key) {
                keys.push(key.clone());
            }
        }
    }
    if keys.is_empty() { None } else { Some(keys) }
}

fn value_for<'row>(row: &'row LabelRow, key: &str) -> &'row str {
    row.pairs
        .as_ref()
        .and_then(|pairs| pairs.iter().find(|(candidate, _)| candidate == key))
        .map_or("", |(_, value)| value.as_str())
}

/// Minimal CSV escaping: wrap in quotes if the value contains a comma,
/// quote, or newline, doubling embedded quotes.
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

/// Write through a temporary file in the destination directory, then
/// rename over the target, so a crash mid-export never leaves a truncated
/// file visible.
fn write_atomic(path: &Path, content: &str) -> Result<(), ExportError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = NamedTempFile::new_in(&dir).map_err(|source| ExportError::TempFile {
        dir: dir.clone(),
        source,
    })?;
    tmp.write_all(content.as_bytes())
        .map_err(|source| ExportError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    tmp.persist(path).map_err(|err| ExportError::Persist {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured_row(pairs: &[(&str, &str)], total_ms: f64) -> LabelRow {
        let label = pairs
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("_");
        LabelRow {
            label,
            pairs: Some(
                pairs
                    .iter()
                    .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                    .collect(),
            ),
            session_count: 5,
            profiling_threads: 1,
            total_ms,
            average_ms: total_ms / 5.0,
            min_ms: 2234.12,
            max_ms: 2847.32,
            peak_memory_mb: 150.5,
            average_cpu_percent: 87.5,
            process_peak_threads: 8,
            total_subprocesses: 6,
            peak_subprocesses: 3,
        }
    }

    fn opaque_row(label: &str) -> LabelRow {
        LabelRow {
            label: label.to_owned(),
            pairs: None,
            ..structured_row(&[("x", "ignored")], 100.0)
        }
    }

    #[test]
    fn structured_labels_expand_into_key_columns() {
        let rows = vec![structured_row(
            &[
                ("algorithm", "basic_sfm"),
                ("dataset", "dataset_A"),
                ("experiment", "comparison_2025"),
            ],
            12847.32,
        )];
        let rendered = render_main(&rows);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines[0],
            "algorithm,dataset,experiment,Session Count,Profiling Threads,\
             Total Time(ms),Average Time(ms),Min Time(ms),Max Time(ms),\
             Peak Memory(MB),Average CPU(%),Process Peak Threads,\
             Total Subprocesses,Peak Subprocesses"
        );
        assert!(lines[1].starts_with("basic_sfm,dataset_A,comparison_2025,5,1,12847.32,2569.46,"));
    }

    #[test]
    fn any_opaque_label_collapses_to_a_single_label_column() {
        let rows = vec![
            structured_row(&[("dataset", "a")], 100.0),
            opaque_row("warmup"),
        ];
        let rendered = render_main(&rows);
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].starts_with("Label,Session Count,"));
        assert!(lines[1].starts_with("dataset=a,"));
    }

    #[test]
    fn key_union_preserves_first_appearance_order_and_blanks_missing_values() {
        let rows = vec![
            structured_row(&[("dataset", "a"), ("run", "1")], 100.0),
            structured_row(&[("dataset", "b"), ("solver", "ceres")], 100.0),
        ];
        let rendered = render_main(&rows);
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].starts_with("dataset,run,solver,"));
        assert!(lines[1].starts_with("a,1,,"));
        assert!(lines[2].starts_with("b,,ceres,"));
    }

    #[test]
    fn two_decimal_cells_parse_back_bit_for_bit() {
        let rows = vec![structured_row(
            &[("algorithm", "basic_sfm")],
            12847.32,
        )];
        let rendered = render_main(&rows);
        let data_line = rendered.lines().nth(1).unwrap();
        for cell in data_line.split(',').skip(1) {
            let value: f64 = cell.parse().unwrap();
            if cell.contains('.') {
                assert_eq!(format!("{value:.2}"), cell);
            }
        }
    }

    #[test]
    fn stage_rows_render_the_documented_layout() {
        let rows = vec![StageRow {
            label: "algorithm=basic_sfm".to_owned(),
            interval: "feature_extraction_to_feature_matching".to_owned(),
            total_ms: 812.5,
            average_ms: 406.25,
            count: 2,
        }];
        let rendered = render_stage(&rows);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines[0],
            "Label,Interval Name,Total Duration(ms),Average Duration(ms),Count"
        );
        assert_eq!(
            lines[1],
            "algorithm=basic_sfm,feature_extraction_to_feature_matching,812.50,406.25,2"
        );
    }

    #[test]
    fn values_with_commas_are_quoted() {
        let mut row = opaque_row("ignored");
        row.label = "a,b".to_owned();
        let rendered = render_main(&[row]);
        assert!(rendered.lines().nth(1).unwrap().starts_with("\"a,b\","));
    }

    #[test]
    fn stage_path_is_derived_from_the_main_path() {
        assert_eq!(
            stage_path_for(Path::new("profiling_results.csv")),
            PathBuf::from("profiling_results_stages.csv")
        );
        assert_eq!(
            stage_path_for(Path::new("/tmp/run/perf.csv")),
            PathBuf::from("/tmp/run/perf_stages.csv")
        );
        assert_eq!(
            stage_path_for(Path::new("results")),
            PathBuf::from("results_stages")
        );
    }

    #[test]
    fn export_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiling_results.csv");
        let rows = vec![structured_row(&[("dataset", "a")], 100.0)];
        export_main(&rows, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn export_replaces_an_existing_file_completely() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiling_results.csv");
        std::fs::write(&path, "stale content that is much longer than the export\n").unwrap();

        export_main(&[], &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("Label,"));
    }

    #[test]
    fn export_into_a_missing_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("profiling_results.csv");
        let err = export_main(&[], &path).unwrap_err();
        assert!(matches!(err, ExportError::TempFile { .. }));
        assert!(!path.exists());
    }
}

//! CSV storage for scan results.
//!
//! A run produces two files next to each other: `<base>_stages.csv` with the
//! per-stage statistics and `<base>_samples.csv` with every raw reading and
//! its procedure phase.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::AppResult;
use crate::measurement::ScanOutcome;

/// Default output base name, timestamped per run.
pub fn default_base() -> PathBuf {
    PathBuf::from(format!("ivscan_{}", Utc::now().format("%Y%m%dT%H%M%S")))
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ivscan".to_string());
    base.with_file_name(format!("{stem}_{suffix}.csv"))
}

/// Write a scan outcome, returning the `(stages, samples)` file paths.
pub fn write_outcome(outcome: &ScanOutcome, base: &Path) -> AppResult<(PathBuf, PathBuf)> {
    let stages_path = with_suffix(base, "stages");
    let samples_path = with_suffix(base, "samples");

    let mut stages = csv::Writer::from_path(&stages_path)?;
    for record in &outcome.stages {
        stages.serialize(record)?;
    }
    stages.flush()?;

    let mut samples = csv::Writer::from_path(&samples_path)?;
    for sample in &outcome.samples {
        samples.serialize(sample)?;
    }
    samples.flush()?;

    Ok((stages_path, samples_path))
}

//! Per-cycle correction quality and the run summary CSV.
//!
//! Every correction cycle is reduced to RMS and worst-case residual. Rows are
//! appended to `data/apqr_summary.csv` so repeated runs (different strategies,
//! gains, periods) line up in one file.

use std::{
    fs::{OpenOptions, create_dir_all},
    path::Path,
};

use average::{Estimate, Max, Mean};
use csv::WriterBuilder;
use log::info;
use serde::Serialize;

pub const SUMMARY_CSV: &str = "data/apqr_summary.csv";

/// Residual statistics of one correction cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub strategy: &'static str,
    pub period_ms: f64,
    pub cycle: u32,
    pub start_tick: u64,
    pub ticks: u64,
    pub rms_residual: f64,
    pub max_abs_residual: f64,
}

/// Folds the residuals of the open correction cycle.
#[derive(Debug, Clone)]
pub struct CycleAccumulator {
    cycle: u32,
    start_tick: u64,
    squares: Mean,
    max_abs: Max,
}

impl CycleAccumulator {
    pub fn new(cycle: u32, start_tick: u64) -> Self {
        Self { cycle, start_tick, squares: Mean::new(), max_abs: Max::new() }
    }

    #[inline]
    pub fn add(&mut self, residual: f64) {
        self.squares.add(residual * residual);
        self.max_abs.add(residual.abs());
    }

    /// `None` for a cycle that never produced a residual.
    pub fn finish(self, strategy: &'static str, period_ms: f64) -> Option<CycleSummary> {
        if self.squares.is_empty() {
            return None;
        }
        Some(CycleSummary {
            strategy,
            period_ms,
            cycle: self.cycle,
            start_tick: self.start_tick,
            ticks: self.squares.len(),
            rms_residual: self.squares.mean().sqrt(),
            max_abs_residual: self.max_abs.max(),
        })
    }
}

/// Appends `rows` to the CSV at `path`, writing the header only for a new file.
///
/// # Arguments
/// * `path`: Target file; missing parent directories are created.
/// * `rows`: Cycle summaries in the order they happened.
pub fn export_summary_csv(path: impl AsRef<Path>, rows: &[CycleSummary]) -> Result<(), csv::Error> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    let file_exists = path.exists();

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut wtr = WriterBuilder::new().has_headers(!file_exists).from_writer(file);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;

    info!("Summary exported to: {} ({} cycles)", path.display(), rows.len());
    Ok(())
}

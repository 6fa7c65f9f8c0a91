//! error.rs
//! Configuration and reference-loading failures.
//!
//! Everything here is raised before the tick loop starts. The tick itself is
//! total once a `Controller` exists.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("period must be a positive number of milliseconds, got {0}")]
    Period(f64),
    #[error("period {period} ms needs {needed} history slots, at most {max} are allowed")]
    HistoryTooLong { period: f64, needed: usize, max: usize },
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("{name} must be a finite number")]
    NonFinite { name: &'static str },
    #[error("lognum must be at least 1")]
    ZeroLognum,
    #[error("cycle cutoff fraction must lie in (0, 1], got {0}")]
    CycleCutoff(f64),
    #[error("derivative window must hold between 2 and {max} samples, got {got}")]
    DerivativeWindow { got: usize, max: usize },
    #[error("reference: {0}")]
    Reference(#[from] ReferenceError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parameter file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: '{token}' is not a number")]
    Parse { line: usize, token: String },
}

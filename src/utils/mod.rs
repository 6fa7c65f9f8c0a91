//! Metrics collection and CSV reporting.

pub mod export;
pub mod metrics;

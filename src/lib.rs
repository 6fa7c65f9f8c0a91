//! # APqr
//! Closed-loop action-potential correction.
//!
//! The controller learns a reference cycle from a cell's own membrane
//! potential, then drives one or two actuation channels (current injection or
//! blue/red light) so that later cycles follow that reference.
//!
//! - [`control`] is the per-tick core, free of I/O and threads.
//! - [`rig`] drives it at a fixed period against a synthetic cell.
//! - [`utils`] collects live metrics and writes CSV reports.

pub mod control;
pub mod rig;
pub mod utils;

//! Host side of the loop: a synthetic cell and the periodic tick runner.

pub mod cell;
pub mod runner;

pub use cell::{CellModel, CellParams};
pub use runner::{RigCommand, RigConfig, RigReport, run_rig, spawn_rig};

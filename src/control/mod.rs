//! Closed-loop control core.
//!
//! Sample History → Edge Detector → Reference Learner → Error Log →
//! Correction Strategy → Output Mapper, orchestrated by [`Controller`].

pub mod config;
pub mod controller;
pub mod edge;
pub mod error;
pub mod history;
pub mod learner;
pub mod output;
pub mod reference;
pub mod strategy;

pub use config::{ControlParams, StrategyParams};
pub use controller::{Controller, ControllerState, Telemetry};
pub use error::{ConfigError, ReferenceError};
pub use output::Actuation;

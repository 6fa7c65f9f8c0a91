//! Correction strategies.
//!
//! Each strategy turns the residual of the current tick (plus whatever history
//! it keeps) into one actuation [`Command`]. Residual bookkeeping, clamping and
//! the end-of-cycle guard are shared and live in the controller and the output
//! mapper, so a strategy only decides *which* channel and *how hard*.

pub mod adaptive;
pub mod fixed_gain;
pub mod pid;

use serde::Serialize;

use crate::control::{
    config::{AdaptationParams, ControlParams, StrategyParams},
    history::RingBuffer,
};

pub use adaptive::AdaptiveResistance;
pub use fixed_gain::FixedGain;
pub use pid::{Pid, least_squares_slope};

/// Actuation channel. Dual-channel variants use `Primary` for the
/// depolarizing (blue) light and `Secondary` for the repolarizing (red) one;
/// single-channel variants only ever drive `Primary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Channel {
    Primary,
    Secondary,
}

/// What the output stage should do this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Keep both channels at their previous levels.
    Hold,
    /// Both channels off.
    Off,
    /// Drive one channel (unclamped level); every other channel goes to 0.
    Drive { channel: Channel, level: f64 },
    /// Signed current command on the primary output, passed through as is,
    /// with `echo` written to the secondary output.
    Inject { level: f64, echo: f64 },
}

/// Inputs of one correction tick.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionInput<'a> {
    /// Ticks since the correction cycle started (`k`).
    pub offset: usize,
    pub sample: f64,
    /// Error Log of this cycle; `residuals.get(0)` is `e[k]`.
    pub residuals: &'a RingBuffer,
    pub period_ms: f64,
    /// The most recently driven level already sits at the ceiling.
    pub saturated: bool,
}

impl CorrectionInput<'_> {
    #[inline]
    pub fn residual(&self) -> f64 {
        self.residuals.get(0).unwrap_or(0.0)
    }

    /// `e[k-1]`; zero on the first tick of a cycle.
    #[inline]
    pub fn previous_residual(&self) -> f64 {
        self.residuals.get(1).unwrap_or(0.0)
    }
}

/// Latest PID decomposition, for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PidTerms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub pid: f64,
}

/// Current resistance (inverse gain) per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Resistances {
    pub primary: f64,
    pub secondary: Option<f64>,
}

pub trait CorrectionStrategy: Send {
    fn name(&self) -> &'static str;

    /// Called on the tick a correction cycle opens, before the first `step`.
    fn begin_cycle(&mut self) {}

    /// One correction tick at offset `input.offset`.
    fn step(&mut self, input: &CorrectionInput<'_>) -> Command;

    /// Runs on every tick, correcting or not. `rest_level` is the reference
    /// potential at the end of the correction window, once one exists.
    fn observe_rest(&mut self, _tick: u64, _sample: f64, _rest_level: Option<f64>) {}

    fn resistances(&self) -> Resistances;

    fn terms(&self) -> Option<PidTerms> {
        None
    }
}

/// Builds the strategy selected in `params`. Parameters must already be validated.
pub fn build_strategy(params: &ControlParams) -> Box<dyn CorrectionStrategy> {
    match &params.strategy {
        StrategyParams::FixedGain(p) => Box::new(FixedGain::new(p.clone())),
        StrategyParams::AdaptiveResistance(p) => Box::new(AdaptiveResistance::new(
            p.clone(),
            params.correction_start,
            params.reversal_potential,
        )),
        StrategyParams::Pid(p) => Box::new(Pid::new(
            p.clone(),
            params.correction_start,
            params.reversal_potential,
        )),
    }
}

/// `k >= correction_start - 1` without the unsigned underflow.
#[inline]
pub(crate) fn past_correction_start(offset: usize, correction_start: u32) -> bool {
    offset + 1 >= correction_start as usize
}

/// Overshoot / growing-error rule shared by the resistance-tuning variants.
///
/// Opposite signs of `previous` and `current` mean the last correction
/// overshot: the resistance grows by `up`. Same sign with a growing magnitude
/// means it was too weak: the resistance shrinks by `down`, unless a `floor`
/// is given and the resistance has already dropped below `floor * down`.
pub(crate) fn adapt_resistance(
    resistance: &mut f64,
    previous: f64,
    current: f64,
    tuning: &AdaptationParams,
    floor: Option<f64>,
) {
    let product = previous * current;
    if product < 0.0 {
        *resistance *= tuning.up;
    } else if product > 0.0
        && previous.abs() < current.abs()
        && floor.is_none_or(|f| *resistance >= f * tuning.down)
    {
        *resistance /= tuning.down;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_start_boundary() {
        assert!(past_correction_start(0, 0));
        assert!(past_correction_start(0, 1));
        assert!(!past_correction_start(0, 2));
        assert!(past_correction_start(1, 2));
    }

    #[test]
    fn adapt_rules() {
        let tuning = AdaptationParams { up: 8.0, down: 2.0, noise_threshold: 0.5 };

        let mut r = 100.0;
        adapt_resistance(&mut r, -1.0, 2.0, &tuning, None);
        assert_eq!(r, 800.0);

        let mut r = 100.0;
        adapt_resistance(&mut r, 1.0, 2.0, &tuning, None);
        assert_eq!(r, 50.0);

        // Shrinking error leaves it alone.
        let mut r = 100.0;
        adapt_resistance(&mut r, 3.0, 2.0, &tuning, None);
        assert_eq!(r, 100.0);

        // No previous residual: no information.
        let mut r = 100.0;
        adapt_resistance(&mut r, 0.0, 2.0, &tuning, None);
        assert_eq!(r, 100.0);
    }

    #[test]
    fn floor_stops_the_descent() {
        let tuning = AdaptationParams { up: 8.0, down: 2.0, noise_threshold: 0.5 };
        let mut r = 0.03;
        adapt_resistance(&mut r, 1.0, 2.0, &tuning, Some(0.01));
        assert_eq!(r, 0.015);
        adapt_resistance(&mut r, 1.0, 2.0, &tuning, Some(0.01));
        assert_eq!(r, 0.015);
    }
}

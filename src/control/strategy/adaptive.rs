//! adaptive.rs
//! Dual-channel correction with self-tuning resistances.
//!
//! A negative residual (cell below the reference) is pushed up by the
//! depolarizing channel, but only while the membrane is below that light's
//! reversal potential; a positive residual is pulled down by the repolarizing
//! channel. The resistance of the channel that was lit on the previous tick is
//! tuned on every tick whose residual clears the noise threshold.

use crate::control::{
    config::AdaptiveParams,
    strategy::{
        Channel, Command, CorrectionInput, CorrectionStrategy, Resistances, adapt_resistance,
        past_correction_start,
    },
};

/// Lower bound factor on resistance descent (`R >= FLOOR * down`).
pub const RESISTANCE_FLOOR: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct AdaptiveResistance {
    params: AdaptiveParams,
    correction_start: u32,
    reversal_potential: f64,
    primary: f64,
    secondary: f64,
    /// Channel lit on the previous tick of this cycle.
    active: Option<Channel>,
}

impl AdaptiveResistance {
    pub fn new(params: AdaptiveParams, correction_start: u32, reversal_potential: f64) -> Self {
        Self {
            primary: params.resistance_primary,
            secondary: params.resistance_secondary,
            params,
            correction_start,
            reversal_potential,
            active: None,
        }
    }

    fn tune(&mut self, previous: f64, current: f64) {
        let resistance = match self.active {
            Some(Channel::Primary) => &mut self.primary,
            Some(Channel::Secondary) => &mut self.secondary,
            None => return,
        };
        adapt_resistance(
            resistance,
            previous,
            current,
            &self.params.adaptation,
            Some(RESISTANCE_FLOOR),
        );
    }
}

impl CorrectionStrategy for AdaptiveResistance {
    fn name(&self) -> &'static str {
        "adaptive_resistance"
    }

    fn begin_cycle(&mut self) {
        self.active = None;
    }

    fn step(&mut self, input: &CorrectionInput<'_>) -> Command {
        let e = input.residual();
        let started = past_correction_start(input.offset, self.correction_start);

        if started && e.abs() > self.params.adaptation.noise_threshold {
            self.tune(input.previous_residual(), e);
        }

        let command = if !started {
            Command::Off
        } else if e < 0.0 && input.sample < self.reversal_potential {
            Command::Drive { channel: Channel::Primary, level: -e / self.primary }
        } else if e > 0.0 {
            Command::Drive { channel: Channel::Secondary, level: e / self.secondary }
        } else {
            Command::Off
        };

        self.active = match command {
            Command::Drive { channel, .. } => Some(channel),
            _ => None,
        };
        command
    }

    fn resistances(&self) -> Resistances {
        Resistances { primary: self.primary, secondary: Some(self.secondary) }
    }
}

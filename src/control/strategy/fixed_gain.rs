//! fixed_gain.rs
//! Single-channel proportional correction: `u = (C / R) * e`.
//!
//! On a light rig the channel is unidirectional, so negative commands end up
//! clamped to zero by the output stage. In current clamp the amplifier takes
//! a signed command `-u * CURRENT_COMMAND_SCALE` and the reference is echoed
//! on the second output. With `adapt` on, the resistance follows the same
//! overshoot rule as the dual-channel variant, but only from the third tick of
//! a cycle and without a lower bound.

use crate::control::{
    config::FixedGainParams,
    strategy::{Channel, Command, CorrectionInput, CorrectionStrategy, Resistances, adapt_resistance},
};

/// Amplifier command volts per pA of injected current.
pub const CURRENT_COMMAND_SCALE: f64 = 2.5e-3;

#[derive(Debug, Clone)]
pub struct FixedGain {
    params: FixedGainParams,
    resistance: f64,
}

impl FixedGain {
    pub fn new(params: FixedGainParams) -> Self {
        let resistance = params.resistance;
        Self { params, resistance }
    }

    #[inline]
    pub fn conductance(&self) -> f64 {
        self.params.capacitance / self.resistance
    }
}

impl CorrectionStrategy for FixedGain {
    fn name(&self) -> &'static str {
        "fixed_gain"
    }

    fn step(&mut self, input: &CorrectionInput<'_>) -> Command {
        let e = input.residual();
        // Output uses the resistance from before this tick's adaptation.
        let level = self.conductance() * e;

        if self.params.adapt && input.offset > 1 && e.abs() > self.params.adaptation.noise_threshold {
            adapt_resistance(
                &mut self.resistance,
                input.previous_residual(),
                e,
                &self.params.adaptation,
                None,
            );
        }

        if self.params.current_clamp {
            Command::Inject { level: -level * CURRENT_COMMAND_SCALE, echo: input.sample - e }
        } else {
            Command::Drive { channel: Channel::Primary, level }
        }
    }

    fn resistances(&self) -> Resistances {
        Resistances { primary: self.resistance, secondary: None }
    }
}

//! config.rs
//! Operator-tunable parameters, read only at reconfiguration time.
//!
//! Defaults follow the values the rig ships with (5 mV/ms upstroke slope,
//! −40 mV cutoff, three learned cycles, 5 V LED driver ceiling). Everything is
//! validated up front so the tick never divides by a zero resistance or indexes
//! a ring sized from a bogus period.

use std::{fs, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};

use crate::control::{edge::delay_ticks, error::ConfigError};

/// Parameters shared by every correction strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlParams {
    /// Minimum rise over one millisecond that counts as an upstroke (mV/ms).
    pub slope_threshold: f64,
    /// The sample must also exceed this potential for an upstroke (mV).
    pub cutoff_voltage: f64,
    /// Correction stops once the cycle offset exceeds this fraction of the BCL.
    pub cycle_cutoff: f64,
    /// Number of cycles averaged into the learned reference.
    pub lognum: u32,
    /// First offset (1-based) at which output may be emitted.
    pub correction_start: u32,
    /// Depolarizing light is only effective below this potential (mV).
    pub reversal_potential: f64,
    /// Ceiling of every actuation channel (V).
    pub output_max: f64,
    pub strategy: StrategyParams,
    pub reference: ReferenceParams,
    pub pacing: Option<PacingParams>,
}

impl Default for ControlParams {
    fn default() -> Self {
        Self {
            slope_threshold: 5.0,
            cutoff_voltage: -40.0,
            cycle_cutoff: 0.98,
            lognum: 3,
            correction_start: 0,
            reversal_potential: -20.0,
            output_max: 5.0,
            strategy: StrategyParams::default(),
            reference: ReferenceParams::Learned,
            pacing: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyParams {
    FixedGain(FixedGainParams),
    AdaptiveResistance(AdaptiveParams),
    Pid(PidParams),
}

impl Default for StrategyParams {
    fn default() -> Self {
        StrategyParams::AdaptiveResistance(AdaptiveParams::default())
    }
}

impl StrategyParams {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyParams::FixedGain(_) => "fixed_gain",
            StrategyParams::AdaptiveResistance(_) => "adaptive_resistance",
            StrategyParams::Pid(_) => "pid",
        }
    }

    /// Whether the variant drives both light channels.
    pub fn is_dual_channel(&self) -> bool {
        !matches!(self, StrategyParams::FixedGain(_))
    }

    /// The secondary output is a reference monitor, not an actuator.
    pub fn echoes_reference(&self) -> bool {
        matches!(self, StrategyParams::FixedGain(p) if p.current_clamp)
    }
}

/// Overshoot / growing-error resistance tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationParams {
    /// Resistance multiplier after an overshoot.
    pub up: f64,
    /// Resistance divisor while the error keeps growing.
    pub down: f64,
    /// Residuals at or below this magnitude leave the resistance alone (mV).
    pub noise_threshold: f64,
}

impl Default for AdaptationParams {
    fn default() -> Self {
        Self { up: 8.0, down: 2.0, noise_threshold: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedGainParams {
    /// Cell capacitance (pF).
    pub capacitance: f64,
    /// Membrane resistance (MOhm); gain is `capacitance / resistance`.
    pub resistance: f64,
    /// Let the resistance track overshoots like the adaptive variant does.
    pub adapt: bool,
    pub adaptation: AdaptationParams,
    /// Amplifier in current clamp: the primary output carries a signed current
    /// command and the secondary one echoes the reference value.
    pub current_clamp: bool,
}

impl Default for FixedGainParams {
    fn default() -> Self {
        Self {
            capacitance: 150.0,
            resistance: 150.0,
            adapt: false,
            adaptation: AdaptationParams { up: 2.0, down: 2.0, noise_threshold: 2.0 },
            current_clamp: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveParams {
    /// Initial resistance of the depolarizing (blue) channel (MOhm).
    pub resistance_primary: f64,
    /// Initial resistance of the repolarizing (red) channel (MOhm).
    pub resistance_secondary: f64,
    pub adaptation: AdaptationParams,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self {
            resistance_primary: 150.0,
            resistance_secondary: 150.0,
            adaptation: AdaptationParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidParams {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Residuals used for the least-squares derivative.
    pub derivative_window: usize,
    /// Changes of the PID value at or below this repeat the previous output.
    pub pid_threshold: f64,
    /// PID magnitudes at or below this switch both lights off.
    pub min_pid: f64,
    pub resistance_primary: f64,
    pub resistance_secondary: f64,
    /// Zero the integral once the cell has sat at rest for a full window.
    pub reset_integral_at_rest: bool,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.1,
            derivative_window: 10,
            pid_threshold: 0.1,
            min_pid: 0.2,
            resistance_primary: 150.0,
            resistance_secondary: 50.0,
            reset_integral_at_rest: false,
        }
    }
}

/// Where the target waveform comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ReferenceParams {
    /// Average the first `lognum` cycles.
    #[default]
    Learned,
    /// Read one value per tick from a whitespace-separated text file.
    File {
        path: PathBuf,
        #[serde(default = "unit_gain")]
        gain: f64,
        #[serde(default)]
        offset: f64,
        /// `0` loops forever.
        #[serde(default = "default_loops")]
        loops: u32,
    },
}

fn unit_gain() -> f64 {
    1.0
}

fn default_loops() -> u32 {
    100
}

/// Light pulses that evoke the next cycle while the controller waits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingParams {
    /// Pulse only while the membrane sits below this potential (mV).
    pub light_on_below: f64,
    /// Depolarizing driver level during the pulse (V).
    pub pulse_strength: f64,
}

impl Default for PacingParams {
    fn default() -> Self {
        Self { light_on_below: -60.0, pulse_strength: 3.0 }
    }
}

/// Upper bound on [`history_capacity`]; one second at 0.1 ms.
pub const MAX_HISTORY: usize = 10_000;

/// Sample History capacity: one second of ticks, and always longer than the
/// edge detector's look-back.
pub fn history_capacity(period_ms: f64) -> usize {
    ((1000.0 / period_ms).ceil() as usize).max(delay_ticks(period_ms) + 1)
}

impl ControlParams {
    /// Reads a JSON parameter file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Rejects every combination the tick cannot run safely with.
    pub fn validate(&self, period_ms: f64) -> Result<(), ConfigError> {
        if !(period_ms.is_finite() && period_ms > 0.0) {
            return Err(ConfigError::Period(period_ms));
        }
        let needed = history_capacity(period_ms);
        if needed > MAX_HISTORY {
            return Err(ConfigError::HistoryTooLong { period: period_ms, needed, max: MAX_HISTORY });
        }
        positive("slope_threshold", self.slope_threshold)?;
        positive("output_max", self.output_max)?;
        finite("cutoff_voltage", self.cutoff_voltage)?;
        finite("reversal_potential", self.reversal_potential)?;
        if self.lognum == 0 {
            return Err(ConfigError::ZeroLognum);
        }
        if !(self.cycle_cutoff > 0.0 && self.cycle_cutoff <= 1.0) {
            return Err(ConfigError::CycleCutoff(self.cycle_cutoff));
        }

        match &self.strategy {
            StrategyParams::FixedGain(p) => {
                positive("capacitance", p.capacitance)?;
                positive("resistance", p.resistance)?;
                if p.adapt {
                    p.adaptation.validate()?;
                }
            }
            StrategyParams::AdaptiveResistance(p) => {
                positive("resistance_primary", p.resistance_primary)?;
                positive("resistance_secondary", p.resistance_secondary)?;
                p.adaptation.validate()?;
            }
            StrategyParams::Pid(p) => {
                finite("kp", p.kp)?;
                finite("ki", p.ki)?;
                finite("kd", p.kd)?;
                finite("pid_threshold", p.pid_threshold)?;
                finite("min_pid", p.min_pid)?;
                positive("resistance_primary", p.resistance_primary)?;
                positive("resistance_secondary", p.resistance_secondary)?;
                let max = history_capacity(period_ms);
                if p.derivative_window < 2 || p.derivative_window > max {
                    return Err(ConfigError::DerivativeWindow { got: p.derivative_window, max });
                }
            }
        }

        if let ReferenceParams::File { gain, offset, .. } = &self.reference {
            finite("gain", *gain)?;
            finite("offset", *offset)?;
        }
        if let Some(pacing) = &self.pacing {
            finite("light_on_below", pacing.light_on_below)?;
            positive("pulse_strength", pacing.pulse_strength)?;
        }
        Ok(())
    }
}

impl AdaptationParams {
    fn validate(&self) -> Result<(), ConfigError> {
        positive("adaptation.up", self.up)?;
        positive("adaptation.down", self.down)?;
        finite("adaptation.noise_threshold", self.noise_threshold)
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if value <= 0.0 {
        return Err(ConfigError::NonPositive { name, value });
    }
    Ok(())
}

fn finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NonFinite { name });
    }
    Ok(())
}

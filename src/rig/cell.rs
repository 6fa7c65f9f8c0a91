//! cell.rs
//! Synthetic excitable cell for driving the controller without hardware.
//!
//! Each cycle is a piecewise-linear action potential: fast upstroke, slowly
//! decaying plateau, linear repolarization, then rest until the next beat.
//! After `diverge_after` cycles the plateau shifts, which is the deviation the
//! controller has to cancel. Light moves the membrane through a first-order
//! lag: the primary (blue) channel depolarizes, the secondary (red) one
//! repolarizes.

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::control::Actuation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellParams {
    /// Beat-to-beat interval (ms).
    pub bcl_ms: f64,
    pub rest_mv: f64,
    pub peak_mv: f64,
    pub upstroke_ms: f64,
    /// Potential at the end of the plateau (mV).
    pub plateau_mv: f64,
    /// Action potential duration, upstroke to rest (ms).
    pub apd_ms: f64,
    /// Uniform noise amplitude (± mV).
    pub noise_mv: f64,
    /// Beats before the plateau starts drifting; `None` keeps every beat alike.
    pub diverge_after: Option<u32>,
    /// Plateau shift once diverged (mV).
    pub divergence_mv: f64,
    /// Membrane shift per volt of light drive (mV/V).
    pub light_gain: f64,
    /// Light response time constant (ms).
    pub light_tau_ms: f64,
    pub seed: u64,
}

impl Default for CellParams {
    fn default() -> Self {
        Self {
            bcl_ms: 500.0,
            rest_mv: -80.0,
            peak_mv: 30.0,
            upstroke_ms: 2.0,
            plateau_mv: 0.0,
            apd_ms: 250.0,
            noise_mv: 0.3,
            diverge_after: Some(5),
            divergence_mv: 12.0,
            light_gain: 8.0,
            light_tau_ms: 4.0,
            seed: 7,
        }
    }
}

pub struct CellModel {
    params: CellParams,
    period_ms: f64,
    rng: StdRng,
    /// Time since the last upstroke (ms).
    phase_ms: f64,
    beats: u32,
    light_mv: f64,
}

impl CellModel {
    pub fn new(params: CellParams, period_ms: f64) -> Self {
        let rng = StdRng::seed_from_u64(params.seed);
        Self {
            params,
            period_ms,
            rng,
            phase_ms: 0.0,
            beats: 0,
            light_mv: 0.0,
        }
    }

    /// Advances one tick under the given light and returns the new potential.
    pub fn step(&mut self, drive: Actuation) -> f64 {
        let p = &self.params;
        let target = p.light_gain * (drive.primary - drive.secondary);
        let alpha = (self.period_ms / p.light_tau_ms.max(self.period_ms)).min(1.0);
        self.light_mv += (target - self.light_mv) * alpha;

        let noise = if p.noise_mv > 0.0 {
            self.rng.random_range(-p.noise_mv..=p.noise_mv)
        } else {
            0.0
        };
        let vm = self.waveform(self.phase_ms) + self.light_mv + noise;

        self.phase_ms += self.period_ms;
        if self.phase_ms >= self.params.bcl_ms {
            self.phase_ms -= self.params.bcl_ms;
            self.beats += 1;
        }
        vm
    }

    /// Noise-free, light-free potential `t` ms into the current beat.
    pub fn waveform(&self, t: f64) -> f64 {
        let p = &self.params;
        let plateau = if self.is_divergent() { p.plateau_mv + p.divergence_mv } else { p.plateau_mv };
        let plateau_end = p.apd_ms * 0.7;

        if t < p.upstroke_ms {
            p.rest_mv + (p.peak_mv - p.rest_mv) * t / p.upstroke_ms
        } else if t < plateau_end {
            let frac = (t - p.upstroke_ms) / (plateau_end - p.upstroke_ms);
            p.peak_mv + (plateau - p.peak_mv) * frac
        } else if t < p.apd_ms {
            let frac = (t - plateau_end) / (p.apd_ms - plateau_end);
            plateau + (p.rest_mv - plateau) * frac
        } else {
            p.rest_mv
        }
    }

    #[inline]
    pub fn beats(&self) -> u32 {
        self.beats
    }

    #[inline]
    pub fn is_divergent(&self) -> bool {
        self.params.diverge_after.is_some_and(|n| self.beats >= n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> CellParams {
        CellParams { noise_mv: 0.0, diverge_after: None, ..Default::default() }
    }

    #[test]
    fn beat_shape() {
        let cell = CellModel::new(quiet(), 1.0);
        assert_eq!(cell.waveform(0.0), -80.0);
        assert_eq!(cell.waveform(1.0), -25.0);
        assert_eq!(cell.waveform(175.0), 0.0);
        assert_eq!(cell.waveform(300.0), -80.0);
    }

    #[test]
    fn beats_repeat_every_bcl() {
        let mut cell = CellModel::new(quiet(), 1.0);
        let first: Vec<f64> = (0..500).map(|_| cell.step(Actuation::OFF)).collect();
        let second: Vec<f64> = (0..500).map(|_| cell.step(Actuation::OFF)).collect();
        assert_eq!(first, second);
        assert_eq!(cell.beats(), 2);
    }

    #[test]
    fn plateau_shifts_after_divergence() {
        let params = CellParams { diverge_after: Some(1), ..quiet() };
        let mut cell = CellModel::new(params, 1.0);
        assert_eq!(cell.waveform(175.0), 0.0);
        for _ in 0..500 {
            cell.step(Actuation::OFF);
        }
        assert!(cell.is_divergent());
        assert_eq!(cell.waveform(175.0), 12.0);
    }

    #[test]
    fn light_pushes_membrane_both_ways() {
        let mut plain = CellModel::new(quiet(), 1.0);
        let mut blue = CellModel::new(quiet(), 1.0);
        let mut red = CellModel::new(quiet(), 1.0);
        let (mut v, mut v_blue, mut v_red) = (0.0, 0.0, 0.0);
        for _ in 0..50 {
            v = plain.step(Actuation::OFF);
            v_blue = blue.step(Actuation { primary: 1.0, secondary: 0.0 });
            v_red = red.step(Actuation { primary: 0.0, secondary: 1.0 });
        }
        // Settled at light_gain * 1 V.
        assert!((v_blue - v - 8.0).abs() < 1e-3);
        assert!((v_red - v + 8.0).abs() < 1e-3);
    }

    #[test]
    fn same_seed_same_noise() {
        let mut a = CellModel::new(CellParams::default(), 0.5);
        let mut b = CellModel::new(CellParams::default(), 0.5);
        for _ in 0..100 {
            assert_eq!(a.step(Actuation::OFF), b.step(Actuation::OFF));
        }
    }
}

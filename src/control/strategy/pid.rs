//! pid.rs
//! Dual-channel PID correction with a least-squares derivative.
//!
//! The derivative is the slope of a straight line fitted through the last
//! `derivative_window` residuals, which is far less noise-sensitive than a
//! two-point difference at sub-millisecond periods. The output only changes
//! when the PID value moves by more than `pid_threshold`; otherwise the lights
//! keep their previous levels.

use crate::control::{
    config::PidParams,
    strategy::{
        Channel, Command, CorrectionInput, CorrectionStrategy, PidTerms, Resistances,
        past_correction_start,
    },
};

/// Slope reported when the regression is degenerate.
pub const SLOPE_SENTINEL: f64 = 10_000.0;
/// Regression denominators smaller than this are treated as degenerate.
pub const SLOPE_DENOM_EPSILON: f64 = 1e-3;
/// Distance from the resting reference that counts as "at rest" (mV).
pub const REST_TOLERANCE: f64 = 0.005;

/// Ordinary least-squares slope of `values` against `x_j = j * period_ms`.
///
/// `values` must yield exactly `n` samples, oldest first. Returns
/// [`SLOPE_SENTINEL`] when `|n·Σx² − (Σx)²| < 1e-3`.
pub fn least_squares_slope(values: impl IntoIterator<Item = f64>, n: usize, period_ms: f64) -> f64 {
    let (mut sum_x, mut sum_x2, mut sum_y, mut sum_xy) = (0.0, 0.0, 0.0, 0.0);
    for (j, y) in values.into_iter().take(n).enumerate() {
        let x = j as f64 * period_ms;
        sum_x += x;
        sum_x2 += x * x;
        sum_y += y;
        sum_xy += x * y;
    }
    let len = n as f64;
    let denom = len * sum_x2 - sum_x * sum_x;
    if denom.abs() < SLOPE_DENOM_EPSILON {
        return SLOPE_SENTINEL;
    }
    (len * sum_xy - sum_x * sum_y) / denom
}

#[derive(Debug, Clone)]
pub struct Pid {
    params: PidParams,
    correction_start: u32,
    reversal_potential: f64,
    integral: f64,
    terms: PidTerms,
    /// Consecutive at-rest ticks, for the optional integral reset.
    rest_run: usize,
    last_rest_tick: Option<u64>,
}

impl Pid {
    pub fn new(params: PidParams, correction_start: u32, reversal_potential: f64) -> Self {
        Self {
            params,
            correction_start,
            reversal_potential,
            integral: 0.0,
            terms: PidTerms::default(),
            rest_run: 0,
            last_rest_tick: None,
        }
    }

    #[inline]
    pub fn integral(&self) -> f64 {
        self.integral
    }
}

impl CorrectionStrategy for Pid {
    fn name(&self) -> &'static str {
        "pid"
    }

    fn step(&mut self, input: &CorrectionInput<'_>) -> Command {
        let e = input.residual();
        let p = &self.params;

        // Integrate only while the light is below its ceiling and the
        // residual is one a channel can act on.
        if !input.saturated && (input.sample < self.reversal_potential || e > 0.0) {
            self.integral += e;
        }

        let slope = least_squares_slope(
            input.residuals.window(p.derivative_window),
            p.derivative_window,
            input.period_ms,
        );

        let previous = self.terms.pid;
        let terms = PidTerms {
            p: p.kp * e,
            i: p.ki * self.integral,
            d: p.kd * slope,
            pid: 0.0,
        };
        let pid = terms.p + terms.i + terms.d;
        self.terms = PidTerms { pid, ..terms };
        let change = previous - pid;

        if !past_correction_start(input.offset, self.correction_start)
            || change.abs() <= p.pid_threshold
        {
            return Command::Hold;
        }

        if pid < 0.0 && pid.abs() > p.min_pid && input.sample < self.reversal_potential {
            Command::Drive { channel: Channel::Primary, level: -pid / p.resistance_primary }
        } else if pid > 0.0 && pid.abs() > p.min_pid {
            Command::Drive { channel: Channel::Secondary, level: pid / p.resistance_secondary }
        } else {
            Command::Off
        }
    }

    fn observe_rest(&mut self, tick: u64, sample: f64, rest_level: Option<f64>) {
        if !self.params.reset_integral_at_rest {
            return;
        }
        let Some(level) = rest_level else {
            return;
        };
        if (sample - level).abs() >= REST_TOLERANCE {
            return;
        }

        let consecutive = self.last_rest_tick.is_some_and(|t| tick == t + 1);
        self.last_rest_tick = Some(tick);
        self.rest_run = if consecutive { self.rest_run + 1 } else { 0 };

        if self.rest_run == self.params.derivative_window {
            self.integral = 0.0;
            self.rest_run = 0;
        }
    }

    fn resistances(&self) -> Resistances {
        Resistances {
            primary: self.params.resistance_primary,
            secondary: Some(self.params.resistance_secondary),
        }
    }

    fn terms(&self) -> Option<PidTerms> {
        Some(self.terms)
    }
}

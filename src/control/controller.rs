//! controller.rs
//! Closed-loop tick: learn a reference cycle, then pull every later cycle
//! towards it.
//!
//! The controller owns every buffer and counter. One call to [`Controller::tick`]
//! consumes one membrane sample and returns the levels to write this period;
//! it never blocks and never fails. Parameter and period changes go through
//! [`Controller::reconfigure`], which builds a fresh controller.

use log::{debug, info};
use serde::Serialize;

use crate::control::{
    config::{ControlParams, ReferenceParams, history_capacity},
    edge::EdgeDetector,
    error::ConfigError,
    history::RingBuffer,
    learner::{LearnEvent, LearnerPhase, ReferenceLearner},
    output::{Actuation, OutputMapper, cutoff_reached},
    reference::FileReference,
    strategy::{Channel, Command, CorrectionInput, CorrectionStrategy, build_strategy},
};

/// Externally visible controller state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ControllerState {
    /// Waiting for an upstroke.
    #[default]
    Idle,
    /// Averaging cycles into the reference.
    Learning,
    /// Correction cycle in progress.
    Correcting,
    /// File reference replayed its full loop budget.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Correcting { offset: usize },
    Exhausted,
}

/// Where reference values come from.
#[derive(Debug, Clone)]
pub enum ReferenceSource {
    Learned(ReferenceLearner),
    File(FileReference),
}

impl ReferenceSource {
    pub fn is_ready(&self) -> bool {
        match self {
            ReferenceSource::Learned(l) => l.is_frozen(),
            ReferenceSource::File(f) => f.is_ready(),
        }
    }

    pub fn value(&self, k: usize) -> Option<f64> {
        match self {
            ReferenceSource::Learned(l) => l.value(k),
            ReferenceSource::File(f) => f.value(k),
        }
    }

    /// Cycle length in ticks. A file reference lasts exactly one waveform.
    pub fn bcl(&self) -> f64 {
        match self {
            ReferenceSource::Learned(l) => l.bcl(),
            ReferenceSource::File(f) => f.len() as f64,
        }
    }

    /// Cycles learned, or loops already replayed from file.
    pub fn cycles(&self) -> u32 {
        match self {
            ReferenceSource::Learned(l) => l.cycles_completed(),
            ReferenceSource::File(f) => f.loops_done(),
        }
    }

    /// Reference potential where the correction window closes.
    fn rest_level(&self, cycle_cutoff: f64) -> Option<f64> {
        if !self.is_ready() {
            return None;
        }
        self.value((cycle_cutoff * self.bcl()).floor() as usize)
    }

    fn complete_cycle(&mut self) {
        if let ReferenceSource::File(f) = self {
            f.complete_loop();
        }
    }

    fn is_exhausted(&self) -> bool {
        matches!(self, ReferenceSource::File(f) if f.is_exhausted())
    }
}

#[derive(Debug, Clone, Copy)]
struct CorrectionPoint {
    offset: usize,
    reference: Option<f64>,
    residual: Option<f64>,
}

/// Read-only snapshot, refreshed every tick.
///
/// `offset`, `reference` and `residual` describe the correction tick just
/// run; outside correction they are 0 and `None`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Telemetry {
    pub tick: u64,
    pub state: ControllerState,
    pub offset: usize,
    pub cycles: u32,
    pub bcl: f64,
    pub sample: f64,
    pub reference: Option<f64>,
    pub residual: Option<f64>,
    pub p: Option<f64>,
    pub i: Option<f64>,
    pub d: Option<f64>,
    pub pid: Option<f64>,
    pub resistance_primary: f64,
    pub resistance_secondary: Option<f64>,
    pub primary: f64,
    pub secondary: f64,
}

pub struct Controller {
    params: ControlParams,
    period_ms: f64,
    history: RingBuffer,
    residuals: RingBuffer,
    edge: EdgeDetector,
    reference: ReferenceSource,
    strategy: Box<dyn CorrectionStrategy>,
    output: OutputMapper,
    phase: Phase,
    tick: u64,
    telemetry: Telemetry,
}

impl Controller {
    /// Validates `params` and, for a file reference, loads the waveform.
    pub fn new(params: ControlParams, period_ms: f64) -> Result<Self, ConfigError> {
        params.validate(period_ms)?;
        let reference = match &params.reference {
            ReferenceParams::Learned => {
                ReferenceSource::Learned(ReferenceLearner::new(params.lognum, history_capacity(period_ms)))
            }
            ReferenceParams::File { path, gain, offset, loops } => {
                ReferenceSource::File(FileReference::load(path, *gain, *offset, *loops)?)
            }
        };
        Ok(Self::assemble(params, period_ms, reference))
    }

    /// Like [`Controller::new`] but with an already loaded waveform, whatever
    /// `params.reference` says.
    pub fn with_reference(
        params: ControlParams,
        period_ms: f64,
        reference: FileReference,
    ) -> Result<Self, ConfigError> {
        params.validate(period_ms)?;
        Ok(Self::assemble(params, period_ms, ReferenceSource::File(reference)))
    }

    fn assemble(params: ControlParams, period_ms: f64, reference: ReferenceSource) -> Self {
        let capacity = history_capacity(period_ms);
        let strategy = build_strategy(&params);
        let output = OutputMapper::new(params.output_max, params.strategy.is_dual_channel());
        info!(
            "[Controller] {} strategy, period {} ms, history {} ticks",
            strategy.name(),
            period_ms,
            capacity
        );
        Self {
            edge: EdgeDetector::new(period_ms, params.slope_threshold),
            history: RingBuffer::new(capacity),
            residuals: RingBuffer::new(capacity),
            reference,
            strategy,
            output,
            phase: Phase::Idle,
            tick: 0,
            telemetry: Telemetry::default(),
            params,
            period_ms,
        }
    }

    /// Controller for new parameters and/or period. Learned state, adaptive
    /// resistances and PID accumulators start over; a file waveform already in
    /// memory is reused when the path is unchanged. On error `self` is
    /// untouched and can keep running.
    pub fn reconfigure(&self, params: ControlParams, period_ms: f64) -> Result<Self, ConfigError> {
        let reusable = match (&self.reference, &self.params.reference, &params.reference) {
            (
                ReferenceSource::File(current),
                ReferenceParams::File { path: old, .. },
                ReferenceParams::File { path, gain, offset, loops },
            ) if old == path => Some(current.rescaled(*gain, *offset, *loops)),
            _ => None,
        };
        let next = match reusable {
            Some(reference) => Self::with_reference(params, period_ms, reference)?,
            None => Self::new(params, period_ms)?,
        };
        info!("[Controller] reconfigured, learned state cleared");
        Ok(next)
    }

    /// Host paused: outputs off, correction abandoned, learning kept.
    pub fn pause(&mut self) -> Actuation {
        if matches!(self.phase, Phase::Correcting { .. }) {
            self.phase = Phase::Idle;
        }
        let out = self.output.idle();
        self.telemetry.state = self.state();
        self.telemetry.primary = out.primary;
        self.telemetry.secondary = out.secondary;
        out
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Consumes one membrane sample (mV) and returns this period's outputs.
    pub fn tick(&mut self, sample: f64) -> Actuation {
        self.history.push(sample);
        let upstroke = self.edge.is_upstroke(&self.history);
        let falling = self.edge.is_falling(&self.history);
        let above_cutoff = sample > self.params.cutoff_voltage;

        if let ReferenceSource::Learned(learner) = &mut self.reference {
            match learner.observe(sample, upstroke, falling, self.params.cutoff_voltage) {
                LearnEvent::CycleStarted => {
                    debug!("[Controller] logging cycle {}", learner.cycles_completed() + 1)
                }
                LearnEvent::Frozen => debug!("[Controller] reference ready, BCL {:.1}", learner.bcl()),
                LearnEvent::None => {}
            }
        }

        if self.phase == Phase::Idle && upstroke && above_cutoff && self.reference.is_ready() {
            self.phase = Phase::Correcting { offset: 0 };
            self.residuals.reset();
            self.strategy.begin_cycle();
            debug!("[Controller] correction cycle opened at tick {}", self.tick);
        }

        let mut at = None;
        let out = match self.phase {
            Phase::Correcting { offset } => {
                let (out, r, e) = self.correct(offset, sample);
                at = Some(CorrectionPoint { offset, reference: r, residual: e });
                out
            }
            Phase::Idle => self.idle_output(sample),
            Phase::Exhausted => self.output.idle(),
        };

        self.strategy.observe_rest(
            self.tick,
            sample,
            self.reference.rest_level(self.params.cycle_cutoff),
        );

        self.refresh_telemetry(sample, at, out);
        self.tick += 1;
        out
    }

    /// One correction tick at `offset`, including the end-of-cycle guard.
    fn correct(&mut self, offset: usize, sample: f64) -> (Actuation, Option<f64>, Option<f64>) {
        let Some(reference) = self.reference.value(offset) else {
            // Cycle outlived the reference waveform.
            return (self.end_cycle(), None, None);
        };
        let residual = sample - reference;
        self.residuals.push(residual);

        let command = self.strategy.step(&CorrectionInput {
            offset,
            sample,
            residuals: &self.residuals,
            period_ms: self.period_ms,
            saturated: self.output.saturated(),
        });
        let mut out = self.output.apply(command);

        if cutoff_reached(offset, self.reference.bcl(), self.params.cycle_cutoff) {
            out = self.end_cycle();
        } else {
            self.phase = Phase::Correcting { offset: offset + 1 };
        }
        (out, Some(reference), Some(residual))
    }

    fn end_cycle(&mut self) -> Actuation {
        self.reference.complete_cycle();
        if self.reference.is_exhausted() {
            info!("[Controller] reference loop budget spent after {} cycles", self.reference.cycles());
            self.phase = Phase::Exhausted;
        } else {
            debug!("[Controller] correction cycle closed at tick {}", self.tick);
            self.phase = Phase::Idle;
        }
        self.output.idle()
    }

    /// Idle outputs: off, unless pacing pulls the cell into its next cycle.
    fn idle_output(&mut self, sample: f64) -> Actuation {
        match self.params.pacing {
            Some(pacing) if self.reference.is_ready() => {
                if sample < pacing.light_on_below {
                    self.output.pulse(Channel::Primary, pacing.pulse_strength)
                } else {
                    self.output.apply(Command::Hold)
                }
            }
            _ => self.output.idle(),
        }
    }

    fn refresh_telemetry(&mut self, sample: f64, at: Option<CorrectionPoint>, out: Actuation) {
        let terms = self.strategy.terms();
        let resistances = self.strategy.resistances();
        self.telemetry = Telemetry {
            tick: self.tick,
            state: self.state(),
            offset: at.map_or(0, |a| a.offset),
            cycles: self.reference.cycles(),
            bcl: self.reference.bcl(),
            sample,
            reference: at.and_then(|a| a.reference),
            residual: at.and_then(|a| a.residual),
            p: terms.map(|t| t.p),
            i: terms.map(|t| t.i),
            d: terms.map(|t| t.d),
            pid: terms.map(|t| t.pid),
            resistance_primary: resistances.primary,
            resistance_secondary: resistances.secondary,
            primary: out.primary,
            secondary: out.secondary,
        };
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> ControllerState {
        match self.phase {
            Phase::Correcting { .. } => ControllerState::Correcting,
            Phase::Exhausted => ControllerState::Exhausted,
            Phase::Idle => match &self.reference {
                ReferenceSource::Learned(l) if l.phase() == LearnerPhase::Logging => {
                    ControllerState::Learning
                }
                _ => ControllerState::Idle,
            },
        }
    }

    /// Intra-cycle offset of the next correction tick (0 when not correcting).
    pub fn offset(&self) -> usize {
        match self.phase {
            Phase::Correcting { offset } => offset,
            _ => 0,
        }
    }

    #[inline]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    #[inline]
    pub fn params(&self) -> &ControlParams {
        &self.params
    }

    #[inline]
    pub fn period_ms(&self) -> f64 {
        self.period_ms
    }

    #[inline]
    pub fn reference(&self) -> &ReferenceSource {
        &self.reference
    }

    #[inline]
    pub fn bcl(&self) -> f64 {
        self.reference.bcl()
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    #[inline]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    #[inline]
    pub fn history(&self) -> &RingBuffer {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::config::{PacingParams, PidParams, StrategyParams};

    /// 10-tick cycle at 1 ms: rest, sharp rise, slow fall.
    const CYCLE: [f64; 10] = [-80.0, -80.0, -50.0, -20.0, 10.0, 0.0, -20.0, -40.0, -60.0, -80.0];

    fn params(lognum: u32) -> ControlParams {
        ControlParams { lognum, ..Default::default() }
    }

    #[test]
    fn learning_then_correcting() {
        let mut c = Controller::new(params(2), 1.0).expect("valid");
        assert_eq!(c.state(), ControllerState::Idle);

        // Upstroke of the first cycle at index 3 (-20 > -40, +30 mV/ms).
        for (i, v) in CYCLE.iter().enumerate() {
            c.tick(*v);
            if i >= 3 {
                assert_eq!(c.state(), ControllerState::Learning, "tick {i}");
            }
        }
        for v in CYCLE {
            c.tick(v);
        }
        assert_eq!(c.state(), ControllerState::Learning);

        for v in &CYCLE[..4] {
            c.tick(*v);
        }
        assert_eq!(c.state(), ControllerState::Correcting);
        assert_eq!(c.bcl(), 10.0);
        assert_eq!(c.telemetry().residual, Some(0.0));
    }

    #[test]
    fn file_reference_starts_correcting_on_first_upstroke() {
        let wave = FileReference::from_samples(vec![-20.0; 20], 1.0, 0.0, 1);
        let mut c = Controller::with_reference(params(3), 1.0, wave).expect("valid");
        for v in &CYCLE[..4] {
            c.tick(*v);
        }
        assert_eq!(c.state(), ControllerState::Correcting);
        assert_eq!(c.bcl(), 20.0);
    }

    #[test]
    fn empty_file_reference_holds_idle() {
        let wave = FileReference::from_samples(Vec::new(), 1.0, 0.0, 0);
        let mut c = Controller::with_reference(params(3), 1.0, wave).expect("valid");
        for _ in 0..5 {
            for v in CYCLE {
                let out = c.tick(v);
                assert_eq!(out, Actuation::OFF);
                assert_eq!(c.state(), ControllerState::Idle);
            }
        }
    }

    #[test]
    fn loop_budget_exhausts() {
        let wave = FileReference::from_samples(vec![-20.0; 10], 1.0, 0.0, 2);
        let mut c = Controller::with_reference(params(3), 1.0, wave).expect("valid");
        for _ in 0..4 {
            for v in CYCLE {
                c.tick(v);
            }
        }
        assert_eq!(c.state(), ControllerState::Exhausted);
        assert_eq!(c.reference().cycles(), 2);
        assert_eq!(c.tick(0.0), Actuation::OFF);
    }

    #[test]
    fn pacing_pulses_below_threshold_only() {
        let wave = FileReference::from_samples(vec![-20.0; 10], 1.0, 0.0, 0);
        let p = ControlParams {
            pacing: Some(PacingParams { light_on_below: -60.0, pulse_strength: 3.0 }),
            ..params(3)
        };
        let mut c = Controller::with_reference(p, 1.0, wave).expect("valid");
        assert_eq!(c.tick(-80.0), Actuation { primary: 3.0, secondary: 0.0 });
        // Above the threshold the pulse is held until an upstroke takes over.
        assert_eq!(c.tick(-55.0), Actuation { primary: 3.0, secondary: 0.0 });
    }

    #[test]
    fn pacing_at_ceiling_does_not_freeze_pid_integral() {
        let wave = FileReference::from_samples(vec![-60.0; 20], 1.0, 0.0, 0);
        let p = ControlParams {
            strategy: StrategyParams::Pid(PidParams {
                kp: 0.0,
                ki: 1.0,
                kd: 0.0,
                pid_threshold: 0.0,
                min_pid: 0.0,
                ..Default::default()
            }),
            pacing: Some(PacingParams { light_on_below: -60.0, pulse_strength: 5.0 }),
            ..params(3)
        };
        let mut c = Controller::with_reference(p, 1.0, wave).expect("valid");
        for v in &CYCLE[..4] {
            c.tick(*v);
        }
        assert_eq!(c.state(), ControllerState::Correcting);

        let mut out = Actuation::OFF;
        for _ in 0..10 {
            out = c.tick(-50.0);
        }
        assert_eq!(c.state(), ControllerState::Correcting);
        assert!(c.telemetry().i.is_some_and(|i| i > 0.0));
        assert_eq!(out.primary, 0.0);
        assert!(out.secondary > 0.0);
    }

    #[test]
    fn pause_leaves_correction_but_keeps_reference() {
        let wave = FileReference::from_samples(vec![-20.0; 20], 1.0, 0.0, 0);
        let mut c = Controller::with_reference(params(3), 1.0, wave).expect("valid");
        for v in &CYCLE[..5] {
            c.tick(*v);
        }
        assert_eq!(c.state(), ControllerState::Correcting);
        assert_eq!(c.pause(), Actuation::OFF);
        assert_eq!(c.state(), ControllerState::Idle);
        assert!(c.reference().is_ready());
    }

    #[test]
    fn reconfigure_clears_learning_and_validates() {
        let mut c = Controller::new(params(1), 1.0).expect("valid");
        for _ in 0..2 {
            for v in CYCLE {
                c.tick(v);
            }
        }
        assert!(c.reference().is_ready());

        let pid = ControlParams {
            strategy: StrategyParams::Pid(PidParams::default()),
            ..params(1)
        };
        let c = c.reconfigure(pid, 0.5).expect("valid");
        assert!(!c.reference().is_ready());
        assert_eq!(c.strategy_name(), "pid");
        assert_eq!(c.history().capacity(), 2000);

        assert!(matches!(c.reconfigure(params(0), 1.0), Err(ConfigError::ZeroLognum)));
    }

    #[test]
    fn missing_reference_file_is_a_config_error() {
        let p = ControlParams {
            reference: ReferenceParams::File {
                path: "/nonexistent/apqr/reference.txt".into(),
                gain: 1.0,
                offset: 0.0,
                loops: 1,
            },
            ..Default::default()
        };
        assert!(matches!(Controller::new(p, 1.0), Err(ConfigError::Reference(_))));
    }
}

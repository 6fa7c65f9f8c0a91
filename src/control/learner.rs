//! learner.rs
//! Builds the reference ("ideal") cycle from the first `lognum` cycles.
//!
//! Every sample of a logged cycle is folded into the template with a running
//! average, and each new upstroke folds the closing cycle's length into the
//! basic cycle length (BCL). The update is the incremental form
//! `m += (x - m) / (n + 1)`, so identical cycles reproduce exactly. The
//! upstroke that closes cycle `lognum` freezes both.

use log::info;

/// Where the learner stands in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnerPhase {
    /// No upstroke seen yet.
    Waiting,
    /// Averaging the cycle that began at the last upstroke.
    Logging,
    /// `lognum` cycles averaged; template and BCL are read-only.
    Frozen,
}

/// What a single observation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnEvent {
    None,
    /// An upstroke opened a new logged cycle.
    CycleStarted,
    /// The last logged cycle just closed; the reference is ready.
    Frozen,
}

#[derive(Debug, Clone)]
pub struct ReferenceLearner {
    template: Vec<f64>,
    lognum: u32,
    completed: u32,
    phase: LearnerPhase,
    /// Between an upstroke and the first falling sample after it.
    rising: bool,
    offset: usize,
    bcl: f64,
}

impl ReferenceLearner {
    /// `max_cycle_len` bounds the template; samples past it still count
    /// towards the cycle length but are not averaged.
    pub fn new(lognum: u32, max_cycle_len: usize) -> Self {
        Self {
            template: vec![0.0; max_cycle_len.max(1)],
            lognum,
            completed: 0,
            phase: LearnerPhase::Waiting,
            rising: false,
            offset: 0,
            bcl: 0.0,
        }
    }

    /// Feeds one tick. `upstroke` and `falling` come from the edge detector.
    pub fn observe(
        &mut self,
        sample: f64,
        upstroke: bool,
        falling: bool,
        cutoff_voltage: f64,
    ) -> LearnEvent {
        let mut event = LearnEvent::None;

        if upstroke && !self.rising && self.phase != LearnerPhase::Frozen && sample > cutoff_voltage {
            if self.phase == LearnerPhase::Logging {
                let n = self.completed as f64;
                self.bcl += (self.offset as f64 - self.bcl) / (n + 1.0);
                self.completed += 1;
            }
            self.rising = true;
            self.offset = 0;
            if self.completed >= self.lognum {
                self.phase = LearnerPhase::Frozen;
                info!(
                    "[Learner] reference frozen after {} cycles, BCL={:.1} ticks",
                    self.completed, self.bcl
                );
                event = LearnEvent::Frozen;
            } else {
                self.phase = LearnerPhase::Logging;
                event = LearnEvent::CycleStarted;
            }
        }

        if falling && self.rising {
            self.rising = false;
        }

        if self.phase == LearnerPhase::Logging {
            if let Some(slot) = self.template.get_mut(self.offset) {
                let n = self.completed as f64;
                *slot += (sample - *slot) / (n + 1.0);
            }
            self.offset += 1;
        }

        event
    }

    #[inline]
    pub fn phase(&self) -> LearnerPhase {
        self.phase
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.phase == LearnerPhase::Frozen
    }

    /// Cycles whose length is known (closed by the following upstroke).
    #[inline]
    pub fn cycles_completed(&self) -> u32 {
        self.completed
    }

    /// Running average of closed cycle lengths, in ticks.
    #[inline]
    pub fn bcl(&self) -> f64 {
        self.bcl
    }

    /// Ticks logged so far in the open cycle.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Template value at intra-cycle offset `k`.
    #[inline]
    pub fn value(&self, k: usize) -> Option<f64> {
        self.template.get(k).copied()
    }

    pub fn template(&self) -> &[f64] {
        &self.template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives the learner with a hand-made upstroke flag instead of a detector.
    fn feed(learner: &mut ReferenceLearner, cycle: &[f64]) {
        for (i, &v) in cycle.iter().enumerate() {
            learner.observe(v, i == 0, i == 1, -40.0);
        }
    }

    #[test]
    fn first_upstroke_starts_logging_without_bcl() {
        let mut l = ReferenceLearner::new(3, 16);
        assert_eq!(l.observe(0.0, true, false, -40.0), LearnEvent::CycleStarted);
        assert_eq!(l.phase(), LearnerPhase::Logging);
        assert_eq!(l.cycles_completed(), 0);
        assert_eq!(l.bcl(), 0.0);
        assert_eq!(l.value(0), Some(0.0));
    }

    #[test]
    fn template_is_running_mean_of_cycles() {
        let mut l = ReferenceLearner::new(3, 16);
        feed(&mut l, &[10.0, 4.0, 2.0, 0.0]);
        feed(&mut l, &[20.0, 8.0, 4.0, 6.0]);
        assert_eq!(l.cycles_completed(), 1);
        assert_eq!(l.value(0), Some(15.0));
        assert_eq!(l.value(1), Some(6.0));
        assert_eq!(l.value(3), Some(3.0));
    }

    #[test]
    fn bcl_is_mean_of_cycle_lengths() {
        let mut l = ReferenceLearner::new(3, 64);
        feed(&mut l, &[0.0; 10]);
        feed(&mut l, &[0.0; 20]);
        feed(&mut l, &[0.0; 30]);
        assert_eq!(l.cycles_completed(), 2);
        assert_eq!(l.bcl(), 15.0);
        // The upstroke closing the third cycle freezes the learner.
        assert_eq!(l.observe(0.0, true, false, -40.0), LearnEvent::Frozen);
        assert_eq!(l.cycles_completed(), 3);
        assert_eq!(l.bcl(), 20.0);
    }

    #[test]
    fn frozen_template_ignores_further_cycles() {
        let mut l = ReferenceLearner::new(1, 8);
        feed(&mut l, &[1.0, 1.0, 1.0]);
        l.observe(50.0, true, false, -40.0);
        assert!(l.is_frozen());
        feed(&mut l, &[9.0, 9.0, 9.0]);
        assert_eq!(l.value(0), Some(1.0));
        assert_eq!(l.bcl(), 3.0);
    }

    #[test]
    fn no_retrigger_until_falling_edge() {
        let mut l = ReferenceLearner::new(3, 8);
        l.observe(0.0, true, false, -40.0);
        l.observe(10.0, true, false, -40.0);
        assert_eq!(l.offset(), 2);
        assert_eq!(l.cycles_completed(), 0);
    }

    #[test]
    fn below_cutoff_is_not_an_upstroke() {
        let mut l = ReferenceLearner::new(3, 8);
        assert_eq!(l.observe(-45.0, true, false, -40.0), LearnEvent::None);
        assert_eq!(l.phase(), LearnerPhase::Waiting);
    }

    #[test]
    fn overlong_cycle_counts_but_does_not_overflow() {
        let mut l = ReferenceLearner::new(1, 4);
        feed(&mut l, &[1.0; 6]);
        l.observe(0.0, true, false, -40.0);
        assert_eq!(l.bcl(), 6.0);
        assert_eq!(l.template().len(), 4);
    }
}

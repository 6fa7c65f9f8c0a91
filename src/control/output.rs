//! output.rs
//! Maps strategy commands onto the physical channels.
//!
//! Light levels are clamped to `[0, ceiling]` and a driven channel silences
//! the other one. `Hold` repeats whatever was written on the previous tick.
//! Current-clamp commands bypass both rules.

use serde::Serialize;

use crate::control::strategy::{Channel, Command};

/// Levels written to the host on one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Actuation {
    pub primary: f64,
    pub secondary: f64,
}

impl Actuation {
    pub const OFF: Actuation = Actuation { primary: 0.0, secondary: 0.0 };

    #[inline]
    pub fn level(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Primary => self.primary,
            Channel::Secondary => self.secondary,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputMapper {
    ceiling: f64,
    dual: bool,
    current: Actuation,
    /// Level of the last `Drive` after clamping, for integral gating.
    last_drive_level: f64,
}

impl OutputMapper {
    pub fn new(ceiling: f64, dual: bool) -> Self {
        Self { ceiling, dual, current: Actuation::OFF, last_drive_level: 0.0 }
    }

    pub fn apply(&mut self, command: Command) -> Actuation {
        match command {
            Command::Hold => {}
            Command::Off => self.current = Actuation::OFF,
            Command::Drive { channel, level } => {
                let level = level.clamp(0.0, self.ceiling);
                self.current = match (channel, self.dual) {
                    (Channel::Primary, _) => Actuation { primary: level, secondary: 0.0 },
                    (Channel::Secondary, true) => Actuation { primary: 0.0, secondary: level },
                    // Single-channel rigs have nothing wired to the secondary output.
                    (Channel::Secondary, false) => Actuation::OFF,
                };
                self.last_drive_level = level;
            }
            Command::Inject { level, echo } => {
                self.current = Actuation { primary: level, secondary: echo };
            }
        }
        self.current
    }

    /// Pacing pulse on one channel. Leaves the saturation state alone, since
    /// it is not a correction output.
    pub fn pulse(&mut self, channel: Channel, level: f64) -> Actuation {
        let level = level.clamp(0.0, self.ceiling);
        self.current = match (channel, self.dual) {
            (Channel::Primary, _) => Actuation { primary: level, secondary: 0.0 },
            (Channel::Secondary, true) => Actuation { primary: 0.0, secondary: level },
            (Channel::Secondary, false) => Actuation::OFF,
        };
        self.current
    }

    /// Both channels to zero.
    pub fn idle(&mut self) -> Actuation {
        self.current = Actuation::OFF;
        self.last_drive_level = 0.0;
        self.current
    }

    /// The last driven level already sits at the ceiling.
    #[inline]
    pub fn saturated(&self) -> bool {
        self.last_drive_level >= self.ceiling
    }

    #[inline]
    pub fn current(&self) -> Actuation {
        self.current
    }

    #[inline]
    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }
}

/// End-of-cycle guard: offset `k` has run past `fraction * bcl`.
#[inline]
pub fn cutoff_reached(offset: usize, bcl: f64, fraction: f64) -> bool {
    offset as f64 > fraction * bcl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_range() {
        let mut out = OutputMapper::new(5.0, true);
        let a = out.apply(Command::Drive { channel: Channel::Secondary, level: 12.0 });
        assert_eq!(a, Actuation { primary: 0.0, secondary: 5.0 });
        assert!(out.saturated());

        let a = out.apply(Command::Drive { channel: Channel::Primary, level: -1.0 });
        assert_eq!(a, Actuation::OFF);
        assert!(!out.saturated());
    }

    #[test]
    fn driving_one_channel_silences_the_other() {
        let mut out = OutputMapper::new(5.0, true);
        out.apply(Command::Drive { channel: Channel::Primary, level: 2.0 });
        let a = out.apply(Command::Drive { channel: Channel::Secondary, level: 1.0 });
        assert_eq!(a.primary, 0.0);
        assert_eq!(a.secondary, 1.0);
    }

    #[test]
    fn hold_repeats_previous_levels() {
        let mut out = OutputMapper::new(5.0, true);
        out.apply(Command::Drive { channel: Channel::Primary, level: 2.5 });
        assert_eq!(out.apply(Command::Hold), Actuation { primary: 2.5, secondary: 0.0 });
        assert_eq!(out.apply(Command::Off), Actuation::OFF);
        assert_eq!(out.apply(Command::Hold), Actuation::OFF);
    }

    #[test]
    fn single_channel_never_drives_secondary() {
        let mut out = OutputMapper::new(5.0, false);
        out.apply(Command::Drive { channel: Channel::Primary, level: 1.0 });
        let a = out.apply(Command::Drive { channel: Channel::Secondary, level: 1.0 });
        assert_eq!(a, Actuation::OFF);
    }

    #[test]
    fn injected_current_keeps_sign_and_echo() {
        let mut out = OutputMapper::new(5.0, false);
        let a = out.apply(Command::Inject { level: -7.5, echo: -62.0 });
        assert_eq!(a, Actuation { primary: -7.5, secondary: -62.0 });
        assert!(!out.saturated());
    }

    #[test]
    fn pulse_does_not_saturate() {
        let mut out = OutputMapper::new(5.0, true);
        let a = out.pulse(Channel::Primary, 8.0);
        assert_eq!(a, Actuation { primary: 5.0, secondary: 0.0 });
        assert!(!out.saturated());
        assert_eq!(out.apply(Command::Hold), a);
    }

    #[test]
    fn cutoff_is_strict() {
        assert!(!cutoff_reached(98, 100.0, 0.98));
        assert!(cutoff_reached(99, 100.0, 0.98));
        assert!(!cutoff_reached(0, 0.0, 0.98));
    }
}

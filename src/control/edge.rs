//! edge.rs
//! Upstroke and falling-edge detection on the Sample History.
//!
//! The slope test compares the newest sample with the one recorded
//! `round(1 / period)` ticks earlier (one millisecond back), so the threshold
//! reads directly in mV/ms regardless of the loop period.

use crate::control::history::RingBuffer;

#[derive(Debug, Clone, Copy)]
pub struct EdgeDetector {
    delay: usize,
    slope_threshold: f64,
}

impl EdgeDetector {
    pub fn new(period_ms: f64, slope_threshold: f64) -> Self {
        Self {
            delay: delay_ticks(period_ms),
            slope_threshold,
        }
    }

    /// Look-back distance in ticks.
    #[inline]
    pub fn delay(&self) -> usize {
        self.delay
    }

    /// `current - delayed`, or `None` while fewer than `delay` ticks have
    /// passed since the history was last reset.
    #[inline]
    pub fn difference(&self, history: &RingBuffer) -> Option<f64> {
        let current = history.get(0)?;
        let delayed = history.get(self.delay)?;
        Some(current - delayed)
    }

    #[inline]
    pub fn is_upstroke(&self, history: &RingBuffer) -> bool {
        self.difference(history)
            .is_some_and(|d| d >= self.slope_threshold)
    }

    #[inline]
    pub fn is_falling(&self, history: &RingBuffer) -> bool {
        self.difference(history).is_some_and(|d| d < 0.0)
    }
}

/// Ticks per millisecond, at least one.
pub fn delay_ticks(period_ms: f64) -> usize {
    (1.0 / period_ms).round().max(1.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_of(values: &[f64]) -> RingBuffer {
        let mut ring = RingBuffer::new(64);
        for &v in values {
            ring.push(v);
        }
        ring
    }

    #[test]
    fn delay_follows_period() {
        assert_eq!(delay_ticks(1.0), 1);
        assert_eq!(delay_ticks(0.1), 10);
        assert_eq!(delay_ticks(0.25), 4);
        assert_eq!(delay_ticks(5.0), 1);
    }

    #[test]
    fn no_detection_before_history_is_long_enough() {
        let det = EdgeDetector::new(0.25, 5.0);
        // Four ticks of look-back needed; a steep ramp of four samples is not enough.
        let mut ring = RingBuffer::new(64);
        for (i, v) in [-80.0, -40.0, 0.0, 40.0].into_iter().enumerate() {
            ring.push(v);
            assert!(!det.is_upstroke(&ring), "tick {i} fired too early");
        }
        ring.push(60.0);
        assert!(det.is_upstroke(&ring));
    }

    #[test]
    fn threshold_is_inclusive() {
        let det = EdgeDetector::new(1.0, 5.0);
        assert!(det.is_upstroke(&history_of(&[-80.0, -75.0])));
        assert!(!det.is_upstroke(&history_of(&[-80.0, -75.5])));
    }

    #[test]
    fn falling_requires_strict_decrease() {
        let det = EdgeDetector::new(1.0, 5.0);
        assert!(det.is_falling(&history_of(&[10.0, 9.9])));
        assert!(!det.is_falling(&history_of(&[10.0, 10.0])));
        assert!(!det.is_falling(&history_of(&[10.0])));
    }
}

//! history.rs
//! Fixed-capacity ring of samples indexed by tick.
//!
//! Backs both the Sample History (raw membrane potential over the last second)
//! and the Error Log (residuals of the current correction cycle). Callers only
//! ever address entries relative to the newest one, so the modulo arithmetic
//! lives here and nowhere else.

#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<f64>,
    written: usize,
}

impl RingBuffer {
    /// Creates a zero-filled ring. A zero capacity is bumped to one slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(1)],
            written: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of entries that hold real data (saturates at capacity).
    #[inline]
    pub fn len(&self) -> usize {
        self.written.min(self.data.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Total pushes since creation or the last `reset`.
    #[inline]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Overwrites the oldest slot with `value`.
    #[inline]
    pub fn push(&mut self, value: f64) {
        let cap = self.data.len();
        self.data[self.written % cap] = value;
        self.written += 1;
    }

    /// Entry written `ago` pushes before the newest one (`0` = newest).
    /// `None` when that entry was never written or has been overwritten.
    #[inline]
    pub fn get(&self, ago: usize) -> Option<f64> {
        if ago >= self.len() {
            return None;
        }
        let cap = self.data.len();
        Some(self.data[(self.written - 1 - ago) % cap])
    }

    /// The newest `last_n` entries, oldest first. Slots that were never
    /// written read as `0.0`, so the window always yields `min(last_n, capacity)`
    /// values.
    pub fn window(&self, last_n: usize) -> impl Iterator<Item = f64> + '_ {
        let n = last_n.min(self.capacity());
        (0..n).rev().map(move |ago| self.get(ago).unwrap_or(0.0))
    }

    /// Forgets all entries and zeroes the storage.
    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0.0);
        self.written = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_relative_to_newest() {
        let mut ring = RingBuffer::new(4);
        for v in [1.0, 2.0, 3.0] {
            ring.push(v);
        }
        assert_eq!(ring.get(0), Some(3.0));
        assert_eq!(ring.get(2), Some(1.0));
        assert_eq!(ring.get(3), None);
    }

    #[test]
    fn wraps_and_keeps_most_recent_capacity() {
        let mut ring = RingBuffer::new(3);
        for v in 0..7 {
            ring.push(v as f64);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.written(), 7);
        let all: Vec<f64> = ring.window(3).collect();
        assert_eq!(all, vec![4.0, 5.0, 6.0]);
        assert_eq!(ring.get(3), None);
    }

    #[test]
    fn window_pads_unwritten_slots_with_zero() {
        let mut ring = RingBuffer::new(8);
        ring.push(5.0);
        ring.push(7.0);
        let w: Vec<f64> = ring.window(4).collect();
        assert_eq!(w, vec![0.0, 0.0, 5.0, 7.0]);
    }

    #[test]
    fn reset_forgets_history() {
        let mut ring = RingBuffer::new(2);
        ring.push(1.0);
        ring.push(2.0);
        ring.reset();
        assert!(ring.is_empty());
        assert_eq!(ring.get(0), None);
        assert!(ring.window(2).all(|v| v == 0.0));
    }
}

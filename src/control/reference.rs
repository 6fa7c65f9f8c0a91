//! reference.rs
//! Externally supplied reference waveform.
//!
//! A plain-text file of real numbers (any whitespace between them) sampled
//! one value per tick, scaled by `gain`, shifted by `offset`, and replayed for
//! a bounded number of correction cycles. It stands in for the learned
//! template; an empty file leaves the controller idle.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use log::{info, warn};

use crate::control::error::ReferenceError;

#[derive(Debug, Clone)]
pub struct FileReference {
    wave: Vec<f64>,
    gain: f64,
    offset: f64,
    loops: u32,
    loops_done: u32,
}

impl FileReference {
    pub fn from_samples(wave: Vec<f64>, gain: f64, offset: f64, loops: u32) -> Self {
        if wave.is_empty() {
            warn!("[Reference] waveform is empty; correction stays idle");
        }
        Self { wave, gain, offset, loops, loops_done: 0 }
    }

    /// Parses every whitespace-separated token as `f64`.
    pub fn from_reader<R: BufRead>(
        reader: R,
        gain: f64,
        offset: f64,
        loops: u32,
    ) -> Result<Self, ReferenceError> {
        let mut wave = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            for token in line.split_whitespace() {
                let value = token.parse::<f64>().map_err(|_| ReferenceError::Parse {
                    line: idx + 1,
                    token: token.to_string(),
                })?;
                wave.push(value);
            }
        }
        Ok(Self::from_samples(wave, gain, offset, loops))
    }

    pub fn load(
        path: impl AsRef<Path>,
        gain: f64,
        offset: f64,
        loops: u32,
    ) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reference = Self::from_reader(BufReader::new(file), gain, offset, loops)?;
        info!("[Reference] loaded {} samples from {}", reference.len(), path.display());
        Ok(reference)
    }

    /// Same samples, new scaling and a fresh loop budget.
    pub fn rescaled(&self, gain: f64, offset: f64, loops: u32) -> Self {
        Self { wave: self.wave.clone(), gain, offset, loops, loops_done: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.wave.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }

    /// Scaled reference at offset `k`, `None` past the end.
    #[inline]
    pub fn value(&self, k: usize) -> Option<f64> {
        self.wave.get(k).map(|v| v * self.gain + self.offset)
    }

    #[inline]
    pub fn loops_done(&self) -> u32 {
        self.loops_done
    }

    /// Loop budget spent (never with `loops == 0`).
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.loops > 0 && self.loops_done >= self.loops
    }

    /// Usable for another correction cycle.
    #[inline]
    pub fn is_ready(&self) -> bool {
        !self.wave.is_empty() && !self.is_exhausted()
    }

    pub fn complete_loop(&mut self) {
        self.loops_done = self.loops_done.saturating_add(1);
    }
}

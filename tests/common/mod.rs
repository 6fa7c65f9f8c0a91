#![allow(dead_code)]

use apqr::control::{Actuation, Controller, Telemetry};

pub const CYCLE_LEN: usize = 100;
/// Offset within [`triangle`] where a 1 ms / 5 mV/ms / −40 mV detector fires.
pub const UPSTROKE_AT: usize = 3;

/// 100-tick cycle sampled at 1 ms: −80 → 20 mV over 5 ticks, then a 1 mV/ms
/// decay. Every sample is an integer, so sums and shifts stay exact.
pub fn triangle(i: usize) -> f64 {
    let i = i % CYCLE_LEN;
    if i <= 5 {
        -80.0 + 20.0 * i as f64
    } else {
        20.0 - (i - 5) as f64
    }
}

pub fn cycles(n: usize) -> Vec<f64> {
    (0..n * CYCLE_LEN).map(triangle).collect()
}

/// Global tick of the `n`-th upstroke (0-based).
pub fn upstroke_tick(n: usize) -> usize {
    n * CYCLE_LEN + UPSTROKE_AT
}

/// Ticks every sample and keeps what the host would see.
pub fn feed(controller: &mut Controller, samples: &[f64]) -> Vec<(Actuation, Telemetry)> {
    samples
        .iter()
        .map(|&v| {
            let out = controller.tick(v);
            (out, controller.telemetry().clone())
        })
        .collect()
}

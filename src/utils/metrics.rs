//! Live metrics and telemetry recording for the tick thread.
//!
//! Two independent paths:
//! - **TelemetryRecorder:** lock-free queue → background CSV export, one row per tick.
//! - **Metrics:** shared mutex buffer for live inspection (bounded to 1000 points per series).

use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use average::{Estimate, Max, Mean, Min};
use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error, info};

use crate::control::Telemetry;

const TELEMETRY_QUEUE_CAPACITY: usize = 16_384;
const EXPORTER_POLL_MS: u64 = 5;
/// Rows written between flushes.
const FLUSH_ROWS: usize = 1_024;

/// Live view of the loop: recent signals and deadline counters.
#[derive(Debug, Default, Clone)]
pub struct Metrics {
    /// Membrane potential and reference (last 1000 ticks)
    pub vm: VecDeque<f64>,
    pub reference: VecDeque<f64>,
    pub residual: VecDeque<f64>,

    /// Channel outputs (last 1000 ticks)
    pub primary: VecDeque<f64>,
    pub secondary: VecDeque<f64>,

    /// Tick execution time and release jitter (microseconds)
    pub exec_us: VecDeque<u64>,
    pub jitter_us: VecDeque<u64>,

    /// Releases that woke up after their deadline
    pub deadline_miss: u64,
    pub total_ticks: u64,
    pub correction_cycles: u64,
    pub rejected_reconfigs: u64,
}

impl Metrics {
    /// Appends one tick's telemetry to the live buffers.
    pub fn record_tick(&mut self, t: &Telemetry) {
        push_capped(&mut self.vm, t.sample);
        if let (Some(reference), Some(residual)) = (t.reference, t.residual) {
            push_capped(&mut self.reference, reference);
            push_capped(&mut self.residual, residual);
        }
        push_capped(&mut self.primary, t.primary);
        push_capped(&mut self.secondary, t.secondary);
        self.total_ticks += 1;
    }

    pub fn record_deadline_miss(&mut self) {
        self.deadline_miss += 1;
    }

    /// Share of ticks released late, in percent.
    pub fn miss_rate(&self) -> f64 {
        if self.total_ticks == 0 {
            return 0.0;
        }
        self.deadline_miss as f64 / self.total_ticks as f64 * 100.0
    }
}

pub type SharedMetrics = Arc<Mutex<Metrics>>;

pub const MAX_POINTS: usize = 1_000;

/// Appends value to metrics buffer; removes oldest if at capacity (FIFO).
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Appends u64 value to metrics buffer; removes oldest if at capacity.
#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Statistics summary for a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: u64,
}

/// Min, max and mean of a buffer; `None` when empty.
pub fn summarize(data: impl IntoIterator<Item = f64>) -> Option<Stats> {
    let (mut min, mut max, mut mean) = (Min::new(), Max::new(), Mean::new());
    for x in data {
        min.add(x);
        max.add(x);
        mean.add(x);
    }
    if mean.is_empty() {
        return None;
    }
    Some(Stats { min: min.min(), max: max.max(), mean: mean.mean(), count: mean.len() })
}

/// Non-blocking per-tick telemetry sink with background CSV export.
///
/// `record()` never blocks the tick thread: a full queue drops the row and
/// counts it. The exporter drains the queue until `finish()` is called and
/// nothing is left.
#[derive(Clone)]
pub struct TelemetryRecorder {
    queue: Arc<ArrayQueue<Telemetry>>,
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    exporter: Arc<parking_lot::Mutex<Option<JoinHandle<bool>>>>,
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(TELEMETRY_QUEUE_CAPACITY)),
            closed: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            exporter: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    #[inline]
    pub fn record(&self, telemetry: Telemetry) {
        if self.queue.push(telemetry).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Rows lost to a full queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawns the thread draining the queue into `output_csv`.
    pub fn start_exporter(&self, output_csv: PathBuf) {
        let queue = self.queue.clone();
        let closed = self.closed.clone();

        let handle = thread::spawn(move || {
            let mut wtr = match Writer::from_path(&output_csv) {
                Ok(w) => w,
                Err(e) => {
                    error!("Failed to create telemetry CSV {}: {}", output_csv.display(), e);
                    return false;
                }
            };

            let mut rows = 0usize;
            let mut clean = true;
            loop {
                match queue.pop() {
                    Some(t) => {
                        if let Err(e) = wtr.serialize(&t) {
                            error!("Telemetry row dropped: {}", e);
                            clean = false;
                        }
                        rows += 1;
                        if rows % FLUSH_ROWS == 0 {
                            if let Err(e) = wtr.flush() {
                                error!("Telemetry flush failed: {}", e);
                                clean = false;
                            }
                        }
                    }
                    None if closed.load(Ordering::Acquire) => break,
                    None => thread::sleep(Duration::from_millis(EXPORTER_POLL_MS)),
                }
            }

            match wtr.flush() {
                Ok(()) => info!("Telemetry exported to {} ({} rows)", output_csv.display(), rows),
                Err(e) => {
                    error!("Telemetry flush to {} failed: {}", output_csv.display(), e);
                    clean = false;
                }
            }
            clean
        });

        *self.exporter.lock() = Some(handle);
    }

    /// Marks the stream complete and waits for the exporter to drain it.
    /// Returns `false` if any row failed to reach the file.
    pub fn finish(&self) -> bool {
        self.closed.store(true, Ordering::Release);
        let clean = match self.exporter.lock().take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                error!("Telemetry exporter panicked");
                false
            }),
            None => true,
        };
        debug!("Telemetry recorder closed, {} rows dropped", self.dropped());
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControllerState;

    #[test]
    fn capped_buffers_keep_newest() {
        let mut buf = VecDeque::new();
        for i in 0..(MAX_POINTS + 10) {
            push_capped(&mut buf, i as f64);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(buf.front().copied(), Some(10.0));
    }

    #[test]
    fn summary_of_buffer() {
        let s = summarize([2.0, -1.0, 5.0]).expect("non-empty");
        assert_eq!(s.min, -1.0);
        assert_eq!(s.max, 5.0);
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.count, 3);
        assert!(summarize(std::iter::empty::<f64>()).is_none());
    }

    #[test]
    fn residual_only_buffered_while_correcting() {
        let mut m = Metrics::default();
        m.record_tick(&Telemetry { sample: -80.0, ..Default::default() });
        m.record_tick(&Telemetry {
            sample: -70.0,
            state: ControllerState::Correcting,
            reference: Some(-72.0),
            residual: Some(2.0),
            ..Default::default()
        });
        assert_eq!(m.vm.len(), 2);
        assert_eq!(m.residual, VecDeque::from([2.0]));
        assert_eq!(m.total_ticks, 2);
    }

    #[test]
    fn exporter_writes_every_recorded_row() {
        let path = std::env::temp_dir().join(format!("apqr_telemetry_{}.csv", std::process::id()));
        let recorder = TelemetryRecorder::new();
        for tick in 0..3 {
            recorder.record(Telemetry { tick, ..Default::default() });
        }
        recorder.start_exporter(path.clone());
        assert!(recorder.finish());

        let text = std::fs::read_to_string(&path).expect("csv written");
        let _ = std::fs::remove_file(&path);
        let mut lines = text.lines();
        assert!(lines.next().is_some_and(|h| h.starts_with("tick,state,offset")));
        assert_eq!(lines.count(), 3);
        assert_eq!(recorder.dropped(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn exporter_reports_failed_flush() {
        let recorder = TelemetryRecorder::new();
        recorder.record(Telemetry { state: ControllerState::Correcting, ..Default::default() });
        recorder.start_exporter(PathBuf::from("/dev/full"));
        assert!(!recorder.finish());
    }
}

//! runner.rs
//! Fixed-period host loop around the controller.
//!
//! Each release reads the cell, runs one control tick and applies the result
//! to the cell on the next release, the way an acquisition card would. Commands
//! from the operator are drained between ticks only, so a tick never sees a
//! half-applied reconfiguration.

use std::{
    io,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, Sender, TryRecvError, bounded};
use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::{
    control::{Actuation, ControlParams, Controller, ControllerState},
    rig::cell::{CellModel, CellParams},
    utils::{
        export::{CycleAccumulator, CycleSummary},
        metrics::{SharedMetrics, TelemetryRecorder, push_capped_u64},
    },
};

const COMMAND_CAPACITY: usize = 16;

/// Operator requests, applied before the next tick.
#[derive(Debug)]
pub enum RigCommand {
    Reconfigure(Box<ControlParams>),
    Pause,
    Stop,
}

#[derive(Debug, Clone)]
pub struct RigConfig {
    pub period_ms: f64,
    pub duration: Duration,
    /// Sleep until each release; `false` runs as fast as possible.
    pub realtime: bool,
    /// Pin the tick thread to this core.
    pub core: Option<usize>,
    pub cell: CellParams,
}

impl RigConfig {
    pub fn total_ticks(&self) -> u64 {
        (self.duration.as_secs_f64() * 1000.0 / self.period_ms).round() as u64
    }
}

/// Outcome of one rig run.
#[derive(Debug, Clone)]
pub struct RigReport {
    pub ticks: u64,
    pub deadline_misses: u64,
    pub cycles: Vec<CycleSummary>,
    pub final_state: ControllerState,
    pub stopped_early: bool,
}

/// Runs the loop on the calling thread until the duration elapses or `Stop`
/// arrives.
pub fn run_rig(
    mut controller: Controller,
    config: &RigConfig,
    commands: &Receiver<RigCommand>,
    metrics: &SharedMetrics,
    recorder: Option<&TelemetryRecorder>,
) -> RigReport {
    let period_ms = controller.period_ms();
    let period = Duration::from_secs_f64(period_ms / 1000.0);
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let mut cell = CellModel::new(config.cell.clone(), period_ms);

    let total = config.total_ticks();
    let mut drive = Actuation::OFF;
    let mut cycle: Option<CycleAccumulator> = None;
    let mut cycles_seen = 0u32;
    let mut report = RigReport {
        ticks: 0,
        deadline_misses: 0,
        cycles: Vec::new(),
        final_state: controller.state(),
        stopped_early: false,
    };

    info!(
        "[Rig] {} ticks at {} ms, strategy {}",
        total,
        period_ms,
        controller.strategy_name()
    );

    let mut next_deadline = Instant::now() + period;
    let mut last_release = Instant::now();

    while report.ticks < total {
        // ====================================================================
        // Between ticks: operator commands
        // ====================================================================
        loop {
            match commands.try_recv() {
                Ok(RigCommand::Reconfigure(params)) => {
                    match controller.reconfigure(*params, period_ms) {
                        Ok(next) => {
                            controller = next;
                            cycle = None;
                            drive = Actuation::OFF;
                        }
                        Err(e) => {
                            warn!("[Rig] reconfiguration rejected: {}", e);
                            lock(metrics).rejected_reconfigs += 1;
                        }
                    }
                }
                Ok(RigCommand::Pause) => {
                    drive = controller.pause();
                    cycle = None;
                }
                Ok(RigCommand::Stop) => {
                    report.stopped_early = true;
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if report.stopped_early {
            break;
        }

        // ====================================================================
        // Periodic release
        // ====================================================================
        if config.realtime {
            let now = Instant::now();
            if now < next_deadline {
                sleeper.sleep(next_deadline - now);
            } else {
                report.deadline_misses += 1;
                lock(metrics).record_deadline_miss();
            }
        }
        let release = Instant::now();
        let jitter_us = (release.duration_since(last_release).as_micros() as u64)
            .abs_diff(period.as_micros() as u64);
        last_release = release;

        // ====================================================================
        // Control tick
        // ====================================================================
        // A reference monitor output is not wired to the cell.
        let applied = if controller.params().strategy.echoes_reference() {
            Actuation { secondary: 0.0, ..drive }
        } else {
            drive
        };
        let vm = cell.step(applied);
        let before = controller.state();
        drive = controller.tick(vm);
        let exec_us = release.elapsed().as_micros() as u64;
        let telemetry = controller.telemetry();

        if telemetry.state == ControllerState::Correcting && before != ControllerState::Correcting {
            cycles_seen += 1;
            cycle = Some(CycleAccumulator::new(cycles_seen, telemetry.tick));
        }
        if let (Some(acc), Some(e)) = (cycle.as_mut(), telemetry.residual) {
            acc.add(e);
        }
        if telemetry.state != ControllerState::Correcting {
            if let Some(summary) = cycle
                .take()
                .and_then(|acc| acc.finish(controller.strategy_name(), period_ms))
            {
                debug!(
                    "[Rig] cycle {} rms {:.3} mV, max {:.3} mV",
                    summary.cycle, summary.rms_residual, summary.max_abs_residual
                );
                report.cycles.push(summary);
                lock(metrics).correction_cycles += 1;
            }
        }

        {
            let mut m = lock(metrics);
            m.record_tick(telemetry);
            push_capped_u64(&mut m.exec_us, exec_us);
            if config.realtime {
                push_capped_u64(&mut m.jitter_us, jitter_us);
            }
        }
        if let Some(r) = recorder {
            r.record(telemetry.clone());
        }

        next_deadline += period;
        report.ticks += 1;
    }

    report.final_state = controller.state();
    info!(
        "[Rig] finished: {} ticks, {} correction cycles, {} deadline misses",
        report.ticks,
        report.cycles.len(),
        report.deadline_misses
    );
    report
}

/// Starts [`run_rig`] on a dedicated max-priority thread, optionally pinned.
/// Returns the command sender and the handle yielding the report.
pub fn spawn_rig(
    controller: Controller,
    config: RigConfig,
    metrics: SharedMetrics,
    recorder: Option<TelemetryRecorder>,
) -> io::Result<(Sender<RigCommand>, JoinHandle<RigReport>)> {
    let (tx, rx) = bounded(COMMAND_CAPACITY);

    let handle = thread::Builder::new()
        .name("apqr-tick".into())
        .spawn_with_priority(ThreadPriority::Max, move |priority| {
            if let Err(e) = priority {
                warn!("[Rig] running at default priority: {:?}", e);
            }
            if let Some(core) = config.core {
                pin_to_core(core);
            }
            run_rig(controller, &config, &rx, &metrics, recorder.as_ref())
        })?;

    Ok((tx, handle))
}

fn pin_to_core(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    if let Some(core_id) = core_ids.get(core) {
        if core_affinity::set_for_current(*core_id) {
            info!("[Rig] tick thread pinned to core {}", core);
        } else {
            error!("Failed to pin tick thread to core {}", core);
        }
    } else {
        error!("Core {} not found among available system cores", core);
    }
}

fn lock(metrics: &SharedMetrics) -> std::sync::MutexGuard<'_, crate::utils::metrics::Metrics> {
    match metrics.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

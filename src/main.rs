//! # APqr entry point
//! Runs the closed-loop controller against a synthetic cell at a fixed period.
//!
//! ## Modes
//! - **Fixed gain:** single light, `u = C/R * e`. Current clamp through a
//!   parameter file (`"current_clamp": true`).
//! - **Adaptive resistance:** blue/red light, resistances tuned per tick.
//! - **PID:** blue/red light, least-squares derivative, hysteresis on output.
//! - **PID + file reference:** target waveform read from a text file.
//! - **Parameter file:** everything from a JSON file (`$APQR_PARAMS` or prompted).
//! - **Switch:** adaptive resistance, reconfigured to PID halfway through.
//!
//! ## Outputs
//! - `data/apqr_summary.csv`: per correction cycle RMS / max residual (appended).
//! - `data/apqr_telemetry_<strategy>.csv`: one row per tick.

use std::{
    env,
    fs::create_dir_all,
    io::{Write, stdin, stdout},
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use log::{error, info, warn};

use apqr::{
    control::{
        ControlParams, Controller, StrategyParams,
        config::{AdaptiveParams, FixedGainParams, PidParams, ReferenceParams},
    },
    rig::{CellParams, RigCommand, RigConfig, RigReport, spawn_rig},
    utils::{
        export::{SUMMARY_CSV, export_summary_csv},
        metrics::{Metrics, SharedMetrics, TelemetryRecorder, summarize},
    },
};

const DEFAULT_PERIOD_MS: f64 = 1.0;
const DEFAULT_DURATION_SECS: u64 = 10;
const DEFAULT_REFERENCE_FILE: &str = "data/reference.txt";

fn main() {
    env_logger::init();
    info!("=== APQR START ===");

    loop {
        let choice = prompt_menu();
        let params = match choice.as_str() {
            "1" => ControlParams {
                strategy: StrategyParams::FixedGain(FixedGainParams::default()),
                ..Default::default()
            },
            "2" | "" => ControlParams {
                strategy: StrategyParams::AdaptiveResistance(AdaptiveParams::default()),
                ..Default::default()
            },
            "3" => ControlParams {
                strategy: StrategyParams::Pid(PidParams::default()),
                ..Default::default()
            },
            "4" => ControlParams {
                strategy: StrategyParams::Pid(PidParams::default()),
                reference: ReferenceParams::File {
                    path: prompt_path("Reference waveform file", DEFAULT_REFERENCE_FILE),
                    gain: 1.0,
                    offset: 0.0,
                    loops: 100,
                },
                ..Default::default()
            },
            "5" => {
                let path = env::var("APQR_PARAMS")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| prompt_path("Parameter file (JSON)", "apqr.json"));
                match ControlParams::from_json_file(&path) {
                    Ok(p) => p,
                    Err(e) => {
                        error!("Cannot use {}: {}", path.display(), e);
                        continue;
                    }
                }
            }
            "6" => {
                run_switch_demo();
                continue;
            }
            "7" => {
                println!("Exiting. Goodbye!");
                info!("=== APQR FINISHED ===");
                return;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
                continue;
            }
        };

        let rig = prompt_rig_config();
        run_once(params, rig, None);
        println!("\n Run completed. Returning to menu...\n");
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     SELECT CORRECTION STRATEGY              │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Fixed gain (single light)               │");
    println!("│  2) Adaptive resistance (blue/red light)    │");
    println!("│  3) PID (blue/red light)                    │");
    println!("│  4) PID against a reference file            │");
    println!("│  5) Parameter file (JSON)                   │");
    println!("│  6) Adaptive, switched to PID halfway       │");
    println!("│  7) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1-7] (default: 2): ");
    let _ = stdout().flush();

    read_line()
}

fn read_line() -> String {
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

fn prompt_path(what: &str, default: &str) -> PathBuf {
    print!("{} [default: {}]: ", what, default);
    let _ = stdout().flush();
    let input = read_line();
    if input.is_empty() { PathBuf::from(default) } else { PathBuf::from(input) }
}

fn prompt_rig_config() -> RigConfig {
    print!("Loop period in ms [default: {}]: ", DEFAULT_PERIOD_MS);
    let _ = stdout().flush();
    let period_ms = read_line().parse::<f64>().unwrap_or(DEFAULT_PERIOD_MS);

    print!("Run duration in seconds [default: {}]: ", DEFAULT_DURATION_SECS);
    let _ = stdout().flush();
    let secs = read_line().parse::<u64>().unwrap_or(DEFAULT_DURATION_SECS);

    print!("Pin tick thread to core [default: none]: ");
    let _ = stdout().flush();
    let core = read_line().parse::<usize>().ok();

    RigConfig {
        period_ms,
        duration: Duration::from_secs(secs),
        realtime: true,
        core,
        cell: CellParams::default(),
    }
}

/// Adaptive resistance until the reference is learned and a few cycles are
/// corrected, then PID for the rest of the run.
fn run_switch_demo() {
    let rig = prompt_rig_config();
    let adaptive = ControlParams::default();
    let pid = ControlParams {
        strategy: StrategyParams::Pid(PidParams::default()),
        ..Default::default()
    };
    let switch_after = rig.duration / 2;
    run_once(adaptive, rig, Some((switch_after, pid)));
}

/// One rig run with reporting. `switch` sends a reconfiguration after the
/// given delay.
fn run_once(params: ControlParams, rig: RigConfig, switch: Option<(Duration, ControlParams)>) {
    let controller = match Controller::new(params, rig.period_ms) {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    let strategy = controller.strategy_name();
    let period_ms = rig.period_ms;

    if let Err(e) = create_dir_all("data") {
        error!("Failed to create data directory: {}", e);
    }
    let metrics: SharedMetrics = Arc::new(Mutex::new(Metrics::default()));
    let recorder = TelemetryRecorder::new();
    recorder.start_exporter(PathBuf::from(format!("data/apqr_telemetry_{}.csv", strategy)));

    println!(
        "Running {} for {:?} at {} ms (RUST_LOG=debug for per-cycle detail)...",
        strategy, rig.duration, period_ms
    );
    let (tx, handle) = match spawn_rig(controller, rig, metrics.clone(), Some(recorder.clone())) {
        Ok(pair) => pair,
        Err(e) => {
            error!("Failed to start tick thread: {}", e);
            recorder.finish();
            return;
        }
    };

    if let Some((delay, next)) = switch {
        thread::sleep(delay);
        info!("Switching to {}", next.strategy.name());
        if tx.send(RigCommand::Reconfigure(Box::new(next))).is_err() {
            warn!("Rig already finished, switch not applied");
        }
    }

    let report = match handle.join() {
        Ok(report) => report,
        Err(_) => {
            error!("Tick thread panicked");
            recorder.finish();
            return;
        }
    };
    if !recorder.finish() {
        warn!("Telemetry CSV for {} is incomplete", strategy);
    }

    print_report(&report, &metrics, period_ms);
    if let Err(e) = export_summary_csv(SUMMARY_CSV, &report.cycles) {
        error!("Failed to export summary: {}", e);
    }
}

fn print_report(report: &RigReport, metrics: &SharedMetrics, period_ms: f64) {
    let m = match metrics.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    println!("\n── Run summary ─────────────────────────────────");
    println!("ticks              {}", report.ticks);
    println!("final state        {:?}", report.final_state);
    println!("correction cycles  {}", report.cycles.len());
    println!("deadline misses    {} ({:.3}%)", m.deadline_miss, m.miss_rate());
    if let Some(s) = summarize(report.cycles.iter().map(|c| c.rms_residual)) {
        println!("rms residual       mean {:.3} mV, best {:.3}, worst {:.3}", s.mean, s.min, s.max);
    }
    if let Some(s) = summarize(m.exec_us.iter().map(|&us| us as f64)) {
        println!(
            "tick time          mean {:.1} µs, max {:.1} µs (period {} µs)",
            s.mean,
            s.max,
            period_ms * 1000.0
        );
    }
    if let Some(s) = summarize(m.jitter_us.iter().map(|&us| us as f64)) {
        println!("release jitter     mean {:.1} µs, max {:.1} µs", s.mean, s.max);
    }
}

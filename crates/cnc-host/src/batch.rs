//! Batch G-code processor.
//!
//! A CLI subcommand that runs a G-code file through the same scheduler,
//! parser and motion pipeline as interactive mode, driving the DDA on the
//! virtual clock to completion, then reports the per-line statuses and the
//! resulting motor step totals. Useful for testing and analysis without a
//! machine attached.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use motion::{Config, AXES, MOTORS};
use serde::Serialize;
use tracing::info;

use crate::lineio::{DeviceSet, Signals};
use crate::sched::{Controller, TraceRecord};
use crate::settings;

/// Arguments for the `batch` subcommand.
#[derive(Parser, Debug)]
pub struct BatchArgs {
    /// Path to the G-code file to process.
    #[arg(required = true)]
    pub gcode_file: PathBuf,

    /// Optional INI profile overlaying the compiled default settings.
    #[arg(short, long)]
    pub config_path: Option<PathBuf>,

    /// Emit the trace as JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Everything the batch run produced.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub lines: Vec<TraceRecord>,
    pub final_position: [f64; AXES],
    pub motor_net_steps: [i64; MOTORS],
    pub step_pulses: u64,
}

/// Run a file to completion and build the report.
pub fn process_file(args: &BatchArgs) -> Result<BatchReport> {
    let mut cfg = Config::default();
    if let Some(path) = &args.config_path {
        settings::load_profile(path, &mut cfg)
            .with_context(|| format!("failed to load profile {:?}", path))?;
    }

    let text = std::fs::read_to_string(&args.gcode_file)
        .with_context(|| format!("failed to open G-code file {:?}", args.gcode_file))?;

    let mut devices = DeviceSet::headless();
    devices.use_program(&text);
    let mut ctrl = Controller::new(cfg, devices, Arc::new(Signals::default()));
    ctrl.quit_on_eof = true;
    ctrl.record_trace = true;
    ctrl.run();

    Ok(BatchReport {
        lines: std::mem::take(&mut ctrl.trace),
        final_position: ctrl.planner.position(),
        motor_net_steps: ctrl.recorder.net,
        step_pulses: ctrl.recorder.pulses,
    })
}

/// Entry point for `cnc-host batch`.
pub fn run_batch(args: BatchArgs) -> Result<()> {
    info!(file = ?args.gcode_file, "batch processing");
    let report = process_file(&args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for record in &report.lines {
        println!("[L{:3}] {:<40} {}", record.line, record.block, record.status);
    }
    println!();
    println!("final position: {:?}", report.final_position);
    println!("motor steps:    {:?}", report.motor_net_steps);
    println!("step pulses:    {}", report.step_pulses);
    Ok(())
}

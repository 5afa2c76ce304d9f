//! # CNC Host
//!
//! A G-code-driven CNC motion controller core: RS-274/NGC blocks come in
//! over a line interface, the trajectory planner turns them into
//! jerk-limited sub-moves, the segment generator slices those into
//! constant-time motor segments, and a timer-style DDA emits step pulses.
//!
//! ## Structure
//!
//! Everything runs in one cooperative superloop (no async runtime, no
//! preemption): a fixed priority list of continuations covering signals,
//! the segment generator, machine cycles, the prompt, and the command
//! reader. The only extra thread is the stdin reader, which traps control
//! characters into signal flags.
//!
//! `run` starts the interactive controller; `batch` processes a G-code
//! file offline and prints the resulting step trace.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use motion::Config;
use tracing::info;

mod batch;
mod canon;
mod direct;
mod dispatch;
mod gcode;
mod homing;
mod lineio;
mod sched;
mod settings;

use lineio::{DeviceSet, Signals};
use sched::Controller;

/// A G-code CNC motion controller core.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the interactive controller on stdin/stdout.
    Run(RunArgs),
    /// Process a G-code file in a batch and print the resulting step trace.
    Batch(batch::BatchArgs),
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
struct RunArgs {
    /// Optional INI profile overlaying the compiled default settings.
    #[arg(short, long)]
    config_path: Option<PathBuf>,

    /// Suppress the interactive prompt.
    #[arg(long)]
    no_prompt: bool,
}

fn main() -> Result<()> {
    // Initialize the logging subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_interactive(args),
        Commands::Batch(args) => batch::run_batch(args),
    }
}

fn run_interactive(args: RunArgs) -> Result<()> {
    info!("starting controller");

    let mut cfg = Config::default();
    if let Some(path) = &args.config_path {
        settings::load_profile(path, &mut cfg)?;
        info!(?path, "profile applied");
    }

    let signals = Arc::new(Signals::default());
    let rx = lineio::spawn_stdin_reader(signals.clone());
    let mut devices = DeviceSet::interactive(rx);
    if args.no_prompt {
        devices.set_prompt_capable(false);
    }

    let mut controller = Controller::new(cfg, devices, signals);
    controller.quit_on_eof = true;
    controller.run();

    info!("controller exited");
    Ok(())
}

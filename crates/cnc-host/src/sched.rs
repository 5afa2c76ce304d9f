//! Cooperative scheduler.
//!
//! A single superloop runs a fixed priority list of continuations each
//! pass. Every continuation runs to a natural yield point and returns a
//! [`Status`]: `Ok` falls through to the next entry, `Noop` means idle,
//! and `Again` aborts the rest of the pass so the list restarts from the
//! top. The ordering is a backpressure hierarchy: a full planner ring
//! blocks the command reader but never the segment generator; a full motor
//! segment queue parks the generator and blocks the reader transitively.
//!
//! Hardware timers are external; the DDA runs on a virtual clock, a
//! bounded batch of ticks at the top of each pass.

use std::sync::Arc;

use motion::buffer::BUFFERS_NEEDED;
use motion::stepper::SegmentQueue;
use motion::{Config, Dda, Planner, Status, StepRecorder, AXES, MOTORS};
use serde::Serialize;
use tracing::{info, warn};

use crate::canon::{CanonicalMachine, ProgramFlow};
use crate::homing::HomingCycle;
use crate::lineio::{DeviceSet, Limits, Signals};
use crate::settings::{self, MemoryStore};

/// What the top dispatcher does with incoming lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Gcode,
    Direct,
}

/// One processed line, for batch reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub line: usize,
    pub block: String,
    pub status: String,
}

/// The whole machine state, threaded through the scheduler explicitly.
pub struct Controller {
    pub cfg: Config,
    pub store: MemoryStore,
    pub cm: CanonicalMachine,
    pub planner: Planner,
    pub queue: SegmentQueue,
    pub dda: Dda,
    pub recorder: StepRecorder,
    pub signals: Arc<Signals>,
    pub limits: Limits,
    pub homing: HomingCycle,
    pub devices: DeviceSet,
    pub mode: InputMode,
    /// DDA ticks granted per scheduler pass.
    pub ticks_per_pass: u32,
    /// Exit the superloop when the default device reaches end of input.
    pub quit_on_eof: bool,
    pub record_trace: bool,
    pub trace: Vec<TraceRecord>,
    lines_seen: usize,
    pending_model_reset: bool,
}

impl Controller {
    pub fn new(mut cfg: Config, devices: DeviceSet, signals: Arc<Signals>) -> Self {
        let mut store = MemoryStore::default();
        settings::load_or_init(&mut cfg, &mut store);

        let cm = CanonicalMachine::new(&cfg);
        let mut dda = Dda::new();
        dda.set_polarity(motor_polarities(&cfg));
        let mut homing = HomingCycle::new();
        if cfg.m.homing_on_startup {
            homing.start();
        }
        let mut planner = Planner::new();
        planner.set_path_control(cfg.m.gcode_path_control);

        Controller {
            cfg,
            store,
            cm,
            planner,
            queue: SegmentQueue::new(),
            dda,
            recorder: StepRecorder::new(),
            signals,
            limits: Limits::default(),
            homing,
            devices,
            mode: InputMode::Gcode,
            ticks_per_pass: 10_000,
            quit_on_eof: false,
            record_trace: false,
            trace: Vec::new(),
            lines_seen: 0,
            pending_model_reset: false,
        }
    }

    /// Run the superloop until quit.
    pub fn run(&mut self) -> Status {
        loop {
            match self.dispatch_cycle() {
                Status::Again => continue,
                Status::Quit | Status::Eof => return Status::Ok,
                Status::Noop => {
                    // Everything idle: this is the only place the loop may
                    // wait.
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                _ => {}
            }
        }
    }

    /// One pass over the continuation priority list.
    pub fn dispatch_cycle(&mut self) -> Status {
        self.run_dda_batch();

        let mut all_noop = true;
        macro_rules! step {
            ($call:expr) => {
                match $call {
                    Status::Again => return Status::Again,
                    Status::Quit => return Status::Quit,
                    Status::Noop => {}
                    _ => all_noop = false,
                }
            };
        }

        step!(self.limit_handler());
        step!(self.kill_handler());
        step!(self.pause_handler());
        step!(self.resume_handler());
        step!(self.move_dispatcher());
        step!(self.cycle_handler());
        step!(self.prompt_handler());
        step!(self.reader_handler());

        if all_noop {
            Status::Noop
        } else {
            Status::Ok
        }
    }

    /// Virtual timer interrupt: grant the DDA a bounded batch of ticks.
    fn run_dda_batch(&mut self) {
        self.dda.request_load(&mut self.queue);
        for _ in 0..self.ticks_per_pass {
            if !self.dda.tick(&mut self.queue, &mut self.recorder) {
                break;
            }
        }
        if self.dda.take_end_event() {
            info!("program end");
            self.devices.reset_to_default();
            self.cm.reset(&self.cfg);
            self.planner.set_path_control(self.cfg.m.gcode_path_control);
        }
    }

    /// True when no motion is queued or running anywhere in the pipeline.
    pub fn machine_idle(&self) -> bool {
        !self.planner.is_busy() && self.queue.is_empty() && self.dda.is_idle()
    }

    // --- Continuations, in priority order ---

    fn limit_handler(&mut self) -> Status {
        if !self.limits.any_thrown() {
            return Status::Noop;
        }
        if self.homing.is_active() {
            // The homing continuation consumes the switch itself.
            return Status::Noop;
        }
        warn!("limit switch thrown: emergency stop");
        self.emergency_stop();
        self.limits.clear_all();
        Status::Ok
    }

    fn kill_handler(&mut self) -> Status {
        if !self.signals.take_kill() {
            return Status::Noop;
        }
        warn!("kill signal");
        self.emergency_stop();
        Status::Ok
    }

    fn pause_handler(&mut self) -> Status {
        if !self.signals.take_pause() {
            return Status::Noop;
        }
        info!("motion paused");
        self.dda.hold();
        Status::Ok
    }

    fn resume_handler(&mut self) -> Status {
        if !self.signals.take_resume() {
            return Status::Noop;
        }
        info!("motion resumed");
        self.dda.release();
        if self.cm.gm.program_flow == ProgramFlow::Stop {
            self.cm.program_resume(&mut self.planner);
        }
        self.dda.request_load(&mut self.queue);
        Status::Ok
    }

    fn move_dispatcher(&mut self) -> Status {
        let status = self.planner.run_move(&self.cfg, &mut self.queue);
        if status == Status::Ok {
            self.dda.request_load(&mut self.queue);
        }
        status
    }

    fn cycle_handler(&mut self) -> Status {
        let status = self.homing.poll(
            &self.cfg,
            &mut self.cm,
            &mut self.planner,
            &mut self.queue,
            &mut self.dda,
            &self.limits,
        );
        match status {
            Status::Complete => Status::Ok,
            other => other,
        }
    }

    fn prompt_handler(&mut self) -> Status {
        if !self.devices.prompt_capable() || self.devices.prompted {
            return Status::Noop;
        }
        let mode = match self.mode {
            InputMode::Gcode => "gcode",
            InputMode::Direct => "direct",
        };
        let units = if self.cm.gm.inches_mode { "inch" } else { "mm" };
        eprint!("cnc {mode}[{units}] ok> ");
        self.devices.prompted = true;
        Status::Ok
    }

    fn reader_handler(&mut self) -> Status {
        // Backpressure: a worst-case line queues BUFFERS_NEEDED sub-moves.
        if !self.planner.buffers_free(BUFFERS_NEEDED) {
            return Status::Again;
        }
        let mut line = String::new();
        match self.devices.gets(&mut line) {
            Status::Ok => {
                self.devices.prompted = false;
                if self.pending_model_reset {
                    self.cm.reset(&self.cfg);
                    self.planner.set_path_control(self.cfg.m.gcode_path_control);
                    self.pending_model_reset = false;
                }
                self.lines_seen += 1;
                let status = self.dispatch_line(&line);
                if status.is_error() {
                    eprintln!("error: {} ({})", status.message(), line.trim());
                }
                if self.record_trace {
                    self.trace.push(TraceRecord {
                        line: self.lines_seen,
                        block: line.trim().to_string(),
                        status: status.message().to_string(),
                    });
                }
                match status {
                    // Signal lines act on the next pass, from the top.
                    Status::Again => Status::Again,
                    _ => Status::Ok,
                }
            }
            Status::Again => Status::Noop,
            Status::Eof => {
                if self.quit_on_eof && self.machine_idle() {
                    Status::Quit
                } else {
                    // Keep pumping until queued motion finishes.
                    Status::Noop
                }
            }
            other => other,
        }
    }

    // --- Shared actions ---

    /// Kill path: drain the motor queue, disarm timers, discard planner
    /// buffers, return input to the default device, reset the canonical
    /// model on the next parsed line.
    pub fn emergency_stop(&mut self) {
        self.dda.flush(&mut self.queue);
        self.planner.flush();
        if self.homing.is_active() {
            self.homing.abort(&mut self.cm);
        }
        let position = self.planner.position();
        self.cm.set_position(&mut self.planner, position);
        self.devices.reset_to_default();
        self.mode = InputMode::Gcode;
        self.pending_model_reset = true;
    }

    /// Application restart: stop motion, re-apply the settings store, reset
    /// the canonical model, optionally start homing.
    pub fn restart(&mut self) {
        info!("restart");
        self.dda.flush(&mut self.queue);
        self.planner.flush();
        settings::load_or_init(&mut self.cfg, &mut self.store);
        self.dda.set_polarity(motor_polarities(&self.cfg));
        self.cm = CanonicalMachine::new(&self.cfg);
        self.planner.set_position([0.0; AXES]);
        self.planner.set_path_control(self.cfg.m.gcode_path_control);
        self.mode = InputMode::Gcode;
        if self.cfg.m.homing_on_startup {
            self.homing.start();
        }
    }

    /// Re-sync DDA-side settings after a `$` write.
    pub fn apply_settings_side_effects(&mut self) {
        self.dda.set_polarity(motor_polarities(&self.cfg));
    }
}

fn motor_polarities(cfg: &Config) -> [u8; MOTORS] {
    let mut polarity = [0u8; MOTORS];
    for (m, p) in polarity.iter_mut().enumerate() {
        *p = cfg.a[m].polarity;
    }
    polarity
}

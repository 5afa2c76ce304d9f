//! Top-level line dispatcher.
//!
//! Routes each incoming line by its leading character: signals (`!`, `@`,
//! `%`), settings (`$`), mode and utility commands (`D`, `H`, `R`, `T`,
//! `U`), and everything else to the active parser. `%` doubles as the
//! G-code block delimiter; the dispatcher claims it for resume, and program
//! sources strip delimiter lines when loaded instead.

use motion::Status;
use tracing::info;

use crate::direct;
use crate::gcode;
use crate::sched::{Controller, InputMode};
use crate::settings;

/// Canned demo program: a 10 mm square in continuous path mode.
pub const DEMO_SQUARE: &str = "\
G17 G21 G90 G64 F600
G0 X0 Y0
G1 X10
G1 Y10
G1 X0
G1 Y0
M2
";

/// Canned demo program: traverse, quarter-circle arc, return.
pub const DEMO_ARC: &str = "\
G17 G21 G90 F400
G0 X10 Y0
G3 X0 Y10 I-10
G1 X0 Y0
M2
";

pub const HELP_TEXT: &str = "\
Commands:
  G,M,N,F ...  RS-274 G-code block
  $...         settings ($h for settings help)
  D            direct-drive mode (axis/value jogs, G returns to gcode)
  H            this help
  R            restart (reload settings, reset model, optional homing)
  T            run demo program: square
  U            run demo program: arc
  !            kill (abort motion, reset input)
  @            pause motion
  %            resume motion
";

impl Controller {
    /// Dispatch one input line. Returns `Again` for signal lines so the
    /// scheduler restarts its pass from the top.
    pub fn dispatch_line(&mut self, line: &str) -> Status {
        let line = line.trim();
        if line.is_empty() {
            return Status::Ok;
        }
        let first = line.chars().next().unwrap().to_ascii_uppercase();
        match first {
            '!' => {
                self.signals.raise_kill();
                Status::Again
            }
            '@' => {
                self.signals.raise_pause();
                Status::Again
            }
            '%' => {
                self.signals.raise_resume();
                Status::Again
            }
            '$' => {
                let (output, status) = settings::dispatch(line, &mut self.cfg, &mut self.store);
                if !output.is_empty() {
                    print!("{output}");
                }
                if !status.is_error() {
                    self.apply_settings_side_effects();
                }
                status
            }
            'D' if line.len() == 1 => {
                info!("direct-drive mode");
                self.mode = InputMode::Direct;
                Status::Ok
            }
            'D' => {
                // One-shot jog: "D X10 Y-2".
                direct::execute_jog(&line[1..], &self.cfg, &mut self.cm, &mut self.planner)
            }
            'H' if line.len() == 1 => {
                print!("{HELP_TEXT}");
                Status::Ok
            }
            'R' if line.len() == 1 => {
                self.restart();
                Status::Ok
            }
            'T' if line.len() == 1 => {
                info!("running demo program: square");
                self.devices.use_program(DEMO_SQUARE);
                Status::Ok
            }
            'U' if line.len() == 1 => {
                info!("running demo program: arc");
                self.devices.use_program(DEMO_ARC);
                Status::Ok
            }
            _ => match self.mode {
                InputMode::Direct => {
                    if matches!(first, 'G' | 'M' | 'N' | 'F' | 'Q' | '(' | '\\' | '/') {
                        // G-code hands control back to the G-code parser.
                        self.mode = InputMode::Gcode;
                        gcode::execute_line(line, &self.cfg, &mut self.cm, &mut self.planner)
                    } else {
                        direct::execute_jog(line, &self.cfg, &mut self.cm, &mut self.planner)
                    }
                }
                InputMode::Gcode => {
                    gcode::execute_line(line, &self.cfg, &mut self.cm, &mut self.planner)
                }
            },
        }
    }
}

//! Canonical machine.
//!
//! Holds the modal G-code state (`gm`) and exposes the canonical operations
//! the parser dispatches to: traverse, feed, arc, dwell, and the modal
//! setters. All inputs arrive in the user's unit and distance modes and are
//! converted on intake; everything downstream of here is millimeters and
//! minutes (degrees for rotary axes).
//!
//! The canonical machine is the only surface that mutates the logical tool
//! position, and it only does so when the planner accepts the move, so a
//! rejected move can simply be retried.

use motion::{Config, MoveType, PathControl, Plane, Planner, Status, Units, Vector, AXES, LINEAR_AXES, X, Y, Z};
use tracing::debug;

pub const MM_PER_INCH: f64 = 25.4;

/// Modal motion mode (G modal group 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionMode {
    #[default]
    Seek,
    Feed,
    CwArc,
    CcwArc,
    Cancel,
}

/// Non-modal action requested by the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NextAction {
    #[default]
    Motion,
    Dwell,
    SetOrigin,
    ReturnHome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgramFlow {
    #[default]
    Running,
    Stop,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpindleMode {
    #[default]
    Off,
    Cw,
    Ccw,
}

/// The modal G-code model.
#[derive(Debug, Clone, Copy)]
pub struct GcodeModel {
    pub next_action: NextAction,
    pub motion_mode: MotionMode,
    pub program_flow: ProgramFlow,
    pub position: Vector,
    pub target: Vector,
    pub offset: [f64; 3],
    /// Canonical feed rate, mm/min.
    pub feed_rate: f64,
    /// Traverse rate used by direct-drive jogs, mm/min.
    pub seek_rate: f64,
    /// Minutes the next move should take in inverse-feed-rate mode.
    pub inverse_feed_rate: f64,
    pub inverse_feed_rate_mode: bool,
    pub plane_axis_0: usize,
    pub plane_axis_1: usize,
    pub plane_axis_2: usize,
    pub inches_mode: bool,
    pub absolute_mode: bool,
    /// G53: absolute coordinates for the current block only.
    pub absolute_override: bool,
    pub path_control_mode: PathControl,
    pub tool: u8,
    pub spindle_mode: SpindleMode,
    pub spindle_speed: f64,
    pub dwell_time: f64,
    pub radius: f64,
}

impl GcodeModel {
    pub fn from_config(cfg: &Config) -> Self {
        let (p0, p1, p2) = plane_axes(cfg.m.gcode_plane);
        GcodeModel {
            next_action: NextAction::Motion,
            motion_mode: MotionMode::Cancel,
            program_flow: ProgramFlow::Running,
            position: [0.0; AXES],
            target: [0.0; AXES],
            offset: [0.0; 3],
            feed_rate: cfg.m.gcode_feed_rate,
            seek_rate: cfg
                .a
                .iter()
                .take(LINEAR_AXES)
                .fold(f64::MAX, |m, a| m.min(a.max_seek_rate)),
            inverse_feed_rate: 0.0,
            inverse_feed_rate_mode: false,
            plane_axis_0: p0,
            plane_axis_1: p1,
            plane_axis_2: p2,
            inches_mode: cfg.m.gcode_units == Units::Inches,
            absolute_mode: cfg.m.gcode_distance_absolute,
            absolute_override: false,
            path_control_mode: cfg.m.gcode_path_control,
            tool: cfg.m.gcode_tool,
            spindle_mode: SpindleMode::Off,
            spindle_speed: cfg.m.gcode_spindle_speed,
            dwell_time: 0.0,
            radius: 0.0,
        }
    }
}

fn plane_axes(plane: Plane) -> (usize, usize, usize) {
    match plane {
        Plane::Xy => (X, Y, Z),
        Plane::Xz => (X, Z, Y),
        Plane::Yz => (Y, Z, X),
    }
}

/// The canonical machine: modal state plus a shadow copy saved across
/// machine cycles such as homing.
#[derive(Debug)]
pub struct CanonicalMachine {
    pub gm: GcodeModel,
    gt: GcodeModel,
}

impl CanonicalMachine {
    pub fn new(cfg: &Config) -> Self {
        let gm = GcodeModel::from_config(cfg);
        CanonicalMachine { gm, gt: gm }
    }

    /// Reset the modal state to power-on defaults, keeping the position.
    pub fn reset(&mut self, cfg: &Config) {
        let position = self.gm.position;
        self.gm = GcodeModel::from_config(cfg);
        self.gm.position = position;
    }

    /// Save the model before a machine cycle takes over.
    pub fn save_state(&mut self) {
        self.gt = self.gm;
    }

    /// Restore the model saved by [`CanonicalMachine::save_state`], keeping
    /// the position the cycle established.
    pub fn restore_state(&mut self) {
        let position = self.gm.position;
        self.gm = self.gt;
        self.gm.position = position;
    }

    // --- Modal setters ---

    pub fn select_plane(&mut self, plane: Plane) -> Status {
        let (p0, p1, p2) = plane_axes(plane);
        self.gm.plane_axis_0 = p0;
        self.gm.plane_axis_1 = p1;
        self.gm.plane_axis_2 = p2;
        Status::Ok
    }

    pub fn use_length_units(&mut self, inches: bool) -> Status {
        self.gm.inches_mode = inches;
        Status::Ok
    }

    pub fn set_distance_mode(&mut self, absolute: bool) -> Status {
        self.gm.absolute_mode = absolute;
        Status::Ok
    }

    pub fn set_motion_control_mode(&mut self, planner: &mut Planner, mode: PathControl) -> Status {
        self.gm.path_control_mode = mode;
        planner.set_path_control(self.gm.path_control_mode);
        Status::Ok
    }

    pub fn set_inverse_feed_rate_mode(&mut self, on: bool) -> Status {
        self.gm.inverse_feed_rate_mode = on;
        Status::Ok
    }

    /// Set the feed rate from an F word. In inverse-feed-rate mode the word
    /// is 1/minutes for the next move; otherwise units/min.
    pub fn set_feed_rate(&mut self, cfg: &Config, f: f64) -> Status {
        if f <= 0.0 {
            return Status::ParameterUnderRange;
        }
        if self.gm.inverse_feed_rate_mode {
            self.gm.inverse_feed_rate = 1.0 / f;
        } else {
            let rate = self.to_millimeters(f);
            if rate > cfg.max_feed_rate() {
                return Status::MaxFeedRateExceeded;
            }
            self.gm.feed_rate = rate;
        }
        Status::Ok
    }

    pub fn set_spindle_speed(&mut self, s: f64) -> Status {
        if s < 0.0 {
            return Status::ParameterUnderRange;
        }
        if s > 24_000.0 {
            return Status::MaxSpindleSpeedExceeded;
        }
        self.gm.spindle_speed = s;
        Status::Ok
    }

    pub fn set_spindle_mode(&mut self, mode: SpindleMode) -> Status {
        self.gm.spindle_mode = mode;
        Status::Ok
    }

    pub fn select_tool(&mut self, tool: u8) -> Status {
        self.gm.tool = tool;
        Status::Ok
    }

    // --- Intake conversions ---

    pub fn to_millimeters(&self, value: f64) -> f64 {
        if self.gm.inches_mode {
            value * MM_PER_INCH
        } else {
            value
        }
    }

    /// Apply unit and distance modes to the flagged axis words and store the
    /// result in `gm.target`. Rotary axes stay in degrees.
    pub fn set_target(&mut self, values: &[f64; AXES], flags: &[bool; AXES]) {
        self.gm.target = self.gm.position;
        for i in 0..AXES {
            if !flags[i] {
                continue;
            }
            let value = if i < LINEAR_AXES {
                self.to_millimeters(values[i])
            } else {
                values[i]
            };
            if self.gm.absolute_mode || self.gm.absolute_override {
                self.gm.target[i] = value;
            } else {
                self.gm.target[i] += value;
            }
        }
    }

    /// G92: set the logical position of the flagged axes.
    pub fn set_origin_offsets(
        &mut self,
        planner: &mut Planner,
        values: &[f64; AXES],
        flags: &[bool; AXES],
    ) -> Status {
        for i in 0..AXES {
            if flags[i] {
                let value = if i < LINEAR_AXES {
                    self.to_millimeters(values[i])
                } else {
                    values[i]
                };
                self.gm.position[i] = value;
            }
        }
        planner.set_position(self.gm.position);
        Status::Ok
    }

    /// Force the logical position without a G-code block (homing, restart).
    pub fn set_position(&mut self, planner: &mut Planner, position: Vector) {
        self.gm.position = position;
        planner.set_position(position);
    }

    // --- Move time ---

    /// Minutes for a move to `target`. Traverses are limited by the slowest
    /// axis at its seek rate; feeds start from the feed rate (or the inverse
    /// time) and are then capped by the slowest axis.
    fn get_move_time(&self, cfg: &Config, target: &Vector, traverse: bool) -> f64 {
        let mut time: f64 = 0.0;
        if !traverse {
            if self.gm.inverse_feed_rate_mode {
                time = self.gm.inverse_feed_rate;
            } else if self.gm.feed_rate > 0.0 {
                let linear = motion::linear_length(&self.gm.position, target) / self.gm.feed_rate;
                let rotary = motion::rotary_length(&self.gm.position, target) / self.gm.feed_rate;
                time = linear.max(rotary);
            }
        }
        for i in 0..AXES {
            let rate = if traverse {
                cfg.a[i].max_seek_rate
            } else {
                cfg.a[i].max_feed_rate
            };
            if rate > 0.0 {
                time = time.max((target[i] - self.gm.position[i]).abs() / rate);
            }
        }
        time
    }

    // --- Motion operations ---

    pub fn straight_traverse(&mut self, cfg: &Config, planner: &mut Planner, target: Vector) -> Status {
        self.queue_straight(cfg, planner, target, true)
    }

    pub fn straight_feed(&mut self, cfg: &Config, planner: &mut Planner, target: Vector) -> Status {
        if !self.gm.inverse_feed_rate_mode && self.gm.feed_rate <= 0.0 {
            return Status::ParameterUnderRange;
        }
        self.queue_straight(cfg, planner, target, false)
    }

    fn queue_straight(&mut self, cfg: &Config, planner: &mut Planner, target: Vector, traverse: bool) -> Status {
        let travel = cfg.check_travel(&target);
        if travel.is_error() {
            return travel;
        }
        let minutes = self.get_move_time(cfg, &target, traverse);
        if minutes <= 0.0 {
            return Status::ZeroLengthMove;
        }
        let status = if cfg.m.accel_enabled {
            planner.aline(cfg, target, minutes)
        } else {
            planner.line(cfg, target, minutes)
        };
        debug!(?target, minutes, traverse, ?status, "straight move");
        if status == Status::Ok {
            self.gm.target = target;
            self.gm.position = target;
        }
        status
    }

    /// G2/G3. `offset` holds unit-converted I/J/K words; `radius_mode`
    /// selects the R-word form instead.
    #[allow(clippy::too_many_arguments)]
    pub fn arc_feed(
        &mut self,
        cfg: &Config,
        planner: &mut Planner,
        target: Vector,
        offset: [f64; 3],
        radius: f64,
        radius_mode: bool,
        clockwise: bool,
    ) -> Status {
        if !self.gm.inverse_feed_rate_mode && self.gm.feed_rate <= 0.0 {
            return Status::ParameterUnderRange;
        }
        let travel = cfg.check_travel(&target);
        if travel.is_error() {
            return travel;
        }
        let minutes = self.get_move_time(cfg, &target, false);
        if minutes <= 0.0 {
            return Status::ZeroLengthMove;
        }
        self.gm.offset = offset;
        self.gm.radius = radius;
        let plane = (self.gm.plane_axis_0, self.gm.plane_axis_1, self.gm.plane_axis_2);
        let status = planner.arc(
            cfg,
            target,
            self.gm.offset,
            self.gm.radius,
            radius_mode,
            clockwise,
            minutes,
            plane,
        );
        if status == Status::Ok {
            self.gm.target = target;
            self.gm.position = target;
        }
        status
    }

    /// G28: traverse back to logical zero.
    pub fn return_home(&mut self, cfg: &Config, planner: &mut Planner) -> Status {
        let status = self.straight_traverse(cfg, planner, [0.0; AXES]);
        if status == Status::ZeroLengthMove {
            return Status::Ok;
        }
        status
    }

    pub fn dwell(&mut self, planner: &mut Planner, seconds: f64) -> Status {
        if seconds < 0.0 {
            return Status::ParameterUnderRange;
        }
        self.gm.dwell_time = seconds;
        planner.dwell(self.gm.dwell_time)
    }

    // --- Program flow ---

    pub fn program_stop(&mut self, planner: &mut Planner) -> Status {
        self.gm.program_flow = ProgramFlow::Stop;
        planner.queue_flow(MoveType::Stop)
    }

    /// Queue a start marker releasing a queued program stop.
    pub fn program_resume(&mut self, planner: &mut Planner) -> Status {
        self.gm.program_flow = ProgramFlow::Running;
        planner.queue_flow(MoveType::Start)
    }

    /// M2/M30: queue the end marker. The scheduler resets the model when the
    /// DDA consumes it.
    pub fn program_end(&mut self, planner: &mut Planner) -> Status {
        self.gm.program_flow = ProgramFlow::End;
        planner.queue_flow(MoveType::End)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion::A;

    fn setup() -> (Config, CanonicalMachine, Planner) {
        let cfg = Config::default();
        let cm = CanonicalMachine::new(&cfg);
        (cfg, cm, Planner::new())
    }

    fn xtarget(x: f64) -> Vector {
        let mut t = [0.0; AXES];
        t[X] = x;
        t
    }

    #[test]
    fn traverse_time_is_slowest_axis_limited() {
        let (cfg, cm, _) = setup();
        // X at 1500 mm/min and Z at 1500 mm/min: a 15 mm X move with a
        // 100 mm Z move is paced by Z.
        let mut target = xtarget(15.0);
        target[Z] = 100.0;
        let t = cm.get_move_time(&cfg, &target, true);
        assert!((t - 100.0 / cfg.a[Z].max_seek_rate).abs() < 1e-12);
    }

    #[test]
    fn feed_time_capped_by_slow_axis() {
        let (cfg, mut cm, _) = setup();
        cm.gm.feed_rate = 10_000.0; // faster than any axis allows
        let target = xtarget(100.0);
        let t = cm.get_move_time(&cfg, &target, false);
        assert!((t - 100.0 / cfg.a[X].max_feed_rate).abs() < 1e-12);
    }

    #[test]
    fn inverse_feed_rate_sets_move_time() {
        let (cfg, mut cm, _) = setup();
        cm.set_inverse_feed_rate_mode(true);
        assert_eq!(cm.set_feed_rate(&cfg, 2.0), Status::Ok);
        let t = cm.get_move_time(&cfg, &xtarget(1.0), false);
        // 1/F = 0.5 minutes, no axis cap bites on a 1 mm move.
        assert!((t - 0.5).abs() < 1e-12);
    }

    #[test]
    fn inches_convert_on_intake_only() {
        let (_cfg, mut cm, _) = setup();
        cm.use_length_units(true);
        let mut values = [0.0; AXES];
        values[X] = 1.0;
        values[A] = 90.0;
        let mut flags = [false; AXES];
        flags[X] = true;
        flags[A] = true;
        cm.set_target(&values, &flags);
        assert!((cm.gm.target[X] - 25.4).abs() < 1e-12);
        // Rotary axes stay in degrees regardless of G20.
        assert!((cm.gm.target[A] - 90.0).abs() < 1e-12);
    }

    #[test]
    fn incremental_mode_accumulates() {
        let (_cfg, mut cm, _) = setup();
        cm.set_distance_mode(false);
        let mut values = [0.0; AXES];
        values[X] = 5.0;
        let mut flags = [false; AXES];
        flags[X] = true;
        cm.set_target(&values, &flags);
        assert!((cm.gm.target[X] - 5.0).abs() < 1e-12);
        cm.gm.position = cm.gm.target;
        cm.set_target(&values, &flags);
        assert!((cm.gm.target[X] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn traverse_to_current_position_is_zero_length() {
        let (cfg, mut cm, mut planner) = setup();
        let p = xtarget(7.0);
        cm.set_position(&mut planner, p);
        let st = cm.straight_traverse(&cfg, &mut planner, p);
        assert_eq!(st, Status::ZeroLengthMove);
        assert_eq!(cm.gm.position, p);
        assert!(!planner.is_busy());
    }

    #[test]
    fn rejected_move_leaves_position_unchanged() {
        let (cfg, mut cm, mut planner) = setup();
        let st = cm.straight_traverse(&cfg, &mut planner, xtarget(1000.0));
        assert_eq!(st, Status::MaxTravelExceeded);
        assert_eq!(cm.gm.position, [0.0; AXES]);
        assert!(!planner.is_busy());
    }

    #[test]
    fn g92_moves_the_frame_not_the_tool() {
        let (_cfg, mut cm, mut planner) = setup();
        let mut values = [0.0; AXES];
        values[X] = 50.0;
        let mut flags = [false; AXES];
        flags[X] = true;
        cm.set_origin_offsets(&mut planner, &values, &flags);
        assert!((cm.gm.position[X] - 50.0).abs() < 1e-12);
        assert_eq!(planner.position()[X], 50.0);
        assert!(!planner.is_busy());
    }

    #[test]
    fn feed_without_rate_is_rejected() {
        let (cfg, mut cm, mut planner) = setup();
        cm.gm.feed_rate = 0.0;
        let st = cm.straight_feed(&cfg, &mut planner, xtarget(5.0));
        assert_eq!(st, Status::ParameterUnderRange);
    }
}

//! G-code parser and dispatcher.
//!
//! Lexes one block of RS-274/NGC into letter/value words, normalizes them
//! into a value set (`gn`) plus presence flags (`gf`), checks modal groups,
//! and then dispatches to the canonical machine in the NIST-mandated order.
//! Modal group violations are rejected before any side effect.

use crate::canon::{CanonicalMachine, MotionMode, NextAction, ProgramFlow, SpindleMode};
use motion::{Config, PathControl, Plane, Planner, Status, AXES};
use tracing::trace;

/// Word values for one block.
#[derive(Debug, Clone, Default)]
pub struct GcodeValues {
    pub motion_mode: MotionMode,
    pub next_action: NextAction,
    pub program_flow: ProgramFlow,
    pub target: [f64; AXES],
    pub offset: [f64; 3],
    pub radius: f64,
    pub feed_rate: f64,
    pub spindle_speed: f64,
    pub spindle_mode: SpindleMode,
    pub tool: u8,
    pub dwell_time: f64,
    pub inches_mode: bool,
    pub absolute_mode: bool,
    pub absolute_override: bool,
    pub set_plane: Plane,
    pub path_control: PathControl,
    pub inverse_feed_rate_mode: bool,
    pub line_number: u32,
}

/// Presence flags for one block.
#[derive(Debug, Clone, Default)]
pub struct GcodeFlags {
    pub motion_mode: bool,
    pub next_action: bool,
    pub program_flow: bool,
    pub target: [bool; AXES],
    pub offset: [bool; 3],
    pub radius: bool,
    pub feed_rate: bool,
    pub spindle_speed: bool,
    pub spindle_mode: bool,
    pub tool: bool,
    pub dwell_time: bool,
    pub inches_mode: bool,
    pub absolute_mode: bool,
    pub absolute_override: bool,
    pub set_plane: bool,
    pub path_control: bool,
    pub inverse_feed_rate_mode: bool,
}

/// Modal groups tracked for duplicate-word rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModalGroup {
    GNonModal = 0,
    GMotion,
    GPlane,
    GDistance,
    GFeedRateMode,
    GUnits,
    GPathControl,
    MStopping,
    MSpindle,
}

const MODAL_GROUPS: usize = 9;

struct GroupTracker([bool; MODAL_GROUPS]);

impl GroupTracker {
    fn new() -> Self {
        GroupTracker([false; MODAL_GROUPS])
    }

    fn claim(&mut self, group: ModalGroup) -> Result<(), Status> {
        let i = group as usize;
        if self.0[i] {
            return Err(Status::ModalGroupViolation);
        }
        self.0[i] = true;
        Ok(())
    }
}

/// Uppercase the block, drop whitespace and control characters, and strip
/// parenthesized comments.
fn normalize(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_comment = false;
    for ch in line.chars() {
        match ch {
            '(' => in_comment = true,
            ')' => in_comment = false,
            _ if in_comment => {}
            c if c.is_whitespace() || c.is_control() => {}
            c => out.push(c.to_ascii_uppercase()),
        }
    }
    out
}

/// Lex one block into `gn`/`gf`. No machine state is touched here.
pub fn parse_line(line: &str) -> Result<(GcodeValues, GcodeFlags), Status> {
    let norm = normalize(line);
    let bytes = norm.as_bytes();
    let mut gn = GcodeValues::default();
    let mut gf = GcodeFlags::default();
    let mut groups = GroupTracker::new();

    let mut i = 0;
    // Leading block-delete character is accepted and ignored.
    if bytes.first() == Some(&b'/') {
        i += 1;
    }

    while i < bytes.len() {
        let letter = bytes[i] as char;
        if !letter.is_ascii_alphabetic() {
            return Err(Status::ExpectedCommandLetter);
        }
        i += 1;

        let start = i;
        while i < bytes.len() {
            let b = bytes[i];
            let is_sign = b == b'+' || b == b'-';
            if b.is_ascii_digit() || b == b'.' || (is_sign && i == start) {
                i += 1;
            } else {
                break;
            }
        }
        let value: f64 = norm[start..i].parse().map_err(|_| Status::BadNumberFormat)?;

        apply_word(letter, value, &mut gn, &mut gf, &mut groups)?;
    }
    Ok((gn, gf))
}

fn apply_word(
    letter: char,
    value: f64,
    gn: &mut GcodeValues,
    gf: &mut GcodeFlags,
    groups: &mut GroupTracker,
) -> Result<(), Status> {
    match letter {
        'G' => {
            // Fractional codes (G61.1) map onto tenths.
            let code = (value * 10.0).round() as i32;
            match code {
                0 | 10 | 20 | 30 | 800 => {
                    groups.claim(ModalGroup::GMotion)?;
                    gn.motion_mode = match code {
                        0 => MotionMode::Seek,
                        10 => MotionMode::Feed,
                        20 => MotionMode::CwArc,
                        30 => MotionMode::CcwArc,
                        _ => MotionMode::Cancel,
                    };
                    gf.motion_mode = true;
                }
                40 => {
                    groups.claim(ModalGroup::GNonModal)?;
                    gn.next_action = NextAction::Dwell;
                    gf.next_action = true;
                }
                170 | 180 | 190 => {
                    groups.claim(ModalGroup::GPlane)?;
                    gn.set_plane = match code {
                        170 => Plane::Xy,
                        180 => Plane::Xz,
                        _ => Plane::Yz,
                    };
                    gf.set_plane = true;
                }
                200 | 210 => {
                    groups.claim(ModalGroup::GUnits)?;
                    gn.inches_mode = code == 200;
                    gf.inches_mode = true;
                }
                280 => {
                    groups.claim(ModalGroup::GNonModal)?;
                    gn.next_action = NextAction::ReturnHome;
                    gf.next_action = true;
                }
                530 => {
                    gn.absolute_override = true;
                    gf.absolute_override = true;
                }
                610 | 611 | 640 => {
                    groups.claim(ModalGroup::GPathControl)?;
                    gn.path_control = match code {
                        610 => PathControl::ExactStop,
                        611 => PathControl::ExactPath,
                        _ => PathControl::Continuous,
                    };
                    gf.path_control = true;
                }
                900 | 910 => {
                    groups.claim(ModalGroup::GDistance)?;
                    gn.absolute_mode = code == 900;
                    gf.absolute_mode = true;
                }
                920 => {
                    groups.claim(ModalGroup::GNonModal)?;
                    gn.next_action = NextAction::SetOrigin;
                    gf.next_action = true;
                }
                930 | 940 => {
                    groups.claim(ModalGroup::GFeedRateMode)?;
                    gn.inverse_feed_rate_mode = code == 930;
                    gf.inverse_feed_rate_mode = true;
                }
                _ => return Err(Status::UnsupportedStatement),
            }
        }
        'M' => {
            let code = value.round() as i32;
            match code {
                0 | 1 => {
                    groups.claim(ModalGroup::MStopping)?;
                    gn.program_flow = ProgramFlow::Stop;
                    gf.program_flow = true;
                }
                2 | 30 => {
                    groups.claim(ModalGroup::MStopping)?;
                    gn.program_flow = ProgramFlow::End;
                    gf.program_flow = true;
                }
                3 | 4 | 5 => {
                    groups.claim(ModalGroup::MSpindle)?;
                    gn.spindle_mode = match code {
                        3 => SpindleMode::Cw,
                        4 => SpindleMode::Ccw,
                        _ => SpindleMode::Off,
                    };
                    gf.spindle_mode = true;
                }
                6 => {
                    // Tool change: the tool number was recorded by T.
                }
                _ => return Err(Status::UnsupportedStatement),
            }
        }
        // Line numbers are accepted and ignored.
        'N' => gn.line_number = value as u32,
        'F' => {
            gn.feed_rate = value;
            gf.feed_rate = true;
        }
        'S' => {
            gn.spindle_speed = value;
            gf.spindle_speed = true;
        }
        'T' => {
            gn.tool = value as u8;
            gf.tool = true;
        }
        'P' => {
            gn.dwell_time = value;
            gf.dwell_time = true;
        }
        'R' => {
            gn.radius = value;
            gf.radius = true;
        }
        'X' | 'Y' | 'Z' | 'A' | 'B' | 'C' => {
            let axis = match letter {
                'X' => motion::X,
                'Y' => motion::Y,
                'Z' => motion::Z,
                'A' => motion::A,
                'B' => motion::B,
                _ => motion::C,
            };
            gn.target[axis] = value;
            gf.target[axis] = true;
        }
        'I' | 'J' | 'K' => {
            let axis = match letter {
                'I' => 0,
                'J' => 1,
                _ => 2,
            };
            gn.offset[axis] = value;
            gf.offset[axis] = true;
        }
        _ => return Err(Status::UnsupportedStatement),
    }
    Ok(())
}

/// Parse one block and run it against the canonical machine.
pub fn execute_line(
    line: &str,
    cfg: &Config,
    cm: &mut CanonicalMachine,
    planner: &mut Planner,
) -> Status {
    let (gn, gf) = match parse_line(line) {
        Ok(parsed) => parsed,
        Err(status) => return status,
    };
    trace!(?gn, "block parsed");
    execute(&gn, &gf, cfg, cm, planner)
}

/// Dispatch a parsed block in the NIST-mandated order: feed rate mode, feed
/// rate, spindle speed, tool, spindle, plane, units, path control, distance
/// mode, non-modal actions and motion, then program flow.
fn execute(
    gn: &GcodeValues,
    gf: &GcodeFlags,
    cfg: &Config,
    cm: &mut CanonicalMachine,
    planner: &mut Planner,
) -> Status {
    if gf.inverse_feed_rate_mode {
        cm.set_inverse_feed_rate_mode(gn.inverse_feed_rate_mode);
    }
    if gf.feed_rate {
        let st = cm.set_feed_rate(cfg, gn.feed_rate);
        if st.is_error() {
            return st;
        }
    }
    if gf.spindle_speed {
        let st = cm.set_spindle_speed(gn.spindle_speed);
        if st.is_error() {
            return st;
        }
    }
    if gf.tool {
        cm.select_tool(gn.tool);
    }
    if gf.spindle_mode {
        cm.set_spindle_mode(gn.spindle_mode);
        trace!(
            mode = ?cm.gm.spindle_mode,
            speed = cm.gm.spindle_speed,
            tool = cm.gm.tool,
            "spindle state recorded"
        );
    }
    if gf.set_plane {
        cm.select_plane(gn.set_plane);
    }
    if gf.inches_mode {
        cm.use_length_units(gn.inches_mode);
    }
    if gf.path_control {
        cm.set_motion_control_mode(planner, gn.path_control);
    }
    if gf.absolute_mode {
        cm.set_distance_mode(gn.absolute_mode);
    }
    if gf.absolute_override {
        cm.gm.absolute_override = true;
    }
    if gf.motion_mode {
        cm.gm.motion_mode = gn.motion_mode;
        cm.gm.next_action = NextAction::Motion;
    }

    let mut status = Status::Ok;
    if gf.next_action {
        cm.gm.next_action = gn.next_action;
        status = match cm.gm.next_action {
            NextAction::Dwell => {
                if !gf.dwell_time {
                    cm.gm.absolute_override = false;
                    return Status::ParameterNotFound;
                }
                cm.dwell(planner, gn.dwell_time)
            }
            NextAction::SetOrigin => cm.set_origin_offsets(planner, &gn.target, &gf.target),
            NextAction::ReturnHome => cm.return_home(cfg, planner),
            NextAction::Motion => Status::Ok,
        };
    } else if gf.target.iter().any(|&f| f) {
        cm.set_target(&gn.target, &gf.target);
        let target = cm.gm.target;
        status = match cm.gm.motion_mode {
            MotionMode::Seek => cm.straight_traverse(cfg, planner, target),
            MotionMode::Feed => cm.straight_feed(cfg, planner, target),
            MotionMode::CwArc | MotionMode::CcwArc => {
                let has_offsets = gf.offset.iter().any(|&f| f);
                if !has_offsets && !gf.radius {
                    cm.gm.absolute_override = false;
                    return Status::ArcSpecificationError;
                }
                let mut offset = [0.0; 3];
                for i in 0..3 {
                    if gf.offset[i] {
                        offset[i] = cm.to_millimeters(gn.offset[i]);
                    }
                }
                cm.gm.radius = cm.to_millimeters(gn.radius);
                let radius = cm.gm.radius;
                let clockwise = cm.gm.motion_mode == MotionMode::CwArc;
                cm.arc_feed(cfg, planner, target, offset, radius, gf.radius, clockwise)
            }
            MotionMode::Cancel => Status::Ok,
        };
    }
    cm.gm.absolute_override = false;
    if status.is_error() {
        return status;
    }

    if gf.program_flow {
        let st = match gn.program_flow {
            ProgramFlow::Stop => cm.program_stop(planner),
            ProgramFlow::End => cm.program_end(planner),
            ProgramFlow::Running => Status::Ok,
        };
        if st.is_error() {
            return st;
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion::{MoveType, X, Y};

    fn setup() -> (Config, CanonicalMachine, Planner) {
        let cfg = Config::default();
        let cm = CanonicalMachine::new(&cfg);
        (cfg, cm, Planner::new())
    }

    fn run(lines: &[&str], cfg: &Config, cm: &mut CanonicalMachine, p: &mut Planner) -> Status {
        let mut last = Status::Ok;
        for line in lines {
            last = execute_line(line, cfg, cm, p);
            assert!(!last.is_error(), "{line}: {last:?}");
        }
        last
    }

    /// Run the segment generator to exhaustion, discarding the segments.
    fn drain(p: &mut Planner, cfg: &Config) {
        let mut q = motion::stepper::SegmentQueue::new();
        loop {
            match p.run_move(cfg, &mut q) {
                Status::Noop => break,
                _ => while q.pop().is_some() {},
            }
        }
    }

    #[test]
    fn lexes_letter_value_pairs() {
        let (gn, gf) = parse_line("N10 G1 X12.5 Y-3 F600").unwrap();
        assert_eq!(gn.line_number, 10);
        assert_eq!(gn.motion_mode, MotionMode::Feed);
        assert!((gn.target[X] - 12.5).abs() < 1e-12);
        assert!((gn.target[Y] + 3.0).abs() < 1e-12);
        assert!(gf.feed_rate && (gn.feed_rate - 600.0).abs() < 1e-12);
    }

    #[test]
    fn fractional_codes_select_exact_path() {
        let (gn, gf) = parse_line("G61.1").unwrap();
        assert!(gf.path_control);
        assert_eq!(gn.path_control, PathControl::ExactPath);

        let (gn, _) = parse_line("G61").unwrap();
        assert_eq!(gn.path_control, PathControl::ExactStop);
    }

    #[test]
    fn comments_and_whitespace_are_stripped() {
        let (gn, gf) = parse_line("  g0 (move to corner) x10 ( y word ) y5  ").unwrap();
        assert_eq!(gn.motion_mode, MotionMode::Seek);
        assert!(gf.target[X] && gf.target[Y]);
        assert!((gn.target[Y] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn modal_group_violation_rejected_before_side_effects() {
        let (cfg, mut cm, mut planner) = setup();
        let st = execute_line("G0 G1 X10", &cfg, &mut cm, &mut planner);
        assert_eq!(st, Status::ModalGroupViolation);
        assert!(!planner.is_busy());
        assert_eq!(cm.gm.position, [0.0; AXES]);
    }

    #[test]
    fn malformed_number_is_rejected() {
        assert_eq!(parse_line("G0 X1..2").unwrap_err(), Status::BadNumberFormat);
        assert_eq!(parse_line("G0 X").unwrap_err(), Status::BadNumberFormat);
    }

    #[test]
    fn unknown_word_is_unsupported() {
        assert_eq!(parse_line("G0 E5").unwrap_err(), Status::UnsupportedStatement);
        assert_eq!(parse_line("G99").unwrap_err(), Status::UnsupportedStatement);
    }

    #[test]
    fn value_without_letter_expects_command() {
        assert_eq!(parse_line("12 G0").unwrap_err(), Status::ExpectedCommandLetter);
    }

    #[test]
    fn units_round_trip_matches_millimeters() {
        // G20 inch move, then the same point addressed in mm.
        let (cfg, mut cm, mut planner) = setup();
        run(&["G90 G20 G0 X1 Y1"], &cfg, &mut cm, &mut planner);
        let inch_target = cm.gm.position;

        run(&["G21", "G0 X25.4 Y25.4"], &cfg, &mut cm, &mut planner);
        assert_eq!(cm.gm.position, inch_target);
        assert!((inch_target[X] - 25.4).abs() < 1e-12);
    }

    #[test]
    fn modal_motion_mode_persists_across_blocks() {
        let (cfg, mut cm, mut planner) = setup();
        run(&["F600 G1 X1", "X2 Y1"], &cfg, &mut cm, &mut planner);
        assert!((cm.gm.position[X] - 2.0).abs() < 1e-12);
        assert!((cm.gm.position[Y] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn dwell_requires_p_word_and_queues_buffer() {
        let (cfg, mut cm, mut planner) = setup();
        assert_eq!(
            execute_line("G4", &cfg, &mut cm, &mut planner),
            Status::ParameterNotFound
        );
        assert_eq!(
            execute_line("G4 P2.5", &cfg, &mut cm, &mut planner),
            Status::Ok
        );
        let q = planner.queued();
        assert_eq!(q.len(), 1);
        assert_eq!(q[0].move_type, MoveType::Dwell);
        assert!((q[0].time - 2.5 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn arc_without_offsets_or_radius_is_rejected() {
        let (cfg, mut cm, mut planner) = setup();
        run(&["F400"], &cfg, &mut cm, &mut planner);
        let st = execute_line("G2 X10 Y10", &cfg, &mut cm, &mut planner);
        assert_eq!(st, Status::ArcSpecificationError);
        assert!(!planner.is_busy());
    }

    #[test]
    fn arc_feed_queues_arc_buffer() {
        let (cfg, mut cm, mut planner) = setup();
        run(&["G17 G21 G90 F400", "G0 X10"], &cfg, &mut cm, &mut planner);
        // Flush the traverse so only the arc remains under inspection.
        let before = planner.queued().len();
        let st = execute_line("G3 X0 Y10 I-10", &cfg, &mut cm, &mut planner);
        assert_eq!(st, Status::Ok);
        let q = planner.queued();
        assert_eq!(q.len(), before + 1);
        assert_eq!(q.last().unwrap().move_type, MoveType::Arc);
    }

    #[test]
    fn program_stop_and_end_queue_flow_markers() {
        let (cfg, mut cm, mut planner) = setup();
        run(&["M0"], &cfg, &mut cm, &mut planner);
        assert_eq!(planner.queued().last().unwrap().move_type, MoveType::Stop);
        run(&["M30"], &cfg, &mut cm, &mut planner);
        assert_eq!(planner.queued().last().unwrap().move_type, MoveType::End);
        assert_eq!(cm.gm.program_flow, ProgramFlow::End);
    }

    #[test]
    fn g92_sets_origin() {
        let (cfg, mut cm, mut planner) = setup();
        run(&["G0 X10", "G92 X0"], &cfg, &mut cm, &mut planner);
        assert_eq!(cm.gm.position[X], 0.0);
        assert_eq!(planner.position()[X], 0.0);
    }

    #[test]
    fn g53_overrides_distance_mode_for_one_block() {
        let (cfg, mut cm, mut planner) = setup();
        run(&["G91 G0 X5"], &cfg, &mut cm, &mut planner);
        drain(&mut planner, &cfg);
        run(&["G53 G0 X20"], &cfg, &mut cm, &mut planner);
        drain(&mut planner, &cfg);
        assert!((cm.gm.position[X] - 20.0).abs() < 1e-12);
        // Back to incremental on the next block.
        run(&["G0 X5"], &cfg, &mut cm, &mut planner);
        assert!((cm.gm.position[X] - 25.0).abs() < 1e-12);
    }
}

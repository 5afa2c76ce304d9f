//! Direct-drive mode.
//!
//! Jogs axes without the G-code modal machinery: a line of axis/value
//! pairs ("X10 Y-2.5") queues one incremental traverse in machine
//! coordinates at the seek rate. Unit and distance modes do not apply.

use motion::{Config, Planner, Status, AXIS_NAMES};

use crate::canon::CanonicalMachine;

/// Parse and queue one jog line.
pub fn execute_jog(
    line: &str,
    cfg: &Config,
    cm: &mut CanonicalMachine,
    planner: &mut Planner,
) -> Status {
    let compact: String = line
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let bytes = compact.as_bytes();

    let mut target = cm.gm.position;
    let mut any = false;
    let mut i = 0;
    while i < bytes.len() {
        let letter = bytes[i] as char;
        let Some(axis) = AXIS_NAMES.iter().position(|&c| c == letter) else {
            return Status::UnrecognizedCommand;
        };
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
        let value: f64 = match compact[start..i].parse() {
            Ok(v) => v,
            Err(_) => return Status::BadNumberFormat,
        };
        target[axis] += value;
        any = true;
    }
    if !any {
        return Status::ExpectedCommandLetter;
    }
    // Jogs run at the canonical seek rate through the feed path so the
    // per-axis caps still apply.
    let saved_feed = cm.gm.feed_rate;
    cm.gm.feed_rate = cm.gm.seek_rate;
    let status = cm.straight_feed(cfg, planner, target);
    cm.gm.feed_rate = saved_feed;
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion::{AXES, X, Y};

    #[test]
    fn jog_is_incremental() {
        let cfg = Config::default();
        let mut cm = CanonicalMachine::new(&cfg);
        let mut planner = Planner::new();
        assert_eq!(execute_jog("X2 Y-1", &cfg, &mut cm, &mut planner), Status::Ok);
        assert_eq!(cm.gm.position[X], 2.0);
        assert_eq!(cm.gm.position[Y], -1.0);
        // A second jog stacks on the first.
        planner.flush();
        planner.set_position(cm.gm.position);
        assert_eq!(execute_jog("X2", &cfg, &mut cm, &mut planner), Status::Ok);
        assert_eq!(cm.gm.position[X], 4.0);
    }

    #[test]
    fn bad_jog_lines_are_rejected() {
        let cfg = Config::default();
        let mut cm = CanonicalMachine::new(&cfg);
        let mut planner = Planner::new();
        assert_eq!(
            execute_jog("Q10", &cfg, &mut cm, &mut planner),
            Status::UnrecognizedCommand
        );
        assert_eq!(
            execute_jog("X1..5", &cfg, &mut cm, &mut planner),
            Status::BadNumberFormat
        );
        assert_eq!(execute_jog("", &cfg, &mut cm, &mut planner), Status::ExpectedCommandLetter);
        assert_eq!(cm.gm.position, [0.0; AXES]);
    }
}

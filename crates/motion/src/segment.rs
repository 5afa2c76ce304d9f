//! Segment generator.
//!
//! Runs the currently-running planner buffer to completion across many
//! scheduler passes, emitting one constant-time motor segment per pass.
//! Yields `Again` without advancing sub-move state when the motor segment
//! queue is full, which is the backpressure that ultimately throttles the
//! command reader.

use crate::buffer::{MoveState, MoveType};
use crate::config::{AxisMode, Config};
use crate::planner::Planner;
use crate::status::Status;
use crate::stepper::{
    dda_timer_period, dwell_timer_period, MotorSegment, MotorStep, SegmentKind, SegmentQueue,
    F_DDA, F_DWELL,
};
use crate::{Vector, MOTORS};

const RAD_PER_DEG: f64 = std::f64::consts::PI / 180.0;

impl Planner {
    /// Run one unit of work on the current sub-move.
    ///
    /// Returns `Noop` when the ring is empty, `Ok` when a segment was
    /// emitted (or a sub-move retired), and `Again` when the motor segment
    /// queue cannot accept another segment.
    pub fn run_move(&mut self, cfg: &Config, queue: &mut SegmentQueue) -> Status {
        let Some(i) = self.ring.get_run() else {
            return Status::Noop;
        };
        let status = match self.ring.get(i).move_type {
            MoveType::None => Status::Complete,
            MoveType::Line | MoveType::Cruise => self.run_cruise(cfg, queue, i),
            MoveType::Accel => self.run_curve(cfg, queue, i, Profile::Accel),
            MoveType::Decel => self.run_curve(cfg, queue, i, Profile::Decel),
            MoveType::LinearDecel => self.run_curve(cfg, queue, i, Profile::LinearRamp),
            MoveType::Arc => self.run_arc(cfg, queue, i),
            MoveType::Dwell => self.run_dwell(queue, i),
            MoveType::Start => self.run_flow(queue, SegmentKind::Start),
            MoveType::Stop => self.run_flow(queue, SegmentKind::Stop),
            MoveType::End => self.run_flow(queue, SegmentKind::End),
        };
        if status == Status::Complete {
            self.ring.end_run();
            return Status::Ok;
        }
        status
    }

    /// Constant-velocity sub-moves emit one segment covering the whole
    /// region.
    fn run_cruise(&mut self, cfg: &Config, queue: &mut SegmentQueue, i: usize) -> Status {
        let b = *self.ring.get(i);
        let minutes = if b.time > 0.0 {
            b.time
        } else if b.target_velocity > 0.0 {
            b.length / b.target_velocity
        } else {
            return Status::Complete;
        };
        match self.emit_line(cfg, queue, b.target, minutes) {
            Status::Ok => Status::Complete,
            other => other,
        }
    }

    /// Two-phase S-curve (or single-phase linear ramp) between the sub-move's
    /// initial and target velocities.
    fn run_curve(&mut self, cfg: &Config, queue: &mut SegmentQueue, i: usize, profile: Profile) -> Status {
        // Initialize the working set on first entry.
        if self.ring.get(i).move_state == MoveState::New {
            let b = self.ring.get_mut(i);
            b.midpoint_velocity = (b.initial_velocity + b.target_velocity) / 2.0;
            if b.midpoint_velocity <= 0.0 || b.length <= 0.0 {
                return Status::Complete;
            }
            b.time = b.length / b.midpoint_velocity;
            b.segments = (b.time / cfg.m.min_segment_time_min()).ceil().max(1.0) as u32;
            b.segment_time = b.time / b.segments as f64;
            b.jerk_div2 = cfg.m.max_linear_jerk / 2.0;
            b.midpoint_acceleration = b.time * b.jerk_div2;
            b.elapsed_time = 0.0;
            match profile {
                Profile::LinearRamp => {
                    // One phase over the whole move.
                    b.segment_count = b.segments;
                    b.move_state = MoveState::Running2;
                }
                _ => {
                    b.segment_count = b.segments / 2;
                    b.move_state = if b.segment_count == 0 {
                        b.segment_count = b.segments;
                        MoveState::Running2
                    } else {
                        MoveState::Running1
                    };
                }
            }
        }

        if !queue.can_accept() {
            return Status::Again;
        }

        let b = *self.ring.get(i);
        let t = b.elapsed_time + b.segment_time;
        let velocity = match (profile, b.move_state) {
            // Concave phase: velocity departs Vi along the jerk curve.
            (Profile::Accel, MoveState::Running1) => b.initial_velocity + b.jerk_div2 * t * t,
            (Profile::Decel, MoveState::Running1) => b.initial_velocity - b.jerk_div2 * t * t,
            // Convex phase: velocity approaches Vt through the midpoint.
            (Profile::Accel, _) => {
                b.midpoint_velocity + t * b.midpoint_acceleration - b.jerk_div2 * t * t
            }
            (Profile::Decel, _) => {
                b.midpoint_velocity - t * b.midpoint_acceleration + b.jerk_div2 * t * t
            }
            (Profile::LinearRamp, _) => {
                b.initial_velocity + (b.target_velocity - b.initial_velocity) * (t / b.time)
            }
        };
        let velocity = velocity.max(0.0);

        let last_of_phase = b.segment_count == 1;
        let last_of_move = last_of_phase && b.move_state == MoveState::Running2;
        let target = if last_of_move {
            // Land exactly on the sub-move target so no drift accumulates.
            b.target
        } else {
            let mut target = self.position_inter;
            let micro = velocity * b.segment_time;
            for a in 0..crate::AXES {
                target[a] += b.unit_vec[a] * micro;
            }
            target
        };

        match self.emit_line(cfg, queue, target, b.segment_time) {
            Status::Ok => {}
            other => return other,
        }

        let b = self.ring.get_mut(i);
        b.segment_velocity = velocity;
        b.elapsed_time = t;
        b.segment_count -= 1;
        if b.segment_count == 0 {
            if b.move_state == MoveState::Running1 {
                b.move_state = MoveState::Running2;
                b.segment_count = b.segments - b.segments / 2;
                b.elapsed_time = 0.0;
                Status::Ok
            } else {
                Status::Complete
            }
        } else {
            Status::Ok
        }
    }

    /// Arcs advance theta one slice per pass and emit the chord as a line
    /// segment.
    fn run_arc(&mut self, cfg: &Config, queue: &mut SegmentQueue, i: usize) -> Status {
        if self.ring.get(i).segment_count == 0 {
            return Status::Complete;
        }
        if !queue.can_accept() {
            return Status::Again;
        }

        let b = *self.ring.get(i);
        let theta = b.theta + b.segment_theta;
        let target = if b.segment_count == 1 {
            b.target
        } else {
            let mut target = self.position_inter;
            target[b.axis_1] = b.center_1 + b.radius * theta.cos();
            target[b.axis_2] = b.center_2 + b.radius * theta.sin();
            target[b.axis_linear] += b.segment_linear;
            target
        };

        match self.emit_line(cfg, queue, target, b.segment_time) {
            Status::Ok => {}
            other => return other,
        }

        let b = self.ring.get_mut(i);
        b.theta = theta;
        b.segment_count -= 1;
        if b.segment_count == 0 {
            Status::Complete
        } else {
            Status::Ok
        }
    }

    fn run_dwell(&mut self, queue: &mut SegmentQueue, i: usize) -> Status {
        if !queue.can_accept() {
            return Status::Again;
        }
        let minutes = self.ring.get(i).time;
        let ticks = (minutes * 60.0 * F_DWELL).round().max(1.0) as u32;
        queue.push(MotorSegment {
            kind: SegmentKind::Dwell,
            timer_period: dwell_timer_period(),
            timer_ticks: ticks,
            motors: [MotorStep::default(); MOTORS],
        });
        Status::Complete
    }

    fn run_flow(&mut self, queue: &mut SegmentQueue, kind: SegmentKind) -> Status {
        if !queue.can_accept() {
            return Status::Again;
        }
        queue.push(MotorSegment {
            kind,
            ..Default::default()
        });
        Status::Complete
    }

    /// Emit one line segment from `position_inter` to `to` over `minutes`.
    ///
    /// Integer step deltas are taken between the rounded step positions of
    /// the two endpoints, so per-axis counts telescope exactly across
    /// segments.
    fn emit_line(&mut self, cfg: &Config, queue: &mut SegmentQueue, to: Vector, minutes: f64) -> Status {
        if !queue.can_accept() {
            return Status::Again;
        }
        let from = self.position_inter;
        let mut motors = [MotorStep::default(); MOTORS];
        for m in 0..MOTORS {
            let delta = motor_step_delta(cfg, m, &from, &to);
            motors[m] = MotorStep {
                steps: delta.unsigned_abs() as u32,
                dir: if delta < 0 { 1 } else { 0 },
            };
        }
        let ticks = (minutes * 60.0 * F_DDA).round().max(1.0) as u32;
        let status = queue.push(MotorSegment {
            kind: SegmentKind::Line,
            timer_period: dda_timer_period(),
            timer_ticks: ticks,
            motors,
        });
        if status == Status::Ok {
            self.position_inter = to;
        }
        status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Profile {
    Accel,
    Decel,
    LinearRamp,
}

/// Position of motor `m` in microsteps at machine position `pos`, applying
/// the axis mapping and axis mode.
fn motor_step_position(cfg: &Config, m: usize, pos: &Vector) -> i64 {
    let axis_cfg = &cfg.a[m];
    let source = axis_cfg.map_axis;
    let value = match axis_cfg.axis_mode {
        AxisMode::Disabled | AxisMode::Inhibited => return 0,
        AxisMode::Standard => pos[source],
        // Commanded in linear units; converted to degrees of rotation.
        AxisMode::Radius => pos[source] / (axis_cfg.radius * RAD_PER_DEG),
        AxisMode::SlaveX => pos[crate::X],
        AxisMode::SlaveY => pos[crate::Y],
        AxisMode::SlaveZ => pos[crate::Z],
        AxisMode::SlaveXy => pos[crate::X] + pos[crate::Y],
        AxisMode::SlaveXz => pos[crate::X] + pos[crate::Z],
        AxisMode::SlaveYz => pos[crate::Y] + pos[crate::Z],
        AxisMode::SlaveXyz => pos[crate::X] + pos[crate::Y] + pos[crate::Z],
    };
    (value * axis_cfg.steps_per_unit).round() as i64
}

fn motor_step_delta(cfg: &Config, m: usize, from: &Vector, to: &Vector) -> i64 {
    motor_step_position(cfg, m, to) - motor_step_position(cfg, m, from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stepper::SegmentQueue;
    use crate::{Status, AXES, X, Y};

    fn xy(x: f64, y: f64) -> Vector {
        let mut v = [0.0; AXES];
        v[X] = x;
        v[Y] = y;
        v
    }

    /// Pump the generator, draining segments into `out` as they appear.
    fn pump(p: &mut Planner, cfg: &Config, out: &mut Vec<MotorSegment>) {
        let mut q = SegmentQueue::new();
        loop {
            let st = p.run_move(cfg, &mut q);
            while let Some(seg) = q.pop() {
                out.push(seg);
            }
            match st {
                Status::Noop => break,
                Status::Ok | Status::Again => {}
                other => panic!("unexpected status {other:?}"),
            }
        }
    }

    fn net_steps(segs: &[MotorSegment], m: usize) -> i64 {
        segs.iter()
            .map(|s| {
                let st = s.motors[m];
                if st.dir == 1 {
                    -(st.steps as i64)
                } else {
                    st.steps as i64
                }
            })
            .sum()
    }

    #[test]
    fn cruise_emits_single_segment() {
        let cfg = Config::default();
        let mut p = Planner::new();
        assert_eq!(p.line(&cfg, xy(10.0, 0.0), 10.0 / 600.0), Status::Ok);
        let mut segs = Vec::new();
        pump(&mut p, &cfg, &mut segs);
        assert_eq!(segs.len(), 1);
        assert_eq!(net_steps(&segs, X), 12800);
        // One minute of travel at 600 mm/min for 10 mm: 1 s at 50 kHz.
        assert_eq!(segs[0].timer_ticks, 50_000);
        assert!(!p.is_busy());
    }

    #[test]
    fn aline_step_counts_telescope_exactly() {
        let cfg = Config::default();
        let mut p = Planner::new();
        // Diagonal move through a full head/body/tail profile.
        assert_eq!(p.aline(&cfg, xy(10.0, 5.0), 11.18 / 600.0), Status::Ok);
        let mut segs = Vec::new();
        pump(&mut p, &cfg, &mut segs);
        assert!(segs.len() > 3, "profile splits into many segments");
        assert_eq!(net_steps(&segs, X), (10.0f64 * 1280.0).round() as i64);
        assert_eq!(net_steps(&segs, Y), (5.0f64 * 1280.0).round() as i64);
        // The intermediate position lands on the target with no drift.
        assert_eq!(p.position_inter, xy(10.0, 5.0));
    }

    #[test]
    fn curve_velocity_rises_through_head() {
        let cfg = Config::default();
        let mut p = Planner::new();
        assert_eq!(p.aline(&cfg, xy(10.0, 0.0), 10.0 / 600.0), Status::Ok);
        let mut segs = Vec::new();
        pump(&mut p, &cfg, &mut segs);
        // Head segments are constant-time, so rising velocity shows up as
        // rising step counts.
        let first = segs[0].motors[X].steps;
        let mid = segs[segs.len() / 3].motors[X].steps;
        assert!(first < mid, "{first} < {mid}");
    }

    #[test]
    fn generator_yields_again_when_queue_is_full() {
        let cfg = Config::default();
        let mut p = Planner::new();
        assert_eq!(p.aline(&cfg, xy(10.0, 0.0), 10.0 / 600.0), Status::Ok);
        let mut q = SegmentQueue::new();
        // Run without draining: the queue fills and the generator parks.
        let mut saw_again = false;
        for _ in 0..64 {
            match p.run_move(&cfg, &mut q) {
                Status::Again => {
                    saw_again = true;
                    break;
                }
                Status::Ok => {}
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(saw_again);
        assert!(!q.can_accept());
        // Sub-move state did not advance past the stall: draining resumes
        // cleanly and the move still lands on target.
        let mut segs = Vec::new();
        while let Some(s) = q.pop() {
            segs.push(s);
        }
        pump(&mut p, &cfg, &mut segs);
        assert_eq!(net_steps(&segs, X), 12800);
    }

    #[test]
    fn dwell_ticks_at_dwell_rate() {
        let cfg = Config::default();
        let mut p = Planner::new();
        assert_eq!(p.dwell(2.5), Status::Ok);
        let mut segs = Vec::new();
        pump(&mut p, &cfg, &mut segs);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].kind, SegmentKind::Dwell);
        // 2.5 s at the 10 kHz dwell timer.
        assert_eq!(segs[0].timer_ticks, 25_000);
        assert!(segs[0].motors.iter().all(|m| m.steps == 0));
    }

    #[test]
    fn inhibited_axis_emits_no_steps() {
        let mut cfg = Config::default();
        cfg.a[Y].axis_mode = AxisMode::Inhibited;
        let mut p = Planner::new();
        assert_eq!(p.line(&cfg, xy(10.0, 10.0), 0.02), Status::Ok);
        let mut segs = Vec::new();
        pump(&mut p, &cfg, &mut segs);
        assert_eq!(net_steps(&segs, X), 12800);
        assert_eq!(net_steps(&segs, Y), 0);
    }
}

//! # Jerk-Limited Trajectory Planner
//!
//! This module translates target positions into queued sub-moves with a
//! third-order (S-curve) velocity profile, split into up to three regions:
//! an acceleration head, a cruise body, and a deceleration tail.
//!
//! ## Operation
//!
//! 1.  **`aline`**: A move arrives as a target vector and a duration. The
//!     entry velocity is chosen from the path control mode and the corner
//!     angle against the previously queued move.
//!
//! 2.  **Short-line reduction**: When the move is too short to reach its
//!     target velocity, the velocity is shrunk iteratively (linear
//!     approximation) until the head and tail fit.
//!
//! 3.  **Retro-edit**: The previously queued deceleration tail is rewritten
//!     so its exit velocity matches the new move's entry velocity, splitting
//!     it into a cruise body plus a shorter tail when the velocities differ.
//!
//! 4.  The queue always terminates in a deceleration to zero until the next
//!     move arrives and retro-edits it.

use tracing::debug;

use crate::buffer::{BufferRing, BufferState, MoveType, PlannerBuffer};
use crate::config::{Config, PathControl};
use crate::status::Status;
use crate::{linear_length, rotary_length, Vector, AXES, LINEAR_AXES};

/// Velocities closer than this (units/min) are treated as equal.
const V_EQUAL: f64 = 1e-6;

/// Path mode resolved for one incoming move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathMode {
    ExactStop,
    ExactPath,
    Continuous,
    ContinuousFromArc,
}

impl From<PathControl> for PathMode {
    fn from(p: PathControl) -> Self {
        match p {
            PathControl::ExactStop => PathMode::ExactStop,
            PathControl::ExactPath => PathMode::ExactPath,
            PathControl::Continuous => PathMode::Continuous,
        }
    }
}

/// Length consumed by a jerk-limited velocity transition from `v0` to `v1`.
pub(crate) fn transition_length(v1: f64, v0: f64, jerk: f64) -> f64 {
    let dv = (v1 - v0).abs();
    dv * (dv / jerk).sqrt()
}

/// The planner master state: the buffer ring plus end-of-queue bookkeeping.
#[derive(Debug)]
pub struct Planner {
    pub(crate) ring: BufferRing,
    /// Authoritative end-of-queue position.
    position: Vector,
    /// End of the last segment emitted by the segment generator.
    pub(crate) position_inter: Vector,
    /// Cruise velocity of the most recently planned move.
    previous_velocity: f64,
    /// Fractional direction change of the most recent junction, in [0, 1].
    angular_jerk: f64,
    /// Modal path control mode; the canonical machine keeps this current.
    path_control: PathControl,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub fn new() -> Self {
        Planner {
            ring: BufferRing::new(),
            position: [0.0; AXES],
            position_inter: [0.0; AXES],
            previous_velocity: 0.0,
            angular_jerk: 0.0,
            path_control: PathControl::Continuous,
        }
    }

    /// Set the modal path control mode used by subsequent [`Planner::aline`]
    /// calls.
    pub fn set_path_control(&mut self, mode: PathControl) {
        self.path_control = mode;
    }

    /// End-of-queue logical position (not the physical position).
    pub fn position(&self) -> Vector {
        self.position
    }

    /// End position of the last motor segment emitted. This is the closest
    /// available estimate of the physical position.
    pub fn intermediate_position(&self) -> Vector {
        self.position_inter
    }

    pub fn previous_velocity(&self) -> f64 {
        self.previous_velocity
    }

    /// True if `n` planner buffers can be claimed for writing.
    pub fn buffers_free(&self, n: usize) -> bool {
        self.ring.buffers_free(n)
    }

    /// True while any sub-move is queued or running.
    pub fn is_busy(&self) -> bool {
        self.ring.is_busy()
    }

    /// Set the logical position without motion. Also resynchronizes the
    /// segment generator's intermediate position.
    pub fn set_position(&mut self, position: Vector) {
        self.position = position;
        self.position_inter = position;
    }

    /// Commit a queued move's end position and cruise velocity. Used by the
    /// planner entry points after a successful queue write.
    pub(crate) fn set_queue_position(&mut self, target: Vector, velocity: f64) {
        self.position = target;
        self.previous_velocity = velocity;
    }

    /// Discard all queued sub-moves. The logical position falls back to the
    /// end of the last emitted segment.
    pub fn flush(&mut self) {
        self.ring.flush();
        self.position = self.position_inter;
        self.previous_velocity = 0.0;
    }

    /// Plan an acceleration-managed line to `target` taking `minutes`.
    ///
    /// The caller must have verified at least
    /// [`crate::buffer::BUFFERS_NEEDED`] free write slots.
    pub fn aline(&mut self, cfg: &Config, target: Vector, minutes: f64) -> Status {
        match self.aline_inner(cfg, target, minutes) {
            Ok(()) => Status::Ok,
            Err(status) => status,
        }
    }

    fn aline_inner(&mut self, cfg: &Config, target: Vector, minutes: f64) -> Result<(), Status> {
        let mut length = linear_length(&self.position, &target);
        if length < cfg.m.min_segment_len {
            // Pure-rotary moves plan in degrees.
            length = rotary_length(&self.position, &target);
            if length < cfg.m.min_segment_len {
                return Err(Status::ZeroLengthMove);
            }
        }
        if !(minutes.is_finite() && minutes > 0.0) {
            return Err(Status::FloatingPointError);
        }

        let jerk = cfg.m.max_linear_jerk;
        let mut vt = length / minutes;

        // Look behind at the most recently queued sub-move.
        let prev = *self.ring.get(self.ring.get_previous());
        let prev_queued_tail =
            prev.buffer_state == BufferState::Queued && prev.move_type == MoveType::Decel;
        let prev_is_arc = prev.move_type == MoveType::Arc
            && matches!(prev.buffer_state, BufferState::Queued | BufferState::Running);

        let (mut path_mode, vp) = if prev_is_arc {
            (PathMode::ContinuousFromArc, prev.target_velocity)
        } else {
            (self.path_control.into(), prev.initial_velocity)
        };

        let mut unit = [0.0; AXES];
        for i in 0..AXES {
            unit[i] = (target[i] - self.position[i]) / length;
        }

        // Angular jerk: fractional direction change against the previous
        // unit vector, linear axes only.
        let mut aj = 0.0;
        if prev.buffer_state != BufferState::Empty {
            let mut sq = 0.0;
            for i in 0..LINEAR_AXES {
                let d = unit[i] - prev.unit_vec[i];
                sq += d * d;
            }
            aj = sq.sqrt() / 2.0;
        }
        self.angular_jerk = aj;

        if !prev_is_arc {
            if !prev_queued_tail {
                // No editable junction to blend with.
                path_mode = PathMode::ExactStop;
            } else {
                if path_mode == PathMode::Continuous && aj > cfg.m.angular_jerk_lower {
                    path_mode = PathMode::ExactPath;
                }
                if path_mode == PathMode::ExactPath && aj > cfg.m.angular_jerk_upper {
                    path_mode = PathMode::ExactStop;
                }
            }
        }

        let mut vi = match path_mode {
            PathMode::ExactStop => 0.0,
            PathMode::ContinuousFromArc => vp,
            PathMode::ExactPath | PathMode::Continuous => {
                if vt > vp {
                    vp
                } else {
                    vt
                }
            }
        };
        if path_mode == PathMode::ExactPath {
            // `aj` is the fractional direction change, not its complement: a
            // larger direction change scales the junction velocity up.
            // Integrators depend on this orientation.
            vi *= aj;
        }

        let mut head_len = if vt > vi + V_EQUAL {
            transition_length(vt, vi, jerk)
        } else {
            0.0
        };
        let mut tail_len = transition_length(vt, 0.0, jerk);

        // Short-line reduction: shrink Vt until head + tail fit.
        let mut regions = 3u8;
        if length <= head_len + tail_len {
            let mut v = vt;
            let mut converged = false;
            for _ in 0..cfg.m.reduction_max_iterations {
                v *= length / (head_len + tail_len);
                if v <= vi {
                    break;
                }
                head_len = if v > vi + V_EQUAL {
                    transition_length(v, vi, jerk)
                } else {
                    0.0
                };
                tail_len = transition_length(v, 0.0, jerk);
                if (length - head_len - tail_len).abs() < cfg.m.reduction_tolerance {
                    converged = true;
                    break;
                }
            }
            if v <= vi {
                // Cannot even hold the entry velocity: the whole move is one
                // deceleration region.
                vi = v;
                vt = v;
                regions = 1;
            } else if converged {
                vt = v;
                regions = 2;
            } else {
                return Err(Status::FailedToConverge);
            }
        }

        debug!(
            length,
            vi, vt, aj, regions, ?path_mode,
            "aline planned"
        );

        // Rewrite the previously queued tail so its exit velocity matches Vi.
        if matches!(path_mode, PathMode::Continuous | PathMode::ExactPath) {
            self.recompute_previous_tail(cfg, vi, vp)?;
        }

        let mut from = self.position;
        match regions {
            3 => {
                if head_len > 0.0 {
                    from = self.queue_region(cfg, MoveType::Accel, vi, vt, head_len, from, unit, None)?;
                }
                let body_len = length - head_len - tail_len;
                from = self.queue_region(cfg, MoveType::Cruise, vt, vt, body_len, from, unit, None)?;
                self.queue_region(cfg, MoveType::Decel, vt, 0.0, tail_len, from, unit, Some(target))?;
            }
            2 => {
                from = self.queue_region(cfg, MoveType::Accel, vi, vt, head_len, from, unit, None)?;
                self.queue_region(cfg, MoveType::Decel, vt, 0.0, tail_len, from, unit, Some(target))?;
            }
            _ => {
                self.queue_region(cfg, MoveType::Decel, vi, 0.0, length, from, unit, Some(target))?;
            }
        }

        self.position = target;
        self.previous_velocity = vt;
        Ok(())
    }

    /// Queue one velocity region. Returns the region's end position for
    /// chaining; the final region passes `final_target` so the sub-move chain
    /// lands on the commanded target exactly.
    #[allow(clippy::too_many_arguments)]
    fn queue_region(
        &mut self,
        cfg: &Config,
        move_type: MoveType,
        vi: f64,
        vt: f64,
        len: f64,
        from: Vector,
        unit: Vector,
        final_target: Option<Vector>,
    ) -> Result<Vector, Status> {
        let target = final_target.unwrap_or_else(|| {
            let mut t = from;
            for i in 0..AXES {
                t[i] += unit[i] * len;
            }
            t
        });
        let i = self.ring.get_write().ok_or(Status::BufferFullFatal)?;
        let b = self.ring.get_mut(i);
        b.unit_vec = unit;
        b.target = target;
        b.steps = step_delta(cfg, &from, &target);
        b.length = len;
        b.initial_velocity = vi;
        b.target_velocity = vt;
        let mid = (vi + vt) / 2.0;
        b.time = if mid > 0.0 { len / mid } else { 0.0 };
        self.ring.queue_write(move_type);
        Ok(target)
    }

    /// Rewrite the previously queued deceleration tail so it exits at `vi`
    /// instead of zero.
    ///
    /// `vi == vp`: the tail becomes a cruise extension. Otherwise the tail is
    /// shortened to a cruise body at `vp` and a fresh `vp -> vi` deceleration
    /// is appended. The replacement tail length is taken from the magnitude
    /// of the velocity change, which also covers an accelerating join
    /// (`vi > vp`).
    fn recompute_previous_tail(&mut self, cfg: &Config, vi: f64, vp: f64) -> Result<(), Status> {
        let prev_i = self.ring.get_previous();
        let prev = *self.ring.get(prev_i);
        if prev.buffer_state != BufferState::Queued || prev.move_type != MoveType::Decel {
            return Ok(());
        }
        if vi < V_EQUAL {
            return Ok(());
        }

        let old_length = prev.length;
        if (vi - vp).abs() < V_EQUAL {
            let b = self.ring.get_mut(prev_i);
            b.move_type = MoveType::Cruise;
            b.initial_velocity = vp;
            b.target_velocity = vp;
            b.time = old_length / vp;
            return Ok(());
        }

        let tail_len = transition_length(vp, vi, cfg.m.max_linear_jerk);
        if tail_len >= old_length - cfg.m.min_segment_len {
            // No room to split off a body: retune the whole buffer.
            let b = self.ring.get_mut(prev_i);
            b.initial_velocity = vp;
            b.target_velocity = vi;
            b.time = old_length / ((vp + vi) / 2.0);
            return Ok(());
        }

        let body_len = old_length - tail_len;
        let unit = prev.unit_vec;
        let tail_target = prev.target;
        let mut body_target = tail_target;
        for i in 0..AXES {
            body_target[i] -= unit[i] * tail_len;
        }
        let mut body_from = tail_target;
        for i in 0..AXES {
            body_from[i] -= unit[i] * old_length;
        }

        {
            let b = self.ring.get_mut(prev_i);
            b.move_type = MoveType::Cruise;
            b.length = body_len;
            b.time = body_len / vp;
            b.initial_velocity = vp;
            b.target_velocity = vp;
            b.target = body_target;
            b.steps = step_delta(cfg, &body_from, &body_target);
        }

        let t = self.ring.get_write().ok_or(Status::BufferFullFatal)?;
        let b = self.ring.get_mut(t);
        b.unit_vec = unit;
        b.target = tail_target;
        b.steps = step_delta(cfg, &body_target, &tail_target);
        b.length = tail_len;
        b.initial_velocity = vp;
        b.target_velocity = vi;
        b.time = tail_len / ((vp + vi) / 2.0);
        self.ring.queue_write(MoveType::Decel);
        Ok(())
    }

    /// Queue a constant-rate line (acceleration management disabled).
    pub fn line(&mut self, cfg: &Config, target: Vector, minutes: f64) -> Status {
        let mut length = linear_length(&self.position, &target);
        if length < cfg.m.min_segment_len {
            length = rotary_length(&self.position, &target);
            if length < cfg.m.min_segment_len {
                return Status::ZeroLengthMove;
            }
        }
        if !(minutes.is_finite() && minutes > 0.0) {
            return Status::FloatingPointError;
        }
        let from = self.position;
        let mut unit = [0.0; AXES];
        for i in 0..AXES {
            unit[i] = (target[i] - from[i]) / length;
        }
        let Some(i) = self.ring.get_write() else {
            return Status::BufferFullNonFatal;
        };
        let velocity = length / minutes;
        let b = self.ring.get_mut(i);
        b.unit_vec = unit;
        b.target = target;
        b.steps = step_delta(cfg, &from, &target);
        b.length = length;
        b.time = minutes;
        b.initial_velocity = velocity;
        b.target_velocity = velocity;
        self.ring.queue_write(MoveType::Line);
        self.position = target;
        self.previous_velocity = velocity;
        Status::Ok
    }

    /// Queue a dwell of `seconds`.
    pub fn dwell(&mut self, seconds: f64) -> Status {
        let Some(i) = self.ring.get_write() else {
            return Status::BufferFullNonFatal;
        };
        let b = self.ring.get_mut(i);
        b.target = self.position;
        b.time = seconds / 60.0;
        self.ring.queue_write(MoveType::Dwell);
        Status::Ok
    }

    /// Queue a flow-control marker (start/stop/end).
    pub fn queue_flow(&mut self, move_type: MoveType) -> Status {
        debug_assert!(matches!(
            move_type,
            MoveType::Start | MoveType::Stop | MoveType::End
        ));
        let Some(i) = self.ring.get_write() else {
            return Status::BufferFullNonFatal;
        };
        let b = self.ring.get_mut(i);
        b.target = self.position;
        self.ring.queue_write(move_type);
        Status::Ok
    }

    /// Collect the queued sub-moves in FIFO order. Test and status support.
    pub fn queued(&self) -> Vec<PlannerBuffer> {
        let mut out = Vec::new();
        let mut i = self.ring.get_run_cursor();
        for _ in 0..crate::PLANNER_BUFFERS {
            let b = self.ring.get(i);
            if !matches!(b.buffer_state, BufferState::Empty) {
                out.push(*b);
            }
            i = (i + 1) % crate::PLANNER_BUFFERS;
        }
        out
    }
}

/// Integer step delta between two positions, per axis.
///
/// Positions are rounded to step counts and differenced, so consecutive
/// deltas telescope exactly with no accumulated rounding drift.
pub(crate) fn step_delta(cfg: &Config, from: &Vector, to: &Vector) -> [i32; AXES] {
    let mut steps = [0i32; AXES];
    for i in 0..AXES {
        let spu = cfg.a[i].steps_per_unit;
        steps[i] = ((to[i] * spu).round() - (from[i] * spu).round()) as i32;
    }
    steps
}

//! Arc planner.
//!
//! Converts arc endpoints plus center offsets (or a radius) into a single
//! queued `Arc` sub-move that the segment generator unrolls into short
//! constant-time line segments at run time.

use std::f64::consts::TAU;

use crate::buffer::MoveType;
use crate::config::Config;
use crate::planner::{step_delta, Planner};
use crate::status::Status;
use crate::Vector;

/// Quadrant-correct angle of the point `(x, y)` about the origin.
fn arc_theta(x: f64, y: f64) -> f64 {
    y.atan2(x)
}

impl Planner {
    /// Queue an arc from the current position to `target`.
    ///
    /// `offset` holds the center offsets for the linear axes (I/J/K words).
    /// When `radius_mode` is set the center is constructed from `radius`
    /// instead: the negative-radius convention selects the longer of the two
    /// candidate arcs. `plane` is `(axis_1, axis_2, axis_linear)`.
    #[allow(clippy::too_many_arguments)]
    pub fn arc(
        &mut self,
        cfg: &Config,
        target: Vector,
        offset: [f64; 3],
        radius: f64,
        radius_mode: bool,
        clockwise: bool,
        minutes: f64,
        plane: (usize, usize, usize),
    ) -> Status {
        match self.arc_inner(cfg, target, offset, radius, radius_mode, clockwise, minutes, plane) {
            Ok(()) => Status::Ok,
            Err(status) => status,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn arc_inner(
        &mut self,
        cfg: &Config,
        target: Vector,
        offset: [f64; 3],
        radius: f64,
        radius_mode: bool,
        clockwise: bool,
        minutes: f64,
        plane: (usize, usize, usize),
    ) -> Result<(), Status> {
        let (a1, a2, alin) = plane;
        let pos = self.position();

        let (off1, off2) = if radius_mode {
            let x = target[a1] - pos[a1];
            let y = target[a2] - pos[a2];
            if x == 0.0 && y == 0.0 {
                return Err(Status::ArcSpecificationError);
            }
            // Midpoint-perpendicular construction of the circle center.
            let mut h_x2_div_d = -(4.0 * radius * radius - x * x - y * y).sqrt() / x.hypot(y);
            if !clockwise {
                h_x2_div_d = -h_x2_div_d;
            }
            if radius < 0.0 {
                h_x2_div_d = -h_x2_div_d;
            }
            // A non-real center means the endpoint is out of reach.
            if !h_x2_div_d.is_finite() {
                return Err(Status::ArcSpecificationError);
            }
            ((x - y * h_x2_div_d) / 2.0, (y + x * h_x2_div_d) / 2.0)
        } else {
            if offset[a1] == 0.0 && offset[a2] == 0.0 {
                return Err(Status::ArcSpecificationError);
            }
            (offset[a1], offset[a2])
        };

        let arc_radius = off1.hypot(off2);
        let center_1 = pos[a1] + off1;
        let center_2 = pos[a2] + off2;

        let theta_start = arc_theta(-off1, -off2);
        let theta_end = arc_theta(target[a1] - center_1, target[a2] - center_2);
        if !theta_start.is_finite() || !theta_end.is_finite() {
            return Err(Status::FloatingPointError);
        }

        // Counterclockwise-positive angular travel.
        let mut angular_travel = theta_end - theta_start;
        if angular_travel <= 0.0 {
            angular_travel += TAU;
        }
        if clockwise {
            angular_travel -= TAU;
        }

        let linear_travel = target[alin] - pos[alin];
        let length = (angular_travel * arc_radius).hypot(linear_travel);
        if length < cfg.m.mm_per_arc_segment {
            return Err(Status::ZeroLengthMove);
        }
        if !(minutes.is_finite() && minutes > 0.0) {
            return Err(Status::FloatingPointError);
        }

        let by_time = minutes * 60.0e6 / cfg.m.min_segment_time_us;
        let by_length = length / cfg.m.mm_per_arc_segment;
        let segments = by_time.min(by_length).ceil().max(1.0) as u32;

        let i = self.ring.get_write().ok_or(Status::BufferFullNonFatal)?;
        let velocity = length / minutes;
        let b = self.ring.get_mut(i);
        b.target = target;
        b.steps = step_delta(cfg, &pos, &target);
        b.length = length;
        b.time = minutes;
        b.initial_velocity = velocity;
        b.target_velocity = velocity;
        b.theta = theta_start;
        b.radius = arc_radius;
        b.center_1 = center_1;
        b.center_2 = center_2;
        b.segment_theta = angular_travel / segments as f64;
        b.segment_linear = linear_travel / segments as f64;
        b.segment_time = minutes / segments as f64;
        b.segments = segments;
        b.segment_count = segments;
        b.axis_1 = a1;
        b.axis_2 = a2;
        b.axis_linear = alin;
        self.ring.queue_write(MoveType::Arc);

        self.set_queue_position(target, velocity);
        Ok(())
    }
}

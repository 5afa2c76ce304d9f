//! # Motion Control Crate
//!
//! A deterministic jerk-limited motion core for a G-code CNC controller.
//!
//! Provides the two queue stages between canonical moves and step pulses:
//! - Planner buffer ring and the `aline` trajectory planner (head/body/tail
//!   velocity regions, corner retro-editing)
//! - Arc planner (arcs decomposed into constant-time line segments)
//! - Segment generator (sub-moves sliced into integer step deltas)
//! - Motor segment queue and the timer-style step DDA
//!
//! All positions are millimeters (degrees for rotary axes) and all times are
//! minutes; conversions happen at the parse boundary, never in here.

pub mod arc;
pub mod buffer;
pub mod config;
pub mod planner;
pub mod segment;
pub mod status;
pub mod stepper;

// Re-export core types for easier access
pub use buffer::{BufferState, MoveState, MoveType, PlannerBuffer, PLANNER_BUFFERS};
pub use config::{AxisConfig, AxisMode, Config, MachineConfig, PathControl, Plane, Units};
pub use planner::Planner;
pub use status::Status;
pub use stepper::{Dda, MotorSegment, SegmentKind, SegmentQueue, StepRecorder, StepSink};

/// Number of logical axes. The first three are linear (mm), the rest rotary
/// (degrees).
pub const AXES: usize = 6;

/// Number of linear axes (X, Y, Z). Length computations only use these.
pub const LINEAR_AXES: usize = 3;

/// Number of motor outputs. Motors map onto axes through
/// [`AxisConfig::map_axis`].
pub const MOTORS: usize = AXES;

pub const X: usize = 0;
pub const Y: usize = 1;
pub const Z: usize = 2;
pub const A: usize = 3;
pub const B: usize = 4;
pub const C: usize = 5;

/// Sentinel for settings records that are not bound to an axis.
pub const NON_AXIS: i8 = -1;

/// An ordered tuple of one `f64` per axis. Positions, targets, unit vectors
/// and offsets are all `Vector`s.
pub type Vector = [f64; AXES];

pub const AXIS_NAMES: [char; AXES] = ['X', 'Y', 'Z', 'A', 'B', 'C'];

/// Euclidean length of the linear portion of `to - from`.
///
/// Rotary axes are never mixed into length computations.
pub fn linear_length(from: &Vector, to: &Vector) -> f64 {
    let mut dist_sq = 0.0;
    for i in 0..LINEAR_AXES {
        let delta = to[i] - from[i];
        dist_sq += delta * delta;
    }
    dist_sq.sqrt()
}

/// Euclidean length of the rotary portion of `to - from`, in degrees.
pub fn rotary_length(from: &Vector, to: &Vector) -> f64 {
    let mut dist_sq = 0.0;
    for i in LINEAR_AXES..AXES {
        let delta = to[i] - from[i];
        dist_sq += delta * delta;
    }
    dist_sq.sqrt()
}

//! Machine and per-axis configuration.
//!
//! Strongly-typed settings consumed by the planner, segment generator and
//! DDA. Derived values (`steps_per_unit`, the whole-step rate caps) are
//! recomputed on the apply side so the primary and derived fields can never
//! drift apart.

use crate::status::Status;
use crate::{Vector, AXES, LINEAR_AXES};

/// Operating mode of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisMode {
    Disabled,
    #[default]
    Standard,
    /// Planned normally but emits no steps.
    Inhibited,
    /// Rotary axis addressed in linear units through [`AxisConfig::radius`].
    Radius,
    SlaveX,
    SlaveY,
    SlaveZ,
    SlaveXy,
    SlaveXz,
    SlaveYz,
    SlaveXyz,
}

impl AxisMode {
    pub fn from_ordinal(v: u8) -> Option<AxisMode> {
        Some(match v {
            0 => AxisMode::Disabled,
            1 => AxisMode::Standard,
            2 => AxisMode::Inhibited,
            3 => AxisMode::Radius,
            4 => AxisMode::SlaveX,
            5 => AxisMode::SlaveY,
            6 => AxisMode::SlaveZ,
            7 => AxisMode::SlaveXy,
            8 => AxisMode::SlaveXz,
            9 => AxisMode::SlaveYz,
            10 => AxisMode::SlaveXyz,
            _ => return None,
        })
    }

    pub fn ordinal(self) -> u8 {
        match self {
            AxisMode::Disabled => 0,
            AxisMode::Standard => 1,
            AxisMode::Inhibited => 2,
            AxisMode::Radius => 3,
            AxisMode::SlaveX => 4,
            AxisMode::SlaveY => 5,
            AxisMode::SlaveZ => 6,
            AxisMode::SlaveXy => 7,
            AxisMode::SlaveXz => 8,
            AxisMode::SlaveYz => 9,
            AxisMode::SlaveXyz => 10,
        }
    }
}

/// RS-274 plane selection (G17/G18/G19).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Plane {
    #[default]
    Xy,
    Xz,
    Yz,
}

/// RS-274 length units (G20/G21).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    Inches,
    #[default]
    Mm,
}

/// RS-274 path control mode (G61 / G61.1 / G64).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathControl {
    ExactStop,
    ExactPath,
    #[default]
    Continuous,
}

/// Per-axis configuration record.
#[derive(Debug, Clone, Copy)]
pub struct AxisConfig {
    /// Axis index this motor output drives. Identity by default.
    pub map_axis: usize,
    pub axis_mode: AxisMode,
    /// Degrees per whole motor step (e.g. 1.8).
    pub step_angle: f64,
    /// Units of travel per motor revolution (mm linear, degrees rotary).
    pub travel_per_rev: f64,
    /// Microstep divisor: 1, 2, 4 or 8.
    pub microsteps: u8,
    /// Step polarity: 0 or 1; XORed into the direction bit at segment load.
    pub polarity: u8,
    /// Derived: microsteps per unit of travel.
    pub steps_per_unit: f64,
    /// Maximum traverse rate, units/min.
    pub max_seek_rate: f64,
    /// Maximum feed rate, units/min.
    pub max_feed_rate: f64,
    /// Derived: whole steps per second at `max_seek_rate`.
    pub seek_steps_sec: f64,
    /// Derived: whole steps per second at `max_feed_rate`.
    pub feed_steps_sec: f64,
    /// Soft travel limit, units from home.
    pub travel_max: f64,
    /// Rotary axes only: effective radius, mm per radian.
    pub radius: f64,
    /// Disable motor coils when the axis is idle.
    pub power_mode_idle: bool,
    /// Limit switch handling enabled for this axis.
    pub limit_mode: bool,
    pub homing_enable: bool,
    /// Homing seek rate, units/min.
    pub homing_rate: f64,
    /// Homing re-approach rate, units/min.
    pub homing_close_rate: f64,
    /// Logical position of the limit switch.
    pub homing_offset: f64,
    /// Distance to back off the switch after it fires.
    pub homing_backoff: f64,
}

impl AxisConfig {
    /// Whole steps per unit of travel, independent of microstepping.
    pub fn whole_steps_per_unit(&self) -> f64 {
        360.0 / self.step_angle / self.travel_per_rev
    }

    /// Recompute every derived field from the primary fields.
    pub fn recompute(&mut self) {
        self.steps_per_unit = 360.0 / (self.step_angle / self.microsteps as f64) / self.travel_per_rev;
        self.seek_steps_sec = self.max_seek_rate * self.whole_steps_per_unit() / 60.0;
        self.feed_steps_sec = self.max_feed_rate * self.whole_steps_per_unit() / 60.0;
    }

    /// Set the seek rate from a whole-steps-per-second figure, keeping the
    /// rate pair consistent.
    pub fn set_seek_steps(&mut self, steps_sec: f64) {
        self.max_seek_rate = steps_sec * 60.0 / self.whole_steps_per_unit();
        self.recompute();
    }

    /// Set the feed rate from a whole-steps-per-second figure.
    pub fn set_feed_steps(&mut self, steps_sec: f64) {
        self.max_feed_rate = steps_sec * 60.0 / self.whole_steps_per_unit();
        self.recompute();
    }
}

/// Machine-wide configuration record.
#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    /// Maximum jerk for linear moves, units/min^3.
    pub max_linear_jerk: f64,
    /// Angular jerk above which exact-path degrades to exact-stop.
    pub angular_jerk_upper: f64,
    /// Angular jerk above which continuous degrades to exact-path.
    pub angular_jerk_lower: f64,
    /// Shortest line the planner will queue, mm.
    pub min_segment_len: f64,
    /// Shortest segment the generator will emit, microseconds.
    pub min_segment_time_us: f64,
    /// Arc tessellation granularity, mm of arc travel per line segment.
    pub mm_per_arc_segment: f64,
    /// When false, moves are queued as constant-rate lines with no
    /// acceleration management.
    pub accel_enabled: bool,
    /// Run the homing cycle as part of application startup.
    pub homing_on_startup: bool,
    /// Convergence window for the short-line velocity reduction loop, mm.
    pub reduction_tolerance: f64,
    /// Iteration cap for the short-line velocity reduction loop.
    pub reduction_max_iterations: u32,
    // Power-on defaults for the canonical G-code model.
    pub gcode_plane: Plane,
    pub gcode_units: Units,
    pub gcode_path_control: PathControl,
    pub gcode_distance_absolute: bool,
    pub gcode_feed_rate: f64,
    pub gcode_spindle_speed: f64,
    pub gcode_tool: u8,
}

impl MachineConfig {
    /// Minimum segment time in minutes (internal time unit).
    pub fn min_segment_time_min(&self) -> f64 {
        self.min_segment_time_us / 60.0e6
    }
}

/// The whole configuration store: machine record plus one record per axis.
#[derive(Debug, Clone)]
pub struct Config {
    pub m: MachineConfig,
    pub a: [AxisConfig; AXES],
}

impl Default for Config {
    fn default() -> Self {
        let mut cfg = Config {
            m: MachineConfig {
                max_linear_jerk: 50_000_000.0,
                angular_jerk_upper: 0.8,
                angular_jerk_lower: 0.05,
                min_segment_len: 0.03,
                min_segment_time_us: 10_000.0,
                mm_per_arc_segment: 0.1,
                accel_enabled: true,
                homing_on_startup: false,
                reduction_tolerance: 0.002,
                reduction_max_iterations: 40,
                gcode_plane: Plane::Xy,
                gcode_units: Units::Mm,
                gcode_path_control: PathControl::Continuous,
                gcode_distance_absolute: true,
                gcode_feed_rate: 400.0,
                gcode_spindle_speed: 1500.0,
                gcode_tool: 1,
            },
            a: [AxisConfig {
                map_axis: 0,
                axis_mode: AxisMode::Standard,
                step_angle: 1.8,
                travel_per_rev: 1.25,
                microsteps: 8,
                polarity: 0,
                steps_per_unit: 0.0,
                max_seek_rate: 1500.0,
                max_feed_rate: 1200.0,
                seek_steps_sec: 0.0,
                feed_steps_sec: 0.0,
                travel_max: 400.0,
                radius: 10.0,
                power_mode_idle: true,
                limit_mode: true,
                homing_enable: true,
                homing_rate: 500.0,
                homing_close_rate: 25.0,
                homing_offset: 0.0,
                homing_backoff: 5.0,
            }; AXES],
        };
        for (i, axis) in cfg.a.iter_mut().enumerate() {
            axis.map_axis = i;
        }
        // Z travels less and homes slower on the reference machine.
        cfg.a[crate::Z].travel_max = 100.0;
        cfg.a[crate::Z].homing_rate = 250.0;
        // Rotary axes: degrees, one revolution of travel, no homing.
        for axis in cfg.a[LINEAR_AXES..].iter_mut() {
            axis.travel_per_rev = 360.0;
            axis.travel_max = 360.0;
            axis.max_seek_rate = 7200.0;
            axis.max_feed_rate = 7200.0;
            axis.homing_enable = false;
        }
        cfg.a[crate::A].homing_enable = true;
        cfg.recompute();
        cfg
    }
}

impl Config {
    pub fn recompute(&mut self) {
        for axis in self.a.iter_mut() {
            axis.recompute();
        }
    }

    /// Largest per-axis feed rate; used for canonical feed validation.
    pub fn max_feed_rate(&self) -> f64 {
        self.a.iter().fold(0.0, |m, a| m.max(a.max_feed_rate))
    }

    /// Soft travel check for a target position. Linear axes only; rotary
    /// axes wrap.
    pub fn check_travel(&self, target: &Vector) -> Status {
        for i in 0..LINEAR_AXES {
            if target[i].abs() > self.a[i].travel_max {
                return Status::MaxTravelExceeded;
            }
        }
        Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_per_unit_invariant() {
        let cfg = Config::default();
        for axis in cfg.a.iter() {
            let expect = 360.0 / (axis.step_angle / axis.microsteps as f64) / axis.travel_per_rev;
            let err = (axis.steps_per_unit - expect).abs() / expect;
            assert!(err < 1e-6);
        }
        // 1.8 deg, x8 microsteps, 1.25 mm/rev -> 1280 steps/mm
        assert!((cfg.a[crate::X].steps_per_unit - 1280.0).abs() < 1e-9);
    }

    #[test]
    fn rate_and_steps_stay_consistent() {
        let mut axis = Config::default().a[crate::X];
        axis.max_seek_rate = 1500.0;
        axis.recompute();
        // 1500 mm/min at 160 whole steps/mm = 4000 whole steps/sec
        assert!((axis.seek_steps_sec - 4000.0).abs() < 1e-9);

        // Round-trip through the steps-side setter.
        axis.set_seek_steps(2000.0);
        assert!((axis.max_seek_rate - 750.0).abs() < 1e-9);
        assert!((axis.seek_steps_sec - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn travel_check() {
        let cfg = Config::default();
        let mut target = [0.0; AXES];
        target[crate::X] = 399.0;
        assert_eq!(cfg.check_travel(&target), Status::Ok);
        target[crate::X] = 401.0;
        assert_eq!(cfg.check_travel(&target), Status::MaxTravelExceeded);
    }
}

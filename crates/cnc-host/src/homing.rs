//! Homing cycle.
//!
//! A nested continuation polled by the scheduler. Each enabled axis in turn
//! seeks toward its limit switch at the homing rate, stops when the switch
//! throws (or the full travel is consumed against the hard stop), backs off
//! at the close rate, and records its logical position as
//! `homing_offset + homing_backoff`. The canonical model is shadowed for
//! the duration of the cycle and restored before the final traverse to
//! zero.
//!
//! The cycle queues at most one move per scheduler pass and never advances
//! while motion is still draining.

use motion::stepper::SegmentQueue;
use motion::{Config, Dda, PathControl, Planner, Status, AXES};
use tracing::{info, warn};

use crate::canon::CanonicalMachine;
use crate::lineio::Limits;

/// Axes the cycle homes, in order.
const HOMED_AXES: usize = 4; // X, Y, Z, A

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HomingState {
    Off,
    New,
    PreBackoffStart,
    PreBackoffWait,
    AxisStart(usize),
    AxisSeekWait(usize),
    AxisBackoffStart(usize),
    AxisBackoffWait(usize),
    ReturnToZeroStart,
    ReturnToZeroWait,
}

#[derive(Debug)]
pub struct HomingCycle {
    state: HomingState,
    homed: [bool; AXES],
}

impl Default for HomingCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl HomingCycle {
    pub fn new() -> Self {
        HomingCycle {
            state: HomingState::Off,
            homed: [false; AXES],
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != HomingState::Off
    }

    /// Request a homing cycle; picked up on the next scheduler pass.
    pub fn start(&mut self) {
        if self.state == HomingState::Off {
            self.state = HomingState::New;
        }
    }

    /// Abort without restoring anything beyond the canonical model.
    pub fn abort(&mut self, cm: &mut CanonicalMachine) {
        if self.is_active() && self.state != HomingState::New {
            cm.restore_state();
        }
        self.state = HomingState::Off;
    }

    /// One scheduler pass. `Noop` when off, `Again` while waiting on motion,
    /// `Ok` when a step was taken, `Complete` when the cycle finished.
    pub fn poll(
        &mut self,
        cfg: &Config,
        cm: &mut CanonicalMachine,
        planner: &mut Planner,
        queue: &mut SegmentQueue,
        dda: &mut Dda,
        limits: &Limits,
    ) -> Status {
        let idle = !planner.is_busy() && queue.is_empty() && dda.is_idle();
        match self.state {
            HomingState::Off => Status::Noop,

            HomingState::New => {
                info!("homing cycle started");
                cm.save_state();
                cm.set_distance_mode(true);
                cm.use_length_units(false);
                cm.set_motion_control_mode(planner, PathControl::ExactStop);
                self.homed = [false; AXES];
                self.state = if limits.any_thrown() {
                    HomingState::PreBackoffStart
                } else {
                    HomingState::AxisStart(0)
                };
                Status::Ok
            }

            HomingState::PreBackoffStart => {
                if !idle {
                    return Status::Again;
                }
                // Move every thrown axis off its switch before seeking.
                let mut target = cm.gm.position;
                let mut rate = f64::MAX;
                let mut any = false;
                for i in 0..HOMED_AXES {
                    if limits.is_thrown(i) && cfg.a[i].homing_enable {
                        target[i] += cfg.a[i].homing_backoff;
                        rate = rate.min(cfg.a[i].homing_close_rate);
                        limits.clear(i);
                        any = true;
                    }
                }
                if !any {
                    limits.clear_all();
                    self.state = HomingState::AxisStart(0);
                    return Status::Ok;
                }
                cm.gm.feed_rate = rate;
                let st = cm.straight_feed(cfg, planner, target);
                if st.is_error() {
                    return self.fail(cm, st);
                }
                self.state = HomingState::PreBackoffWait;
                Status::Ok
            }

            HomingState::PreBackoffWait => {
                if !idle {
                    return Status::Again;
                }
                self.state = HomingState::AxisStart(0);
                Status::Ok
            }

            HomingState::AxisStart(axis) => {
                if axis >= HOMED_AXES {
                    self.state = HomingState::ReturnToZeroStart;
                    return Status::Ok;
                }
                if !cfg.a[axis].homing_enable {
                    self.state = HomingState::AxisStart(axis + 1);
                    return Status::Ok;
                }
                if !idle {
                    return Status::Again;
                }
                cm.gm.feed_rate = cfg.a[axis].homing_rate;
                let mut target = cm.gm.position;
                target[axis] = -cfg.a[axis].travel_max;
                let st = cm.straight_feed(cfg, planner, target);
                if st.is_error() {
                    return self.fail(cm, st);
                }
                self.state = HomingState::AxisSeekWait(axis);
                Status::Ok
            }

            HomingState::AxisSeekWait(axis) => {
                if limits.is_thrown(axis) {
                    // Switch fired mid-move: stop everything where it is.
                    dda.flush(queue);
                    planner.flush();
                    cm.set_position(planner, planner.position());
                    limits.clear(axis);
                    self.state = HomingState::AxisBackoffStart(axis);
                    return Status::Ok;
                }
                if idle {
                    // Ran the full travel without a switch: at the hard stop.
                    self.state = HomingState::AxisBackoffStart(axis);
                    return Status::Ok;
                }
                Status::Again
            }

            HomingState::AxisBackoffStart(axis) => {
                if !idle {
                    return Status::Again;
                }
                cm.gm.feed_rate = cfg.a[axis].homing_close_rate;
                let mut target = cm.gm.position;
                target[axis] += cfg.a[axis].homing_backoff;
                let st = cm.straight_feed(cfg, planner, target);
                if st.is_error() {
                    return self.fail(cm, st);
                }
                self.state = HomingState::AxisBackoffWait(axis);
                Status::Ok
            }

            HomingState::AxisBackoffWait(axis) => {
                if !idle {
                    return Status::Again;
                }
                // The switch position is the configured offset; we sit one
                // backoff above it.
                let mut position = cm.gm.position;
                position[axis] = cfg.a[axis].homing_offset + cfg.a[axis].homing_backoff;
                cm.set_position(planner, position);
                self.homed[axis] = true;
                self.state = HomingState::AxisStart(axis + 1);
                Status::Ok
            }

            HomingState::ReturnToZeroStart => {
                if !idle {
                    return Status::Again;
                }
                cm.restore_state();
                planner.set_path_control(cm.gm.path_control_mode);
                let st = cm.straight_traverse(cfg, planner, [0.0; AXES]);
                if st.is_error() {
                    return self.fail(cm, st);
                }
                self.state = HomingState::ReturnToZeroWait;
                Status::Ok
            }

            HomingState::ReturnToZeroWait => {
                if !idle {
                    return Status::Again;
                }
                info!(homed = ?self.homed, "homing cycle complete");
                self.state = HomingState::Off;
                Status::Complete
            }
        }
    }

    fn fail(&mut self, cm: &mut CanonicalMachine, status: Status) -> Status {
        warn!("homing cycle aborted: {}", status.message());
        cm.restore_state();
        self.state = HomingState::Off;
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion::{StepRecorder, X, Y};

    /// Small machine so the virtual clock stays cheap.
    fn small_cfg() -> Config {
        let mut cfg = Config::default();
        for i in 0..HOMED_AXES {
            cfg.a[i].travel_max = 2.0;
            cfg.a[i].homing_rate = 500.0;
            cfg.a[i].homing_close_rate = 100.0;
            cfg.a[i].homing_backoff = 0.5;
        }
        cfg
    }

    struct Rig {
        cfg: Config,
        cm: CanonicalMachine,
        planner: Planner,
        queue: SegmentQueue,
        dda: Dda,
        rec: StepRecorder,
        limits: Limits,
        homing: HomingCycle,
    }

    impl Rig {
        fn new(cfg: Config) -> Self {
            let cm = CanonicalMachine::new(&cfg);
            Rig {
                cfg,
                cm,
                planner: Planner::new(),
                queue: SegmentQueue::new(),
                dda: Dda::new(),
                rec: StepRecorder::new(),
                limits: Limits::default(),
                homing: HomingCycle::new(),
            }
        }

        /// One scheduler-like pass: poll homing, then pump motion.
        fn pass(&mut self) -> Status {
            let st = self.homing.poll(
                &self.cfg,
                &mut self.cm,
                &mut self.planner,
                &mut self.queue,
                &mut self.dda,
                &self.limits,
            );
            self.planner.run_move(&self.cfg, &mut self.queue);
            while self.dda.tick(&mut self.queue, &mut self.rec) {}
            st
        }

        fn run_cycle(&mut self) {
            self.homing.start();
            self.run_cycle_from_here();
        }

        fn run_cycle_from_here(&mut self) {
            for _ in 0..100_000 {
                match self.pass() {
                    Status::Complete => {
                        assert_eq!(self.planner.position(), [0.0; AXES]);
                        return;
                    }
                    Status::Again | Status::Ok | Status::Noop => {}
                    other => panic!("homing failed: {other:?}"),
                }
            }
            panic!("homing cycle did not complete");
        }
    }

    #[test]
    fn full_cycle_ends_at_logical_zero() {
        let mut rig = Rig::new(small_cfg());
        rig.run_cycle();
        assert!(!rig.homing.is_active());
        assert_eq!(rig.planner.position(), [0.0; AXES]);
        assert_eq!(rig.cm.gm.position, [0.0; AXES]);
        // The canonical model came back from the shadow copy.
        assert_eq!(rig.cm.gm.path_control_mode, rig.cfg.m.gcode_path_control);
    }

    #[test]
    fn prethrown_switch_backs_off_first() {
        let mut rig = Rig::new(small_cfg());
        rig.limits.throw(X);
        rig.homing.start();

        // New -> PreBackoffStart consumes the thrown flag and queues the
        // backoff before any seek.
        assert_eq!(rig.pass(), Status::Ok);
        let st = rig.pass();
        assert_eq!(st, Status::Ok);
        assert!(!rig.limits.is_thrown(X));

        rig.run_cycle_from_here();
    }

    #[test]
    fn switch_fired_mid_seek_stops_and_backs_off() {
        let mut cfg = small_cfg();
        // Only Y homes, so the fired switch is unambiguous.
        for i in 0..HOMED_AXES {
            cfg.a[i].homing_enable = i == Y;
        }
        let mut rig = Rig::new(cfg);
        rig.homing.start();

        // Run passes until the Y seek is in flight, then fire the switch.
        let mut fired = false;
        for _ in 0..100_000 {
            let st = rig.pass();
            if !fired && rig.rec.net[Y] < -100 {
                rig.limits.throw(Y);
                fired = true;
            }
            if st == Status::Complete {
                assert!(fired, "switch never fired");
                assert_eq!(rig.planner.position(), [0.0; AXES]);
                // The seek was cut short of the full travel.
                assert!(rig.rec.net[Y] > -(2.0 * rig.cfg.a[Y].steps_per_unit) as i64);
                return;
            }
        }
        panic!("homing cycle did not complete");
    }

    #[test]
    fn disabled_axes_are_skipped() {
        let mut cfg = small_cfg();
        for i in 0..HOMED_AXES {
            cfg.a[i].homing_enable = false;
        }
        let mut rig = Rig::new(cfg);
        rig.homing.start();
        let mut passes = 0;
        loop {
            passes += 1;
            match rig.pass() {
                Status::Complete => break,
                Status::Again | Status::Ok | Status::Noop => {}
                other => panic!("{other:?}"),
            }
            assert!(passes < 100, "skip path should be short");
        }
        // Nothing moved.
        assert_eq!(rig.rec.pulses, 0);
    }
}

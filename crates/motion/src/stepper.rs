//! Motor segment queue and step DDA.
//!
//! The segment queue is the single task/ISR crossing point: the segment
//! generator is the only writer and the DDA load path the only reader, so a
//! fixed-capacity SPSC queue covers it. The DDA consumes one pre-computed
//! constant-time segment at a time and emits per-motor step pulses with a
//! Bresenham-style accumulator.
//!
//! The accumulator is retained across segment boundaries, never reset at
//! load time, so phase error does not build up between segments.

use heapless::spsc::Queue;

use crate::status::Status;
use crate::MOTORS;

/// Step timer rate, Hz.
pub const F_DDA: f64 = 50_000.0;
/// Dwell timer rate, Hz.
pub const F_DWELL: f64 = 10_000.0;
/// Timer input clock the period fields are derived from, Hz.
pub const F_TIMER: f64 = 32_000_000.0;

/// Queue backing size. `heapless::spsc` stores one less than the const
/// parameter, leaving seven usable slots.
pub const MOTOR_SEGMENT_QUEUE: usize = 8;

/// What a motor segment asks the timer layer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentKind {
    #[default]
    Line,
    Dwell,
    Start,
    Stop,
    End,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MotorStep {
    /// Step count for this segment.
    pub steps: u32,
    /// Direction bit; XORed with the motor polarity at load.
    pub dir: u8,
}

/// One pre-computed constant-time segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotorSegment {
    pub kind: SegmentKind,
    /// Value the hardware timer period register would be programmed with.
    pub timer_period: u32,
    /// Segment duration in timer ticks.
    pub timer_ticks: u32,
    pub motors: [MotorStep; MOTORS],
}

/// Single-producer/single-consumer ring of motor segments.
pub struct SegmentQueue {
    q: Queue<MotorSegment, MOTOR_SEGMENT_QUEUE>,
}

impl Default for SegmentQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentQueue {
    pub fn new() -> Self {
        SegmentQueue { q: Queue::new() }
    }

    /// True if another segment can be queued right now.
    pub fn can_accept(&self) -> bool {
        !self.q.is_full()
    }

    pub fn push(&mut self, segment: MotorSegment) -> Status {
        match self.q.enqueue(segment) {
            Ok(()) => Status::Ok,
            Err(_) => Status::BufferFullNonFatal,
        }
    }

    pub fn pop(&mut self) -> Option<MotorSegment> {
        self.q.dequeue()
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Drop everything. Kill-path only.
    pub fn flush(&mut self) {
        while self.q.dequeue().is_some() {}
    }
}

/// Where step pulses go. The production build drives port pins from the
/// timer interrupt; hosts install a recorder.
pub trait StepSink {
    fn step(&mut self, motor: usize, forward: bool);
}

/// Discards pulses.
pub struct NullSink;

impl StepSink for NullSink {
    fn step(&mut self, _motor: usize, _forward: bool) {}
}

/// Records net signed steps per motor.
#[derive(Debug, Default, Clone)]
pub struct StepRecorder {
    pub net: [i64; MOTORS],
    pub pulses: u64,
}

impl StepRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepSink for StepRecorder {
    fn step(&mut self, motor: usize, forward: bool) {
        self.net[motor] += if forward { 1 } else { -1 };
        self.pulses += 1;
    }
}

/// Per-motor DDA runtime state.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotorRuntime {
    /// Bresenham accumulator. Signed, retained across segments.
    pub counter: i64,
    /// Step count of the current segment.
    pub steps: u32,
    pub forward: bool,
}

/// The step DDA: the software model of the high-rate timer ISR.
#[derive(Debug, Default)]
pub struct Dda {
    armed: bool,
    held: bool,
    stopped: bool,
    ticks_left: u32,
    ticks_total: u32,
    kind: SegmentKind,
    motors: [MotorRuntime; MOTORS],
    polarity: [u8; MOTORS],
    end_latch: bool,
}

impl Dda {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_polarity(&mut self, polarity: [u8; MOTORS]) {
        self.polarity = polarity;
    }

    /// True when no segment is armed (queue may still hold segments if the
    /// DDA is held or stopped).
    pub fn is_idle(&self) -> bool {
        !self.armed
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Pause: freeze the timer without discarding anything.
    pub fn hold(&mut self) {
        self.held = true;
    }

    /// Resume after [`Dda::hold`] or a queued `Stop` marker.
    pub fn release(&mut self) {
        self.held = false;
        self.stopped = false;
    }

    /// Consume the end-of-program latch set by an `End` segment.
    pub fn take_end_event(&mut self) -> bool {
        std::mem::take(&mut self.end_latch)
    }

    /// Kill: drain the queue and disarm. Accumulators are retained.
    pub fn flush(&mut self, queue: &mut SegmentQueue) {
        queue.flush();
        self.armed = false;
        self.stopped = false;
        self.ticks_left = 0;
    }

    pub fn motor(&self, m: usize) -> &MotorRuntime {
        &self.motors[m]
    }

    /// Dequeue and arm the next segment. Flow markers are consumed inline;
    /// an empty queue disarms until the next [`Dda::request_load`].
    fn load(&mut self, queue: &mut SegmentQueue) {
        loop {
            let Some(seg) = queue.pop() else {
                self.armed = false;
                return;
            };
            match seg.kind {
                SegmentKind::Line | SegmentKind::Dwell => {
                    self.kind = seg.kind;
                    self.ticks_total = seg.timer_ticks.max(1);
                    self.ticks_left = self.ticks_total;
                    for m in 0..MOTORS {
                        self.motors[m].steps = seg.motors[m].steps;
                        self.motors[m].forward = (seg.motors[m].dir ^ self.polarity[m]) == 0;
                    }
                    self.armed = true;
                    return;
                }
                SegmentKind::Start => {
                    self.stopped = false;
                }
                SegmentKind::Stop => {
                    self.stopped = true;
                    self.armed = false;
                    return;
                }
                SegmentKind::End => {
                    self.end_latch = true;
                    self.armed = false;
                    return;
                }
            }
        }
    }

    /// Software-interrupt analog: arm from the queue if disarmed. Idempotent
    /// while a load is already pending.
    pub fn request_load(&mut self, queue: &mut SegmentQueue) {
        if !self.armed && !self.held && !self.stopped {
            self.load(queue);
        }
    }

    /// One timer tick. Returns false when there is nothing to run.
    pub fn tick(&mut self, queue: &mut SegmentQueue, sink: &mut impl StepSink) -> bool {
        if self.held || self.stopped {
            return false;
        }
        if !self.armed {
            self.load(queue);
            if !self.armed {
                return false;
            }
        }

        if self.kind == SegmentKind::Line {
            for m in 0..MOTORS {
                let mr = &mut self.motors[m];
                mr.counter += mr.steps as i64;
                if mr.counter > 0 {
                    sink.step(m, mr.forward);
                    mr.counter -= self.ticks_total as i64;
                }
            }
        }

        self.ticks_left -= 1;
        if self.ticks_left == 0 {
            self.armed = false;
            self.load(queue);
        }
        true
    }
}

/// Period register value for a line segment.
pub fn dda_timer_period() -> u32 {
    (F_TIMER / F_DDA) as u32
}

/// Period register value for a dwell segment.
pub fn dwell_timer_period() -> u32 {
    (F_TIMER / F_DWELL) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_segment(steps0: u32, ticks: u32, dir: u8) -> MotorSegment {
        let mut seg = MotorSegment {
            kind: SegmentKind::Line,
            timer_period: dda_timer_period(),
            timer_ticks: ticks,
            motors: [MotorStep::default(); MOTORS],
        };
        seg.motors[0] = MotorStep { steps: steps0, dir };
        seg
    }

    #[test]
    fn dda_emits_exact_step_count() {
        let mut q = SegmentQueue::new();
        let mut dda = Dda::new();
        let mut rec = StepRecorder::new();
        q.push(line_segment(37, 100, 0));
        for _ in 0..100 {
            assert!(dda.tick(&mut q, &mut rec));
        }
        assert_eq!(rec.net[0], 37);
        assert!(!dda.tick(&mut q, &mut rec));
    }

    #[test]
    fn counter_invariant_holds_mid_segment() {
        let mut q = SegmentQueue::new();
        let mut dda = Dda::new();
        let mut rec = StepRecorder::new();
        q.push(line_segment(37, 100, 0));

        // Arm and run 40 ticks.
        let before = dda.motor(0).counter;
        for _ in 0..40 {
            dda.tick(&mut q, &mut rec);
        }
        let k = rec.pulses as i64;
        assert_eq!(dda.motor(0).counter, before + 40 * 37 - k * 100);
    }

    #[test]
    fn phase_is_retained_across_segments() {
        let mut q = SegmentQueue::new();
        let mut dda = Dda::new();
        let mut rec = StepRecorder::new();
        // Two back-to-back segments at the same rate must behave like one
        // long segment: exact counts, no boundary double-step.
        q.push(line_segment(3, 10, 0));
        q.push(line_segment(3, 10, 0));
        for _ in 0..20 {
            dda.tick(&mut q, &mut rec);
        }
        assert_eq!(rec.net[0], 6);
    }

    #[test]
    fn direction_applies_polarity() {
        let mut q = SegmentQueue::new();
        let mut dda = Dda::new();
        let mut rec = StepRecorder::new();
        dda.set_polarity({
            let mut p = [0u8; MOTORS];
            p[0] = 1;
            p
        });
        // dir=0 XOR polarity=1 -> reverse pulses.
        q.push(line_segment(5, 10, 0));
        for _ in 0..10 {
            dda.tick(&mut q, &mut rec);
        }
        assert_eq!(rec.net[0], -5);
    }

    #[test]
    fn dwell_emits_no_pulses() {
        let mut q = SegmentQueue::new();
        let mut dda = Dda::new();
        let mut rec = StepRecorder::new();
        q.push(MotorSegment {
            kind: SegmentKind::Dwell,
            timer_period: dwell_timer_period(),
            timer_ticks: 50,
            motors: [MotorStep::default(); MOTORS],
        });
        let mut ticks = 0;
        while dda.tick(&mut q, &mut rec) {
            ticks += 1;
        }
        assert_eq!(ticks, 50);
        assert_eq!(rec.pulses, 0);
    }

    #[test]
    fn stop_marker_parks_until_release() {
        let mut q = SegmentQueue::new();
        let mut dda = Dda::new();
        let mut rec = StepRecorder::new();
        q.push(MotorSegment {
            kind: SegmentKind::Stop,
            ..Default::default()
        });
        q.push(line_segment(2, 4, 0));
        assert!(!dda.tick(&mut q, &mut rec));
        assert_eq!(rec.pulses, 0);

        dda.release();
        for _ in 0..4 {
            dda.tick(&mut q, &mut rec);
        }
        assert_eq!(rec.net[0], 2);
    }

    #[test]
    fn end_marker_latches_event() {
        let mut q = SegmentQueue::new();
        let mut dda = Dda::new();
        let mut rec = StepRecorder::new();
        q.push(MotorSegment {
            kind: SegmentKind::End,
            ..Default::default()
        });
        assert!(!dda.tick(&mut q, &mut rec));
        assert!(dda.take_end_event());
        assert!(!dda.take_end_event());
    }

    #[test]
    fn flush_discards_queue_and_disarms() {
        let mut q = SegmentQueue::new();
        let mut dda = Dda::new();
        let mut rec = StepRecorder::new();
        q.push(line_segment(100, 200, 0));
        q.push(line_segment(100, 200, 0));
        for _ in 0..10 {
            dda.tick(&mut q, &mut rec);
        }
        dda.flush(&mut q);
        assert!(q.is_empty());
        assert!(!dda.tick(&mut q, &mut rec));
    }
}

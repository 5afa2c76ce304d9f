//! Planner buffer ring.
//!
//! A fixed array of sub-move records with three cursors: `w` (next write),
//! `q` (next to queue) and `r` (next to run). Writers claim a buffer with
//! [`BufferRing::get_write`], fill it while it is `Loading`, and publish it
//! with [`BufferRing::queue_write`]. The segment generator consumes from `r`.
//! Cursors advance monotonically modulo the ring size; the DDA never touches
//! this ring.

use crate::{Status, Vector, AXES};

/// Ring capacity. One G-code line queues at most four sub-moves (retro-edit
/// tail plus head/body/tail), so the reader gate leaves headroom for two
/// lines in flight.
pub const PLANNER_BUFFERS: usize = 8;

/// Write slots the command reader must see free before accepting a line.
pub const BUFFERS_NEEDED: usize = 4;

/// What a planner buffer describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveType {
    #[default]
    None,
    /// Constant-rate line queued when acceleration management is disabled.
    Line,
    /// Constant-velocity body region.
    Cruise,
    /// Jerk-limited acceleration head.
    Accel,
    /// Jerk-limited deceleration tail.
    Decel,
    /// Constant-acceleration ramp (no jerk shaping).
    LinearDecel,
    Arc,
    Dwell,
    Start,
    Stop,
    End,
}

/// Sub-phase of an S-curve region while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    New,
    Running1,
    Running2,
}

/// Lifecycle of a ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferState {
    #[default]
    Empty,
    Loading,
    Queued,
    Running,
}

/// One sub-move: a head, body, tail, arc, dwell or flow-control record.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlannerBuffer {
    pub buffer_state: BufferState,
    pub move_type: MoveType,
    pub move_state: MoveState,

    pub unit_vec: Vector,
    pub target: Vector,
    /// Whole-move step delta per axis, relative. Informational; the segment
    /// generator re-derives integer steps per segment.
    pub steps: [i32; AXES],

    /// Path length in mm (degrees-weighted for pure-rotary moves).
    pub length: f64,
    /// Duration in minutes.
    pub time: f64,
    pub initial_velocity: f64,
    pub target_velocity: f64,

    // Segment generator working set.
    pub midpoint_velocity: f64,
    pub midpoint_acceleration: f64,
    pub jerk_div2: f64,
    pub segments: u32,
    pub segment_count: u32,
    pub segment_time: f64,
    pub segment_length: f64,
    pub segment_velocity: f64,
    pub elapsed_time: f64,

    // Arc extras.
    pub theta: f64,
    pub radius: f64,
    pub center_1: f64,
    pub center_2: f64,
    pub segment_theta: f64,
    pub segment_linear: f64,
    pub axis_1: usize,
    pub axis_2: usize,
    pub axis_linear: usize,
}

impl PlannerBuffer {
    /// Duration in microseconds (derived from `time`).
    pub fn microseconds(&self) -> f64 {
        self.time * 60.0e6
    }
}

/// The ring itself. All access is from task context.
#[derive(Debug)]
pub struct BufferRing {
    buf: [PlannerBuffer; PLANNER_BUFFERS],
    w: usize,
    q: usize,
    r: usize,
}

impl Default for BufferRing {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferRing {
    pub fn new() -> Self {
        BufferRing {
            buf: [PlannerBuffer::default(); PLANNER_BUFFERS],
            w: 0,
            q: 0,
            r: 0,
        }
    }

    fn advance(i: usize) -> usize {
        (i + 1) % PLANNER_BUFFERS
    }

    /// True if `n` consecutive write slots are available from `w`.
    pub fn buffers_free(&self, n: usize) -> bool {
        let mut i = self.w;
        for _ in 0..n {
            if self.buf[i].buffer_state != BufferState::Empty {
                return false;
            }
            i = Self::advance(i);
        }
        true
    }

    /// Claim the next write slot: zeroes the buffer and transitions it
    /// `Empty -> Loading`. Returns `None` when the slot is occupied or when
    /// a previous claim has not been published yet (at most one buffer may
    /// be `Loading`).
    pub fn get_write(&mut self) -> Option<usize> {
        if self.buf.iter().any(|b| b.buffer_state == BufferState::Loading) {
            return None;
        }
        if self.buf[self.w].buffer_state != BufferState::Empty {
            return None;
        }
        let i = self.w;
        self.buf[i] = PlannerBuffer {
            buffer_state: BufferState::Loading,
            ..PlannerBuffer::default()
        };
        self.w = Self::advance(self.w);
        Some(i)
    }

    /// Publish the buffer at `q`: `Loading -> Queued`.
    pub fn queue_write(&mut self, move_type: MoveType) -> Status {
        if self.buf[self.q].buffer_state != BufferState::Loading {
            return Status::BufferFullFatal;
        }
        self.buf[self.q].move_type = move_type;
        self.buf[self.q].buffer_state = BufferState::Queued;
        self.q = Self::advance(self.q);
        Status::Ok
    }

    /// Fetch the buffer to run. Promotes `Queued -> Running` at `r` and then
    /// keeps returning the same buffer until [`BufferRing::end_run`].
    pub fn get_run(&mut self) -> Option<usize> {
        match self.buf[self.r].buffer_state {
            BufferState::Running => Some(self.r),
            BufferState::Queued => {
                self.buf[self.r].buffer_state = BufferState::Running;
                Some(self.r)
            }
            _ => None,
        }
    }

    /// Retire the running buffer: `Running -> Empty`, advance `r`.
    pub fn end_run(&mut self) {
        if self.buf[self.r].buffer_state == BufferState::Running {
            self.buf[self.r] = PlannerBuffer::default();
            self.r = Self::advance(self.r);
        }
    }

    /// Index of the most-recently-queued buffer (`w - 1`), for look-behind.
    pub fn get_previous(&self) -> usize {
        (self.w + PLANNER_BUFFERS - 1) % PLANNER_BUFFERS
    }

    /// Current run cursor. The active region of the ring is contiguous from
    /// here to the write cursor.
    pub fn get_run_cursor(&self) -> usize {
        self.r
    }

    pub fn get(&self, i: usize) -> &PlannerBuffer {
        &self.buf[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut PlannerBuffer {
        &mut self.buf[i]
    }

    /// True while any sub-move is loading, queued or running.
    pub fn is_busy(&self) -> bool {
        self.buf.iter().any(|b| b.buffer_state != BufferState::Empty)
    }

    /// Discard everything and reset the cursors. Kill-path only.
    pub fn flush(&mut self) {
        *self = BufferRing::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_queue_run_discipline() {
        let mut ring = BufferRing::new();
        assert!(ring.buffers_free(PLANNER_BUFFERS));
        assert!(ring.get_run().is_none());

        let i = ring.get_write().unwrap();
        assert_eq!(ring.get(i).buffer_state, BufferState::Loading);
        // Only one buffer may be loading at a time.
        assert!(ring.get_write().is_none());

        assert_eq!(ring.queue_write(MoveType::Cruise), Status::Ok);
        assert_eq!(ring.get(i).buffer_state, BufferState::Queued);

        let r = ring.get_run().unwrap();
        assert_eq!(r, i);
        assert_eq!(ring.get(r).buffer_state, BufferState::Running);
        // Repeated calls return the same buffer until ended.
        assert_eq!(ring.get_run().unwrap(), r);

        ring.end_run();
        assert!(ring.get_run().is_none());
        assert!(ring.buffers_free(PLANNER_BUFFERS));
    }

    #[test]
    fn queue_without_write_is_fatal() {
        let mut ring = BufferRing::new();
        assert_eq!(ring.queue_write(MoveType::Cruise), Status::BufferFullFatal);
    }

    #[test]
    fn ring_wraps_and_preserves_fifo() {
        let mut ring = BufferRing::new();
        for lap in 0..3 {
            for n in 0..PLANNER_BUFFERS {
                let i = ring.get_write().unwrap();
                ring.get_mut(i).length = (lap * PLANNER_BUFFERS + n) as f64;
                ring.queue_write(MoveType::Cruise);
            }
            assert!(!ring.buffers_free(1));
            for n in 0..PLANNER_BUFFERS {
                let r = ring.get_run().unwrap();
                assert_eq!(ring.get(r).length, (lap * PLANNER_BUFFERS + n) as f64);
                ring.end_run();
            }
        }
    }

    #[test]
    fn get_previous_points_at_last_queued() {
        let mut ring = BufferRing::new();
        let i = ring.get_write().unwrap();
        ring.get_mut(i).target_velocity = 123.0;
        ring.queue_write(MoveType::Decel);
        let p = ring.get_previous();
        assert_eq!(p, i);
        assert_eq!(ring.get(p).target_velocity, 123.0);
    }
}

//! In-memory stand-in for the controller, used by `--simulate` and tests.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::pose::HOME;
use crate::robot::{Arm, MoveMode};
use crate::{ArmError, Pose};

#[derive(Debug)]
struct SimState {
    pose: Pose,
    from: Pose,
    queue: VecDeque<Pose>,
    progress: u32,
    enqueued: u64,
    completed: u64,
    halted: bool,
    closed: bool,
    speed: Option<(f32, f32)>,
    moves: Vec<(Pose, MoveMode)>,
    pose_reads: usize,
    stops: usize,
    closes: usize,
    reads_before_fault: Option<usize>,
}

impl SimState {
    /// Moves the head of the queue one step towards its target.
    fn advance(&mut self, steps_per_move: u32) {
        if self.halted {
            return;
        }
        let Some(target) = self.queue.front().copied() else {
            return;
        };
        self.progress += 1;
        if self.progress >= steps_per_move {
            self.pose = target;
            self.from = target;
            self.progress = 0;
            self.queue.pop_front();
            self.completed += 1;
        } else {
            let t = self.progress as f32 / steps_per_move as f32;
            let lerp = |a: f32, b: f32| a + (b - a) * t;
            self.pose = Pose::new(
                lerp(self.from.x, target.x),
                lerp(self.from.y, target.y),
                lerp(self.from.z, target.z),
                lerp(self.from.r, target.r),
            );
        }
    }
}

/// Simulated arm. Every pose read or queue poll advances the active motion by
/// one step; a motion completes after `steps_per_move` steps.
pub struct SimArm {
    state: Mutex<SimState>,
    steps_per_move: u32,
    tick: Duration,
}

impl SimArm {
    pub fn new(start: Pose, steps_per_move: u32, tick: Duration) -> Self {
        SimArm {
            state: Mutex::new(SimState {
                pose: start,
                from: start,
                queue: VecDeque::new(),
                progress: 0,
                enqueued: 0,
                completed: 0,
                halted: false,
                closed: false,
                speed: None,
                moves: Vec::new(),
                pose_reads: 0,
                stops: 0,
                closes: 0,
                reads_before_fault: None,
            }),
            steps_per_move: steps_per_move.max(1),
            tick,
        }
    }

    /// Starts at home and completes each motion on the next step.
    pub fn instant() -> Self {
        Self::new(HOME.target().unwrap_or_default(), 1, Duration::ZERO)
    }

    /// Starts at home and glides through each motion in roughly half a second.
    pub fn animated() -> Self {
        Self::new(
            HOME.target().unwrap_or_default(),
            10,
            Duration::from_millis(50),
        )
    }

    pub fn at(start: Pose) -> Self {
        Self::new(start, 1, Duration::ZERO)
    }

    /// Lets `reads` more pose reads succeed, then fails every read after.
    pub fn fail_pose_reads_after(&self, reads: usize) {
        self.state.lock().reads_before_fault = Some(reads);
    }

    pub fn moves(&self) -> Vec<(Pose, MoveMode)> {
        self.state.lock().moves.clone()
    }

    pub fn pose_reads(&self) -> usize {
        self.state.lock().pose_reads
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    pub fn speed(&self) -> Option<(f32, f32)> {
        self.state.lock().speed
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }
}

impl Arm for SimArm {
    fn pose(&self) -> Result<Pose, ArmError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ArmError::Closed);
        }
        state.pose_reads += 1;
        if let Some(remaining) = state.reads_before_fault {
            if remaining == 0 {
                return Err(ArmError::SimulatedFault);
            }
            state.reads_before_fault = Some(remaining - 1);
        }
        state.advance(self.steps_per_move);
        Ok(state.pose)
    }

    fn move_to(&self, target: Pose, mode: MoveMode) -> Result<(), ArmError> {
        let index = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ArmError::Closed);
            }
            if state.halted {
                warn!("Restarting halted simulated queue");
                state.halted = false;
                state.completed += state.queue.len() as u64;
                state.queue.clear();
                state.progress = 0;
                state.from = state.pose;
            }
            state.queue.push_back(target);
            state.moves.push((target, mode));
            state.enqueued += 1;
            state.enqueued
        };
        debug!("Simulated move {index} to {}", target.status_line());

        if mode == MoveMode::Queued {
            return Ok(());
        }
        loop {
            {
                let mut state = self.state.lock();
                if state.halted {
                    return Err(ArmError::Halted);
                }
                state.advance(self.steps_per_move);
                if state.completed >= index {
                    return Ok(());
                }
            }
            thread::sleep(self.tick);
        }
    }

    fn set_speed(&self, velocity: f32, acceleration: f32) -> Result<(), ArmError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ArmError::Closed);
        }
        state.speed = Some((velocity, acceleration));
        Ok(())
    }

    fn stop(&self) -> Result<(), ArmError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ArmError::Closed);
        }
        state.halted = true;
        state.stops += 1;
        warn!("Simulated queue stopped");
        Ok(())
    }

    fn close(&self) -> Result<(), ArmError> {
        let mut state = self.state.lock();
        state.closes += 1;
        if state.closed {
            return Err(ArmError::Closed);
        }
        state.closed = true;
        info!("Simulated connection closed");
        Ok(())
    }
}

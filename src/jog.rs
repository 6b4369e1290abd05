//! Manual jog: held keys become per-axis offsets, each tick sends one queued
//! move from the current pose.

use std::io;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::keys::{HeldKeys, JogKey, KeySource};
use crate::robot::{Arm, MoveMode};
use crate::{ArmError, Pose};

pub const DEFAULT_STEP: f32 = 20.0;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy)]
pub struct JogSettings {
    pub step: f32,
    pub interval: Duration,
}

impl Default for JogSettings {
    fn default() -> Self {
        JogSettings {
            step: DEFAULT_STEP,
            interval: DEFAULT_INTERVAL,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JogError {
    #[error(transparent)]
    Arm(#[from] ArmError),
    #[error("Keyboard input error: {0}")]
    Input(#[from] io::Error),
}

/// Offset requested by the held keys. Axes are independent; when both keys
/// of one axis are held the later one in the list wins (right, down, S, D).
pub fn delta(held: HeldKeys, step: f32) -> Pose {
    let mut delta = Pose::default();
    for (key, value) in [(JogKey::Left, -step), (JogKey::Right, step)] {
        if held.is_held(key) {
            delta.x = value;
        }
    }
    for (key, value) in [(JogKey::Up, step), (JogKey::Down, -step)] {
        if held.is_held(key) {
            delta.y = value;
        }
    }
    for (key, value) in [(JogKey::W, step), (JogKey::S, -step)] {
        if held.is_held(key) {
            delta.z = value;
        }
    }
    for (key, value) in [(JogKey::A, -step), (JogKey::D, step)] {
        if held.is_held(key) {
            delta.r = value;
        }
    }
    delta
}

/// Draws the jog screen once per tick.
pub trait JogView {
    fn draw(&mut self, pose: &Pose, held: HeldKeys) -> io::Result<()>;
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct JogSummary {
    pub ticks: usize,
    pub moves: usize,
}

pub fn run(
    arm: &dyn Arm,
    keys: &mut dyn KeySource,
    view: &mut dyn JogView,
    settings: JogSettings,
) -> Result<JogSummary, JogError> {
    info!("Manual control started, step {}", settings.step);
    let mut summary = JogSummary::default();
    loop {
        let held = keys.held(settings.interval)?;
        if held.is_held(JogKey::Quit) {
            info!("Manual control finished: {summary:?}");
            return Ok(summary);
        }
        summary.ticks += 1;

        let pose = arm.pose()?;
        view.draw(&pose, held)?;

        let delta = delta(held, settings.step);
        if !delta.is_zero() {
            let target = pose.offset(&delta);
            debug!("Jog to {}", target.status_line());
            arm.move_to(target, MoveMode::Queued)?;
            summary.moves += 1;
            thread::sleep(settings.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::sim::SimArm;

    struct ScriptedKeys(VecDeque<HeldKeys>);

    impl ScriptedKeys {
        fn new(ticks: &[&[JogKey]]) -> Self {
            ScriptedKeys(ticks.iter().map(|keys| HeldKeys::of(keys)).collect())
        }
    }

    impl KeySource for ScriptedKeys {
        fn held(&mut self, _wait: Duration) -> io::Result<HeldKeys> {
            Ok(self
                .0
                .pop_front()
                .unwrap_or_else(|| HeldKeys::of(&[JogKey::Quit])))
        }
    }

    #[derive(Default)]
    struct CountingView(usize);

    impl JogView for CountingView {
        fn draw(&mut self, _pose: &Pose, _held: HeldKeys) -> io::Result<()> {
            self.0 += 1;
            Ok(())
        }
    }

    fn settings() -> JogSettings {
        JogSettings {
            step: 20.0,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn diagonal_keys_accumulate_per_axis() {
        let held = HeldKeys::of(&[JogKey::Right, JogKey::Up]);
        assert_eq!(delta(held, 20.0), Pose::new(20.0, 20.0, 0.0, 0.0));
    }

    #[test]
    fn later_key_wins_within_an_axis() {
        let held = HeldKeys::of(&[JogKey::Left, JogKey::Right, JogKey::W, JogKey::S]);
        assert_eq!(delta(held, 5.0), Pose::new(5.0, 0.0, -5.0, 0.0));
        let rotate = HeldKeys::of(&[JogKey::A]);
        assert_eq!(delta(rotate, 5.0), Pose::new(0.0, 0.0, 0.0, -5.0));
    }

    #[test]
    fn one_tick_right_and_up_from_origin() {
        let arm = SimArm::at(Pose::default());
        let mut keys = ScriptedKeys::new(&[&[JogKey::Right, JogKey::Up]]);
        let mut view = CountingView::default();

        let summary = run(&arm, &mut keys, &mut view, settings()).unwrap();
        assert_eq!(summary, JogSummary { ticks: 1, moves: 1 });
        assert_eq!(
            arm.moves(),
            vec![(Pose::new(20.0, 20.0, 0.0, 0.0), MoveMode::Queued)]
        );
    }

    #[test]
    fn quit_is_checked_before_anything_else() {
        let arm = SimArm::at(Pose::default());
        let mut keys = ScriptedKeys::new(&[&[JogKey::Quit, JogKey::Right, JogKey::W]]);
        let mut view = CountingView::default();

        let summary = run(&arm, &mut keys, &mut view, settings()).unwrap();
        assert_eq!(summary, JogSummary::default());
        assert!(arm.moves().is_empty());
        assert_eq!(arm.pose_reads(), 0);
        assert_eq!(view.0, 0);
    }

    #[test]
    fn idle_ticks_send_nothing() {
        let arm = SimArm::at(Pose::default());
        let mut keys = ScriptedKeys::new(&[&[], &[], &[JogKey::D]]);
        let mut view = CountingView::default();

        let summary = run(&arm, &mut keys, &mut view, settings()).unwrap();
        assert_eq!(summary, JogSummary { ticks: 3, moves: 1 });
        assert_eq!(
            arm.moves(),
            vec![(Pose::new(0.0, 0.0, 0.0, 20.0), MoveMode::Queued)]
        );
    }

    #[test]
    fn pose_failure_ends_jog() {
        let arm = SimArm::at(Pose::default());
        arm.fail_pose_reads_after(0);
        let mut keys = ScriptedKeys::new(&[&[JogKey::Right]]);
        let mut view = CountingView::default();

        let result = run(&arm, &mut keys, &mut view, settings());
        assert!(matches!(result, Err(JogError::Arm(ArmError::SimulatedFault))));
    }
}

//! Interactive menus for the `control` and `monitor` commands.

use log::{error, info, warn};

use crate::cancel::CancelToken;
use crate::jog::JogError;
use crate::limits::{AlertOutcome, AlertReply, Monitor, MonitorSettings, PoseDisplay, prompt_margin};
use crate::pose::{HOME, LIMIT_SWEEP, PREDEFINED};
use crate::prompt::{self, Prompt, PromptError, SharedPrompt};
use crate::robot::{DEFAULT_ACCELERATION, DEFAULT_SPEED, MoveMode, Session};
use crate::spinner;
use crate::{Arm, ArmError, Margin, Pose, Waypoint};

#[derive(Debug, thiserror::Error)]
pub enum MenuError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Arm(#[from] ArmError),
    #[error("Could not start the boundary monitor: {0}")]
    Monitor(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlAction {
    Pose,
    Predefined,
    Home,
    Manual,
    Exit,
}

const CONTROL_ACTIONS: [(&str, ControlAction); 5] = [
    ("Show current pose", ControlAction::Pose),
    ("Move to predefined position", ControlAction::Predefined),
    ("Go to home position", ControlAction::Home),
    ("Manual control (keys per axis)", ControlAction::Manual),
    ("Exit", ControlAction::Exit),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorAction {
    Pose,
    Move,
    TestLimits,
    AdjustMargin,
    Exit,
}

const MONITOR_ACTIONS: [(&str, MonitorAction); 5] = [
    ("Show current pose", MonitorAction::Pose),
    ("Move to position", MonitorAction::Move),
    ("Test limits", MonitorAction::TestLimits),
    ("Adjust safety margin", MonitorAction::AdjustMargin),
    ("Exit", MonitorAction::Exit),
];

fn say(prompt: &SharedPrompt, message: &str) -> Result<(), PromptError> {
    prompt.lock().say(message)
}

/// Reports an operation failure and carries on with the menu.
fn report(
    prompt: &SharedPrompt,
    what: &str,
    result: Result<(), ArmError>,
) -> Result<(), PromptError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("{what} failed: {e}");
            say(prompt, &format!("{what} failed: {e}"))
        }
    }
}

pub fn show_pose(arm: &dyn Arm, prompt: &SharedPrompt) -> Result<(), MenuError> {
    match arm.pose() {
        Ok(pose) => say(prompt, &format!("\n{pose}"))?,
        Err(e) => report(prompt, "Reading the pose", Err(e))?,
    }
    Ok(())
}

pub fn move_to_waypoint(arm: &dyn Arm, waypoint: &Waypoint) -> Result<(), ArmError> {
    let Some(target) = waypoint.target() else {
        warn!("Waypoint {} is not a complete target", waypoint.name);
        return Ok(());
    };
    spinner::task(
        &format!("Moving to {}...", waypoint.name),
        "Move complete!",
        || arm.move_to(target, MoveMode::Blocking),
    )
}

fn close_session(session: Session) -> Result<(), ArmError> {
    spinner::task("Closing connection...", "Connection closed!", || {
        session.close()
    })
}

/// Closes the session when the menu ends, whichever way it ends.
fn finish(session: Session, outcome: Result<(), MenuError>) -> Result<(), MenuError> {
    let closed = close_session(session);
    match outcome {
        Ok(()) | Err(MenuError::Prompt(PromptError::Closed)) => closed.map_err(MenuError::from),
        Err(e) => Err(e),
    }
}

/// The `control` menu. `jog` runs manual control and owns the terminal while
/// it does.
pub fn run_control(
    session: Session,
    prompt: &SharedPrompt,
    jog: &mut dyn FnMut(&dyn Arm) -> Result<(), JogError>,
) -> Result<(), MenuError> {
    let outcome = control_loop(&session, prompt, jog);
    finish(session, outcome)
}

fn control_loop(
    session: &Session,
    prompt: &SharedPrompt,
    jog: &mut dyn FnMut(&dyn Arm) -> Result<(), JogError>,
) -> Result<(), MenuError> {
    let arm: &dyn Arm = &**session;
    loop {
        let action = *prompt::choose(&mut *prompt.lock(), "Dobot control", &CONTROL_ACTIONS)?;
        match action {
            ControlAction::Pose => show_pose(arm, prompt)?,
            ControlAction::Predefined => {
                let waypoint = {
                    let items: Vec<(&str, &Waypoint)> =
                        PREDEFINED.iter().map(|w| (w.name, w)).collect();
                    **prompt::choose(&mut *prompt.lock(), "Select the position", &items)?
                };
                report(prompt, "Move", move_to_waypoint(arm, &waypoint))?;
            }
            ControlAction::Home => report(prompt, "Move", move_to_waypoint(arm, &HOME))?,
            ControlAction::Manual => {
                say(prompt, "Manual control on. Arrows move X/Y, W/S move Z, A/D rotate, q quits.")?;
                match jog(arm) {
                    Ok(()) => say(prompt, "Leaving manual control.")?,
                    Err(JogError::Arm(e)) => report(prompt, "Manual control", Err(e))?,
                    Err(JogError::Input(e)) => {
                        error!("Manual control input failed: {e}");
                        say(prompt, &format!("Manual control failed: {e}"))?;
                    }
                }
            }
            ControlAction::Exit => return Ok(()),
        }
    }
}

fn parse_coordinate(answer: &str) -> Result<f32, String> {
    match answer.parse::<f32>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(_) => Err("enter a finite number".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn ask_coordinates(prompt: &mut dyn Prompt) -> Result<Pose, PromptError> {
    let mut axis = |message: &str| prompt::ask(&mut *prompt, message, parse_coordinate);
    let x = axis("Position X (mm)")?;
    let y = axis("Position Y (mm)")?;
    let z = axis("Position Z (mm)")?;
    let r = axis("Rotation R (°)")?;
    Ok(Pose::new(x, y, z, r))
}

/// The `monitor` menu: boundary monitoring runs in the background until
/// the operator exits.
pub fn run_monitor(
    session: Session,
    prompt: &SharedPrompt,
    display: Box<dyn PoseDisplay>,
    settings: MonitorSettings,
    cancel: CancelToken,
) -> Result<(), MenuError> {
    let configured = spinner::task("Configuring parameters...", "Ready to operate!", || {
        session.set_speed(DEFAULT_SPEED, DEFAULT_ACCELERATION)
    });
    if let Err(e) = configured {
        return finish(session, Err(e.into()));
    }

    let monitor =
        match Monitor::start_with(session.share(), prompt.clone(), display, settings, cancel) {
            Ok(monitor) => monitor,
            Err(e) => return finish(session, Err(MenuError::Monitor(e))),
        };
    let outcome = monitor_loop(&session, prompt, &monitor, settings.margin);
    match monitor.shutdown() {
        AlertOutcome::Stopped => info!("Alert loop had stopped the arm"),
        other => info!("Monitor finished: {other:?}"),
    }
    finish(session, outcome)
}

/// Answers alerts raised while the menu held the prompt. Returns true when
/// the operator chose to stop.
fn answer_alerts(
    prompt: &SharedPrompt,
    monitor: &Monitor,
    margin: &mut Margin,
) -> Result<bool, PromptError> {
    let mut stopped = false;
    while let Some(request) = monitor.pending_alert() {
        match request.answer(&mut *prompt.lock())? {
            AlertReply::Continue => {}
            AlertReply::Stop => stopped = true,
            AlertReply::Adjust(new) => *margin = new,
        }
    }
    Ok(stopped)
}

fn monitor_loop(
    session: &Session,
    prompt: &SharedPrompt,
    monitor: &Monitor,
    mut margin: Margin,
) -> Result<(), MenuError> {
    let arm: &dyn Arm = &**session;
    let mut reported_down = false;
    loop {
        answer_alerts(prompt, monitor, &mut margin)?;
        if !reported_down && !monitor.is_alerting() {
            reported_down = true;
            say(prompt, "The boundary monitor is no longer running.")?;
        }
        let action = *prompt::choose(&mut *prompt.lock(), "Dobot control", &MONITOR_ACTIONS)?;
        if answer_alerts(prompt, monitor, &mut margin)? {
            say(prompt, "Arm stopped, choose again.")?;
            continue;
        }
        match action {
            MonitorAction::Pose => show_pose(arm, prompt)?,
            MonitorAction::Move => {
                let target = ask_coordinates(&mut *prompt.lock())?;
                if answer_alerts(prompt, monitor, &mut margin)? {
                    say(prompt, "Arm stopped, move cancelled.")?;
                    continue;
                }
                let moved = spinner::task("Moving robot...", "Move complete!", || {
                    arm.move_to(target, MoveMode::Blocking)
                });
                report(prompt, "Move", moved)?;
            }
            MonitorAction::TestLimits => {
                let swept = spinner::task("Testing limits...", "Test complete!", || {
                    LIMIT_SWEEP.iter().try_for_each(|waypoint| match waypoint.target() {
                        Some(target) => arm.move_to(target, MoveMode::Blocking),
                        None => Ok(()),
                    })
                });
                report(prompt, "Limit test", swept)?;
            }
            MonitorAction::AdjustMargin => {
                margin = prompt_margin(prompt, margin);
                if !monitor.set_margin(margin) {
                    say(prompt, "The boundary monitor is no longer running.")?;
                }
            }
            MonitorAction::Exit => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::limits::testing::RecordingDisplay;
    use crate::prompt::shared;
    use crate::prompt::testing::scripted;
    use crate::sim::SimArm;

    fn quiet_settings() -> MonitorSettings {
        MonitorSettings {
            status_interval: Duration::from_millis(5),
            alert_interval: Duration::from_millis(5),
            ..MonitorSettings::default()
        }
    }

    #[test]
    fn control_moves_home_and_to_waypoint_then_closes() {
        let arm = Arc::new(SimArm::instant());
        let prompt = shared(scripted("2\n4\n3\n1\n5\n"));
        let mut jogs = 0;

        run_control(Session::new(arm.clone()), &prompt, &mut |_| {
            jogs += 1;
            Ok(())
        })
        .unwrap();

        let targets: Vec<Pose> = arm.moves().into_iter().map(|(pose, _)| pose).collect();
        assert_eq!(
            targets,
            vec![PREDEFINED[3].target().unwrap(), HOME.target().unwrap()]
        );
        assert!(arm.moves().iter().all(|(_, mode)| *mode == MoveMode::Blocking));
        assert_eq!(jogs, 0);
        assert_eq!(arm.close_count(), 1);
    }

    #[test]
    fn control_runs_manual_mode() {
        let arm = Arc::new(SimArm::instant());
        let prompt = shared(scripted("4\n5\n"));
        let mut jogs = 0;

        run_control(Session::new(arm.clone()), &prompt, &mut |_| {
            jogs += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(jogs, 1);
    }

    #[test]
    fn control_closes_when_input_ends() {
        let arm = Arc::new(SimArm::instant());
        let prompt = shared(scripted("1\n"));
        run_control(Session::new(arm.clone()), &prompt, &mut |_| Ok(())).unwrap();
        assert_eq!(arm.close_count(), 1);
    }

    #[test]
    fn monitor_moves_to_typed_coordinates() {
        let arm = Arc::new(SimArm::instant());
        let prompt = shared(scripted("2\n200\nabc\nNaN\n10\ninf\n-inf\n120\n0\n5\n"));

        run_monitor(
            Session::new(arm.clone()),
            &prompt,
            Box::new(RecordingDisplay::default()),
            quiet_settings(),
            CancelToken::new(),
        )
        .unwrap();

        assert_eq!(arm.speed(), Some((DEFAULT_SPEED, DEFAULT_ACCELERATION)));
        assert_eq!(
            arm.moves(),
            vec![(Pose::new(200.0, 10.0, 120.0, 0.0), MoveMode::Blocking)]
        );
        assert_eq!(arm.close_count(), 1);
    }

    #[test]
    fn coordinates_must_be_finite() {
        assert_eq!(parse_coordinate(" -12.5".trim()), Ok(-12.5));
        assert!(parse_coordinate("NaN").is_err());
        assert!(parse_coordinate("inf").is_err());
        assert!(parse_coordinate("x").is_err());
    }

    #[test]
    fn monitor_sweeps_limits() {
        let arm = Arc::new(SimArm::instant());
        let prompt = shared(scripted("3\n5\n"));

        run_monitor(
            Session::new(arm.clone()),
            &prompt,
            Box::new(RecordingDisplay::default()),
            quiet_settings(),
            CancelToken::new(),
        )
        .unwrap();

        let xs: Vec<f32> = arm.moves().iter().map(|(pose, _)| pose.x).collect();
        assert_eq!(xs, vec![-180.0, 0.0, 180.0]);
    }

    #[test]
    fn failed_read_keeps_menu_running() {
        let arm = Arc::new(SimArm::instant());
        arm.fail_pose_reads_after(0);
        let prompt = shared(scripted("1\n3\n5\n"));

        run_control(Session::new(arm.clone()), &prompt, &mut |_| Ok(())).unwrap();
        assert_eq!(arm.moves().len(), 1);
        assert_eq!(arm.close_count(), 1);
    }
}

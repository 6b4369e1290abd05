//! Boundary monitoring: a status loop that keeps the pose on screen and an
//! alert loop that asks the operator what to do when the arm gets close to a
//! boundary waypoint.
//!
//! The alert loop never waits on the prompt. If the menu is holding it for
//! input, the warning is printed straight away and the question is handed to
//! the menu as an [`AlertRequest`], answered after the operator's next line.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::cancel::CancelToken;
use crate::pose::BOUNDARIES;
use crate::prompt::{self, Prompt, PromptError, SharedPrompt};
use crate::robot::Arm;
use crate::{ArmError, Margin, Pose, Waypoint};

pub const STATUS_INTERVAL: Duration = Duration::from_millis(200);
pub const ALERT_INTERVAL: Duration = Duration::from_millis(500);

pub const STATUS_THREAD: &str = "pose-status";
pub const ALERT_THREAD: &str = "boundary-alert";

/// Somewhere to render the live pose.
pub trait PoseDisplay: Send {
    fn show(&mut self, pose: &Pose);
    fn fail(&mut self, error: &ArmError);
    fn finish(&mut self);
}

/// Boundaries the pose is near, in table order.
pub fn boundary_hits(
    pose: Pose,
    margin: Margin,
    boundaries: &[Waypoint],
) -> impl Iterator<Item = &Waypoint> {
    boundaries
        .iter()
        .filter(move |boundary| boundary.is_near(&pose, margin))
}

#[derive(Debug, PartialEq)]
pub enum StatusOutcome {
    Cancelled,
    ReadFailed,
}

pub fn run_status_loop(
    arm: &dyn Arm,
    display: &mut dyn PoseDisplay,
    cancel: &CancelToken,
    interval: Duration,
) -> StatusOutcome {
    loop {
        if cancel.is_cancelled() {
            display.finish();
            return StatusOutcome::Cancelled;
        }
        match arm.pose() {
            Ok(pose) => display.show(&pose),
            Err(e) => {
                error!("Status loop stopped: {e}");
                display.fail(&e);
                return StatusOutcome::ReadFailed;
            }
        }
        if cancel.sleep(interval) {
            display.finish();
            return StatusOutcome::Cancelled;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertChoice {
    Continue,
    Stop,
    Adjust,
}

const ALERT_CHOICES: [(&str, AlertChoice); 3] = [
    ("Continue moving", AlertChoice::Continue),
    ("Stop immediately", AlertChoice::Stop),
    ("Adjust safety margin", AlertChoice::Adjust),
];

/// What the operator decided about one alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertReply {
    Continue,
    Stop,
    Adjust(Margin),
}

fn alert_message(boundary: &str) -> String {
    format!("ALERT: approaching boundary {boundary}")
}

/// Asks about one boundary. A margin change is read in the same turn.
pub fn ask_alert(
    prompt: &mut dyn Prompt,
    boundary: &str,
    margin: Margin,
) -> Result<AlertReply, PromptError> {
    let reply = match *prompt::choose(prompt, &alert_message(boundary), &ALERT_CHOICES)? {
        AlertChoice::Continue => AlertReply::Continue,
        AlertChoice::Stop => AlertReply::Stop,
        AlertChoice::Adjust => AlertReply::Adjust(read_margin(prompt, margin)),
    };
    Ok(reply)
}

/// Asks for a new margin. On closed input the current margin is kept.
pub fn read_margin(prompt: &mut dyn Prompt, current: Margin) -> Margin {
    let message = format!("New safety margin in mm ({current} now)");
    match prompt::ask(prompt, &message, str::parse::<Margin>) {
        Ok(margin) => margin,
        Err(e) => {
            warn!("Margin unchanged: {e}");
            current
        }
    }
}

pub fn prompt_margin(prompt: &SharedPrompt, current: Margin) -> Margin {
    read_margin(&mut *prompt.lock(), current)
}

/// An alert the menu has to put to the operator.
#[derive(Debug)]
pub struct AlertRequest {
    pub boundary: &'static str,
    pub margin: Margin,
    reply: Sender<AlertReply>,
}

impl AlertRequest {
    /// Asks the operator and passes the answer back to the alert loop.
    pub fn answer(self, prompt: &mut dyn Prompt) -> Result<AlertReply, PromptError> {
        let reply = ask_alert(prompt, self.boundary, self.margin)?;
        if self.reply.send(reply).is_err() {
            warn!("Alert on {} answered after the monitor ended", self.boundary);
        }
        Ok(reply)
    }
}

/// The menu's side of the alert loop.
pub struct AlertHandle {
    margin: Sender<Margin>,
    requests: Receiver<AlertRequest>,
}

impl AlertHandle {
    /// Hands a new margin to the alert loop. Returns `false` once the alert
    /// loop has ended.
    pub fn set_margin(&self, margin: Margin) -> bool {
        self.margin.send(margin).is_ok()
    }

    pub fn pending(&self) -> Option<AlertRequest> {
        self.requests.try_recv().ok()
    }
}

type Notice = Box<dyn FnMut(&str) + Send>;

#[derive(Debug)]
pub enum AlertOutcome {
    Cancelled,
    /// The operator chose to stop; the controller queue was halted.
    Stopped,
    ReadFailed(ArmError),
    StopFailed(ArmError),
    PromptClosed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Pose read failed: {0}")]
    Read(ArmError),
    #[error("Stop command failed: {0}")]
    Stop(ArmError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// The proximity check. Owns the margin; new margins arrive over a channel
/// and are applied at the top of each poll.
pub struct AlertLoop {
    arm: Arc<dyn Arm>,
    prompt: SharedPrompt,
    boundaries: &'static [Waypoint],
    margin: Margin,
    updates: Receiver<Margin>,
    requests: Sender<AlertRequest>,
    /// Reply to a request handed to the menu, while unanswered.
    awaiting: Option<Receiver<AlertReply>>,
    notice: Notice,
}

impl AlertLoop {
    pub fn new(
        arm: Arc<dyn Arm>,
        prompt: SharedPrompt,
        boundaries: &'static [Waypoint],
        margin: Margin,
    ) -> (Self, AlertHandle) {
        let (margin_tx, updates) = mpsc::channel();
        let (requests, requests_rx) = mpsc::channel();
        let alert = AlertLoop {
            arm,
            prompt,
            boundaries,
            margin,
            updates,
            requests,
            awaiting: None,
            notice: Box::new(|message| eprintln!("\n{message}")),
        };
        let handle = AlertHandle {
            margin: margin_tx,
            requests: requests_rx,
        };
        (alert, handle)
    }

    /// Where warnings go while the prompt is busy. Stderr by default.
    pub fn with_notice(mut self, notice: impl FnMut(&str) + Send + 'static) -> Self {
        self.notice = Box::new(notice);
        self
    }

    pub fn margin(&self) -> Margin {
        self.margin
    }

    fn apply_updates(&mut self) {
        loop {
            match self.updates.try_recv() {
                Ok(margin) => {
                    info!("Safety margin now {margin}");
                    self.margin = margin;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    fn apply(&mut self, reply: AlertReply) -> Result<Flow, AlertError> {
        match reply {
            AlertReply::Continue => Ok(Flow::Continue),
            AlertReply::Stop => {
                self.arm.stop().map_err(AlertError::Stop)?;
                Ok(Flow::Stopped)
            }
            AlertReply::Adjust(margin) => {
                self.margin = margin;
                info!("Safety margin now {margin}");
                Ok(Flow::Continue)
            }
        }
    }

    /// One poll: read the pose, check every boundary, ask the operator about
    /// each one that is near. While a request handed to the menu is open,
    /// only its reply is checked.
    pub fn poll_once(&mut self, cancel: &CancelToken) -> Result<Flow, AlertError> {
        self.apply_updates();
        if let Some(awaiting) = &self.awaiting {
            return match awaiting.try_recv() {
                Ok(reply) => {
                    self.awaiting = None;
                    self.apply(reply)
                }
                Err(TryRecvError::Empty) => Ok(Flow::Continue),
                Err(TryRecvError::Disconnected) => {
                    self.awaiting = None;
                    Err(PromptError::Closed.into())
                }
            };
        }

        let pose = self.arm.pose().map_err(AlertError::Read)?;
        let hits: Vec<&'static Waypoint> =
            boundary_hits(pose, self.margin, self.boundaries).collect();
        for boundary in hits {
            warn!("Pose {} near boundary {}", pose.status_line(), boundary.name);
            if cancel.is_cancelled() {
                break;
            }
            let Some(mut prompt) = self.prompt.try_lock() else {
                // the menu is waiting for a line
                (self.notice)(&format!(
                    "{}. Answer the current prompt to respond.",
                    alert_message(boundary.name)
                ));
                let (reply, awaiting) = mpsc::channel();
                let request = AlertRequest {
                    boundary: boundary.name,
                    margin: self.margin,
                    reply,
                };
                if self.requests.send(request).is_ok() {
                    self.awaiting = Some(awaiting);
                }
                return Ok(Flow::Continue);
            };
            let reply = ask_alert(&mut *prompt, boundary.name, self.margin)?;
            drop(prompt);
            if self.apply(reply)? == Flow::Stopped {
                return Ok(Flow::Stopped);
            }
        }
        Ok(Flow::Continue)
    }

    pub fn run(mut self, cancel: &CancelToken, interval: Duration) -> AlertOutcome {
        loop {
            if cancel.is_cancelled() {
                return AlertOutcome::Cancelled;
            }
            match self.poll_once(cancel) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stopped) => return AlertOutcome::Stopped,
                Err(e) => {
                    error!("Alert loop stopped: {e}");
                    eprintln!("Monitor error: {e}");
                    return match e {
                        AlertError::Read(e) => AlertOutcome::ReadFailed(e),
                        AlertError::Stop(e) => AlertOutcome::StopFailed(e),
                        AlertError::Prompt(_) => AlertOutcome::PromptClosed,
                    };
                }
            }
            if cancel.sleep(interval) {
                return AlertOutcome::Cancelled;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub margin: Margin,
    pub status_interval: Duration,
    pub alert_interval: Duration,
    pub boundaries: &'static [Waypoint],
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings {
            margin: Margin::DEFAULT,
            status_interval: STATUS_INTERVAL,
            alert_interval: ALERT_INTERVAL,
            boundaries: &BOUNDARIES,
        }
    }
}

/// Both background loops, joined on [`Monitor::shutdown`].
pub struct Monitor {
    cancel: CancelToken,
    alerts: AlertHandle,
    status: JoinHandle<StatusOutcome>,
    alert: JoinHandle<AlertOutcome>,
}

impl Monitor {
    pub fn start(
        arm: Arc<dyn Arm>,
        prompt: SharedPrompt,
        display: Box<dyn PoseDisplay>,
        settings: MonitorSettings,
    ) -> io::Result<Self> {
        Self::start_with(arm, prompt, display, settings, CancelToken::new())
    }

    /// Like [`Monitor::start`], with the loops bound to an existing token so
    /// an interrupt handler can end them.
    pub fn start_with(
        arm: Arc<dyn Arm>,
        prompt: SharedPrompt,
        mut display: Box<dyn PoseDisplay>,
        settings: MonitorSettings,
        cancel: CancelToken,
    ) -> io::Result<Self> {
        let status = {
            let arm = Arc::clone(&arm);
            let cancel = cancel.clone();
            thread::Builder::new()
                .name(STATUS_THREAD.into())
                .spawn(move || {
                    run_status_loop(&*arm, &mut *display, &cancel, settings.status_interval)
                })?
        };

        let (alert_loop, alerts) =
            AlertLoop::new(arm, prompt, settings.boundaries, settings.margin);
        let alert = {
            let cancel = cancel.clone();
            thread::Builder::new()
                .name(ALERT_THREAD.into())
                .spawn(move || alert_loop.run(&cancel, settings.alert_interval))
        };
        let alert = match alert {
            Ok(alert) => alert,
            Err(e) => {
                cancel.cancel();
                let _ = status.join();
                return Err(e);
            }
        };

        info!("Boundary monitor started with margin {}", settings.margin);
        Ok(Monitor {
            cancel,
            alerts,
            status,
            alert,
        })
    }

    pub fn set_margin(&self, margin: Margin) -> bool {
        self.alerts.set_margin(margin)
    }

    /// An alert raised while the prompt was busy, if one is waiting.
    pub fn pending_alert(&self) -> Option<AlertRequest> {
        self.alerts.pending()
    }

    pub fn is_alerting(&self) -> bool {
        !self.alert.is_finished()
    }

    /// Cancels both loops and waits for them.
    pub fn shutdown(self) -> AlertOutcome {
        self.cancel.cancel();
        if let Ok(outcome) = self.status.join() {
            info!("Status loop ended: {outcome:?}");
        }
        let outcome = self.alert.join().unwrap_or(AlertOutcome::Cancelled);
        info!("Alert loop ended: {outcome:?}");
        outcome
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Collects what the status loop shows.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingDisplay {
        pub(crate) shown: Arc<Mutex<Vec<Pose>>>,
        pub(crate) failed: Arc<Mutex<bool>>,
        pub(crate) finished: Arc<Mutex<bool>>,
    }

    impl PoseDisplay for RecordingDisplay {
        fn show(&mut self, pose: &Pose) {
            self.shown.lock().push(*pose);
        }

        fn fail(&mut self, _error: &ArmError) {
            *self.failed.lock() = true;
        }

        fn finish(&mut self) {
            *self.finished.lock() = true;
        }
    }
}

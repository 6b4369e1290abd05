use std::fmt::Display;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::limits::PoseDisplay;
use crate::{ArmError, Pose};

const TICK: Duration = Duration::from_millis(80);

fn spinner(message: impl Into<String>) -> ProgressBar {
    let style = ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bar = ProgressBar::new_spinner().with_style(style);
    bar.set_message(message.into());
    bar.enable_steady_tick(TICK);
    bar
}

/// Runs `work` behind a spinner and leaves a ✔ or ✘ line behind.
pub fn task<T, E: Display>(
    message: &str,
    done: &str,
    work: impl FnOnce() -> Result<T, E>,
) -> Result<T, E> {
    let bar = spinner(message);
    let result = work();
    match &result {
        Ok(_) => bar.finish_with_message(format!("✔ {done}")),
        Err(e) => bar.abandon_with_message(format!("✘ {message} failed: {e}")),
    }
    result
}

/// Live pose readout for the status loop.
pub struct PoseSpinner {
    bar: ProgressBar,
}

impl PoseSpinner {
    pub fn new() -> Self {
        PoseSpinner {
            bar: spinner("Starting pose monitor..."),
        }
    }
}

impl Default for PoseSpinner {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseDisplay for PoseSpinner {
    fn show(&mut self, pose: &Pose) {
        self.bar.set_message(pose.status_line());
    }

    fn fail(&mut self, error: &ArmError) {
        self.bar
            .abandon_with_message(format!("✘ Pose read failed: {error}"));
    }

    fn finish(&mut self) {
        self.bar.finish_and_clear();
    }
}

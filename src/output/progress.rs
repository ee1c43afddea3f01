use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use cirelay::{AbortCause, Stage, StageListener};

use super::styling::{bright, bright_green, bright_red, bright_yellow};

/// Renders one spinner per workflow stage on stderr.
pub struct StageProgress {
    current: Mutex<Option<ProgressBar>>,
}

impl StageProgress {
    pub fn new(title: &str) -> Self {
        eprintln!("{}  {}", bright("⚙️"), bright(title).underlined());
        Self {
            current: Mutex::new(None),
        }
    }

    fn take(&self) -> Option<ProgressBar> {
        self.current.lock().ok().and_then(|mut current| current.take())
    }
}

impl StageListener for StageProgress {
    fn stage_started(&self, stage: Stage) {
        let pb = create_spinner(bright_yellow(stage).to_string());
        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = current.replace(pb) {
                previous.finish_and_clear();
            }
        }
    }

    fn stage_completed(&self, stage: Stage) {
        match self.take() {
            Some(pb) => pb.finish_with_message(bright_green(format!("{stage} ✓")).to_string()),
            None => eprintln!("  {}", bright_green(format!("{stage} ✓"))),
        }
    }

    fn stage_failed(&self, stage: Stage, cause: &AbortCause) {
        let message = bright_red(format!("{stage} ✗ {cause}")).to_string();
        match self.take() {
            Some(pb) => pb.abandon_with_message(message),
            None => eprintln!("  {message}"),
        }
    }
}

/// Spinner shown while a command waits on a single pipeline.
pub fn waiting(subject: &str) -> ProgressBar {
    create_spinner(bright_yellow(format!("Waiting for {subject}")).to_string())
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

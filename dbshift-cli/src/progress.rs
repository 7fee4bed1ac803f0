use dbshift_types::indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while a long-running stage works. Hidden automatically when
/// stderr is not a terminal so JSON event output stays clean.
pub struct StageSpinner {
    bar: ProgressBar,
}

impl StageSpinner {
    pub fn start(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("spinner template"),
        );
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }
}

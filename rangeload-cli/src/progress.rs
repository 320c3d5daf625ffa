//! Terminal progress bar.

use indicatif::{ProgressBar, ProgressStyle};
use rangeload::progress::{ProgressAction, ProgressSink, ProgressUpdate};

const BAR_TEMPLATE: &str =
    "{msg:>11.cyan.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {prefix}";

/// Progress sink drawing an `indicatif` bar on stderr.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }
}

impl ProgressSink for BarProgress {
    fn update(&self, update: &ProgressUpdate) {
        if let Some(total) = update.total {
            self.bar.set_length(total);
        }
        self.bar.set_prefix(update.label.clone());
        self.bar.set_message(update.action.label());
        self.bar.set_position(update.bytes_done);

        if update.action == ProgressAction::Completed {
            self.bar.finish();
        }
    }

    fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

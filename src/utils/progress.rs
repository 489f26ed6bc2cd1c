//! Progress indicators for pipeline phases

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner for indeterminate operations
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Progress wrapper for a single pipeline phase
pub struct PhaseProgress {
    pb: ProgressBar,
    title: String,
}

impl PhaseProgress {
    /// Start a spinner for `title`; a hidden bar is used when `enabled` is false
    pub fn start(title: &str, enabled: bool) -> Self {
        let pb = if enabled {
            create_spinner(title)
        } else {
            ProgressBar::hidden()
        };
        Self {
            pb,
            title: title.to_string(),
        }
    }

    /// Attach the spinner to a multi-progress group (concurrent sub-phases)
    pub fn start_in(multi: &MultiProgress, title: &str, enabled: bool) -> Self {
        let progress = Self::start(title, enabled);
        if enabled {
            let pb = multi.add(progress.pb.clone());
            return Self {
                pb,
                title: progress.title,
            };
        }
        progress
    }

    pub fn finish_success(&self) {
        self.pb.finish_with_message(format!("✓ {}", self.title));
    }

    pub fn finish_skipped(&self) {
        self.pb
            .finish_with_message(format!("↷ {} [SKIPPED]", self.title));
    }

    pub fn finish_error(&self, error: &str) {
        self.pb
            .finish_with_message(format!("✗ {}: {}", self.title, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_spinner() {
        let pb = create_spinner("Test operation");
        assert!(pb.message().contains("Test operation"));
        pb.finish_and_clear();
    }

    #[test]
    fn test_hidden_phase_progress() {
        let progress = PhaseProgress::start("Install chart", false);
        progress.finish_skipped();
        progress.finish_success();
    }
}

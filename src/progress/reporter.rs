//! Progress bars for the CLI
//!
//! Renders a [`TransferMonitor`] with indicatif:
//! - Operation count progress
//! - Byte transfer progress with throughput and ETA
//! - A status line

use super::monitor::{TransferMonitor, TransferProgress};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Progress bars following a monitor
pub struct ProgressReporter {
    multi: MultiProgress,
    objects_bar: ProgressBar,
    bytes_bar: ProgressBar,
    status: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let objects_bar = multi.add(ProgressBar::new(0));
        objects_bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} objects ({percent}%)")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        objects_bar.set_prefix("Objects");

        let bytes_bar = multi.add(ProgressBar::new(0));
        bytes_bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec}, ETA {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bytes_bar.set_prefix("Data   ");

        Self {
            multi,
            objects_bar,
            bytes_bar,
            status,
        }
    }

    /// Reporter that draws nothing (quiet mode, non-TTY output)
    pub fn hidden() -> Self {
        let reporter = Self::new();
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Set the status line
    pub fn set_status(&self, message: &str) {
        self.status.set_message(message.to_string());
    }

    /// Redraw from a counter snapshot
    pub fn update(&self, progress: &TransferProgress) {
        self.objects_bar.set_length(progress.objects_total);
        self.objects_bar.set_position(progress.objects_current);
        self.bytes_bar.set_length(progress.bytes_total);
        self.bytes_bar.set_position(progress.bytes_current);
    }

    /// Follow `monitor` until the returned task is aborted
    pub fn follow(self: &Arc<Self>, monitor: &TransferMonitor) -> JoinHandle<()> {
        let reporter = Arc::clone(self);
        let mut updates = monitor.subscribe();

        tokio::spawn(async move {
            loop {
                let snapshot = *updates.borrow_and_update();
                reporter.update(&snapshot);
                reporter.set_status(phase(&snapshot));
                if updates.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Current bar positions as counters
    pub fn snapshot(&self) -> TransferProgress {
        TransferProgress {
            bytes_current: self.bytes_bar.position(),
            bytes_total: self.bytes_bar.length().unwrap_or(0),
            objects_current: self.objects_bar.position(),
            objects_total: self.objects_bar.length().unwrap_or(0),
        }
    }

    pub fn finish_success(&self, message: &str) {
        self.status.finish_with_message(format!("✓ {}", message));
        self.objects_bar.finish();
        self.bytes_bar.finish();
    }

    pub fn finish_error(&self, message: &str) {
        self.status.finish_with_message(format!("✗ {}", message));
        self.objects_bar.abandon();
        self.bytes_bar.abandon();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Status line for a counter snapshot; nothing is registered until planning ends
fn phase(progress: &TransferProgress) -> &'static str {
    if progress.objects_total == 0 {
        "Planning..."
    } else {
        "Transferring..."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_update_from_snapshot() {
        let reporter = ProgressReporter::hidden();
        let progress = TransferProgress {
            bytes_current: 512,
            bytes_total: 1024,
            objects_current: 1,
            objects_total: 4,
        };
        reporter.update(&progress);
        assert_eq!(reporter.snapshot(), progress);
    }

    #[tokio::test]
    async fn test_follow_monitor() {
        let reporter = Arc::new(ProgressReporter::hidden());
        let monitor = TransferMonitor::new();
        let task = reporter.follow(&monitor);

        monitor.register(2, 100);
        monitor.add_bytes(60);

        let mut seen = TransferProgress::default();
        for _ in 0..100 {
            seen = reporter.snapshot();
            if seen.bytes_current == 60 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task.abort();
        assert_eq!(seen.bytes_current, 60);
        assert_eq!(seen.objects_total, 2);
        assert_eq!(reporter.status.message(), "Transferring...");
    }

    #[test]
    fn test_status_follows_phase() {
        let reporter = ProgressReporter::hidden();
        let mut progress = TransferProgress::default();
        reporter.set_status(phase(&progress));
        assert_eq!(reporter.status.message(), "Planning...");

        progress.objects_total = 3;
        reporter.set_status(phase(&progress));
        assert_eq!(reporter.status.message(), "Transferring...");
    }
}

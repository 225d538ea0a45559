//! Progress reporting for scans, ingests and analytics runs.
//!
//! The CLI drives an `IndicatifReporter`; library callers and tests use
//! `NoopReporter` or their own implementation.

use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Sink for stage progress.
pub trait ProgressReporter: Send + Sync {
    /// Begin a stage with an optional item total.
    fn start(&self, task: &str, total: Option<u64>);

    /// Advance the current stage by `amount` items.
    fn advance(&self, amount: u64);

    /// Mark the current stage as finished.
    fn finish(&self);

    /// Print a line without disturbing the bar.
    fn message(&self, msg: &str);
}

#[derive(Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn start(&self, _task: &str, _total: Option<u64>) {}
    fn advance(&self, _amount: u64) {}
    fn finish(&self) {}
    fn message(&self, _msg: &str) {}
}

/// Terminal progress bar. Hidden when stderr is not wanted (quiet runs).
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: ProgressBar,
    completed: AtomicU64,
}

impl IndicatifReporter {
    pub fn new(visible: bool) -> Self {
        let bar = ProgressBar::new(0);
        if !visible {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self {
            bar,
            completed: AtomicU64::new(0),
        }
    }

    /// Items advanced since the last `start`.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

impl ProgressReporter for IndicatifReporter {
    fn start(&self, task: &str, total: Option<u64>) {
        self.completed.store(0, Ordering::Relaxed);
        let style = match total {
            Some(total) => {
                self.bar.set_length(total);
                ProgressStyle::with_template(
                    "{spinner:.green} {msg:<10} [{bar:30.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map(|s| s.progress_chars("=> "))
            }
            None => {
                self.bar.set_length(0);
                ProgressStyle::with_template("{spinner:.green} {msg:<10} {pos} files")
            }
        };
        if let Ok(style) = style {
            self.bar.set_style(style);
        }
        self.bar.set_message(task.to_string());
        self.bar.reset();
    }

    fn advance(&self, amount: u64) {
        self.completed.fetch_add(amount, Ordering::Relaxed);
        self.bar.inc(amount);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn message(&self, msg: &str) {
        self.bar.println(msg);
    }
}

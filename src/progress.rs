//! # Progress Tracking and Statistics Module
//!
//! Terminal feedback for the batch CLI and the totals it prints at the end.
//!
//! ## Components:
//! - `ProgressManager`: one bar advanced per container processed
//! - `BatchStats`: cumulative counts folded from the typed batch reports
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] [========================================] 12/12 (100%) trip: 40 created, 2 failed
//! ```
//!
//! ## Example:
//! ```rust
//! use media_pipeline::progress::{BatchStats, ProgressManager};
//! use media_pipeline::PreviewReport;
//!
//! let reports = vec![PreviewReport::default()];
//! let progress = ProgressManager::new(reports.len() as u64, true);
//! let mut stats = BatchStats::default();
//!
//! for report in &reports {
//!     stats.add_previews(report);
//!     progress.update("trip: done");
//! }
//! progress.finish(&stats.format_summary());
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;

use crate::duplicates::{DuplicateReport, RemovalReport};
use crate::encoding::EncodingReport;
use crate::previews::PreviewReport;
use crate::utils::format_size;

/// Manages the progress bar of a batch run
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// A bar over `total` containers; hidden when another output owns stdout.
    pub fn new(total: u64, hidden: bool) -> Self {
        if hidden {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Advance by one container with a message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Create a spinner for indeterminate progress
    pub fn spinner(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}

/// Totals across every container of a run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct BatchStats {
    pub containers: usize,
    pub items: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_saved: i64,
    pub duplicates: usize,
    pub removed: usize,
}

impl BatchStats {
    pub fn add_previews(&mut self, report: &PreviewReport) {
        self.containers += 1;
        self.items += report.total;
        self.succeeded += report.created + report.reused;
        self.skipped += report.skipped;
        self.failed += report.failures.len();
    }

    pub fn add_encoding(&mut self, report: &EncodingReport) {
        self.containers += 1;
        self.items += report.total;
        self.succeeded += report.encoded.len();
        self.skipped += report.skipped.len();
        self.failed += report.failures.len();
        self.bytes_saved += report.bytes_saved();
    }

    pub fn add_duplicates(&mut self, report: &DuplicateReport) {
        self.containers += 1;
        self.items += report.checked;
        self.succeeded += report.checked.saturating_sub(report.failures.len());
        self.failed += report.failures.len();
        self.duplicates += report.duplicates.len();
    }

    /// Removal runs after detection on the same container, so it is not counted again.
    pub fn add_removal(&mut self, report: &RemovalReport) {
        self.removed += report.removed.len();
        self.failed += report.failures.len();
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn format_summary(&self) -> String {
        let mut summary = format!(
            "Containers: {} | Items: {} | Succeeded: {} | Skipped: {} | Failed: {}",
            self.containers, self.items, self.succeeded, self.skipped, self.failed
        );
        if self.bytes_saved != 0 {
            let saved = format_size(self.bytes_saved.unsigned_abs());
            if self.bytes_saved > 0 {
                summary.push_str(&format!(" | Saved: {}", saved));
            } else {
                summary.push_str(&format!(" | Grew: {}", saved));
            }
        }
        if self.duplicates > 0 || self.removed > 0 {
            summary.push_str(&format!(" | Duplicates: {} | Removed: {}", self.duplicates, self.removed));
        }
        summary
    }
}

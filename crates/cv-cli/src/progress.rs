//! Progress rendering for CLI operations
//!
//! [`BarReporter`] plugs into the engine's progress observer and draws one
//! spinner line per content type.

use cv_common::ContentType;
use cv_engine::progress::{ProgressReporter, ProgressUpdate};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Renders engine progress updates with indicatif
#[derive(Debug, Default)]
pub struct BarReporter {
    bars: MultiProgress,
    by_type: Mutex<HashMap<ContentType, ProgressBar>>,
}

impl BarReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn bar(&self, content_type: ContentType) -> ProgressBar {
        let mut by_type = self.by_type.lock().unwrap_or_else(PoisonError::into_inner);
        by_type
            .entry(content_type)
            .or_insert_with(|| {
                let bar = self.bars.add(create_spinner(content_type.as_str()));
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            })
            .clone()
    }
}

impl ProgressReporter for BarReporter {
    fn report(&self, update: &ProgressUpdate) {
        let bar = self.bar(update.content_type);
        bar.set_position(update.items_processed);
        bar.set_message(format!(
            "{:<16} {} batches",
            update.content_type.as_str(),
            update.batches_completed
        ));
    }

    fn finish(&self, content_type: ContentType, items: u64) {
        let bar = self.bar(content_type);
        bar.set_position(items);
        bar.finish_with_message(format!("{:<16} done", content_type.as_str()));
    }
}

/// Create a spinner that counts items
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed_precise}] {pos} items")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_reporter_tracks_one_bar_per_type() {
        let reporter = BarReporter::new();
        reporter.report(&ProgressUpdate::new(ContentType::Model, 10, 1));
        reporter.report(&ProgressUpdate::new(ContentType::Model, 20, 2));
        reporter.report(&ProgressUpdate::new(ContentType::User, 5, 1));
        reporter.finish(ContentType::Model, 20);

        let bars = reporter.by_type.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[&ContentType::Model].position(), 20);
        assert!(bars[&ContentType::Model].is_finished());
    }
}

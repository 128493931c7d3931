//! Console-facing output: a [`MessageSink`] that prints roster/chat/status
//! text with the configured colors, plus a progress bar for file transfers.

use std::time::Duration;

use console::Style;
use dc_core::sink::{MessageSink, Priority};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::ColorConfig;

/// Prints [`MessageSink::post`] calls to stdout, colored by priority using
/// the configured palette.
pub struct ConsoleSink {
    normal: Style,
    op: Style,
    system: Style,
    error: Style,
}

impl ConsoleSink {
    /// Build a sink from the configured color palette.
    #[must_use]
    pub fn new(colors: &ColorConfig) -> Self {
        Self {
            normal: style_from_name(&colors.color_normal),
            op: style_from_name(&colors.color_op),
            system: style_from_name(&colors.color_system),
            error: style_from_name(&colors.color_error),
        }
    }
}

fn style_from_name(name: &str) -> Style {
    match name.to_lowercase().as_str() {
        "red" => Style::new().red(),
        "green" => Style::new().green(),
        "yellow" => Style::new().yellow(),
        "blue" => Style::new().blue(),
        "cyan" => Style::new().cyan(),
        "magenta" => Style::new().magenta(),
        _ => Style::new().white(),
    }
}

impl MessageSink for ConsoleSink {
    fn post(&self, priority: Priority, text: &str) {
        let style = match priority {
            Priority::High => &self.error,
            Priority::Medium => &self.system,
            Priority::Low => &self.normal,
        };
        let _ = &self.op; // reserved for operator-chat once hub chat routing tags the speaker
        println!("{}", style.apply_to(text));
    }
}

/// Transfer progress tracker for an in-flight `$ADCGET`/download.
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Create a new progress tracker.
    #[must_use]
    pub fn new(total_bytes: u64, filename: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .expect("invalid progress bar template")
                .progress_chars("#>-"),
        );

        bar.set_message(format!("Transferring: {filename}"));

        Self { bar }
    }

    /// Update progress.
    pub fn update(&self, transferred_bytes: u64) {
        self.bar.set_position(transferred_bytes);
    }

    /// Set a custom message.
    pub fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    /// Finish with the default success message.
    pub fn finish(&self) {
        self.bar.finish_with_message("Transfer complete!");
    }

    /// Finish with a custom message.
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors).
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Format bytes in human-readable form, e.g. `format_bytes(1024) == "1.00 KB"`.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format a transfer rate in human-readable form.
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Format a duration in human-readable form.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Format an ETA given in seconds.
#[must_use]
pub fn format_eta(seconds: f64) -> String {
    format_duration(Duration::from_secs_f64(seconds))
}

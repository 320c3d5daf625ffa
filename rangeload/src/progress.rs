//! Progress reporting for downloads.
//!
//! The engine reports progress through a [`ProgressSink`]. Sinks are purely
//! observational: they never influence the download.

use std::io::Write;
use std::sync::Arc;

/// Number of ticks in a rendered progress bar.
pub const PROGRESS_TICKS: usize = 60;

/// What a progress update describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    /// Bytes were written to the destination.
    Downloaded,
    /// A part of an existing local file was verified.
    Verified,
    /// A download continues after already-verified bytes.
    ResumingAt,
    /// The download finished.
    Completed,
}

impl ProgressAction {
    /// Verb shown in rendered progress lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Downloaded => "Downloaded",
            Self::Verified => "Verified",
            Self::ResumingAt => "Resuming at",
            Self::Completed => "Completed",
        }
    }
}

/// A single progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub action: ProgressAction,
    /// Bytes done so far, counted from the start of the object.
    pub bytes_done: u64,
    /// Total object size, when known.
    pub total: Option<u64>,
    /// Name of the destination.
    pub label: String,
}

/// Receiver of progress notifications.
pub trait ProgressSink: Send + Sync {
    /// Handle one update.
    fn update(&self, update: &ProgressUpdate);

    /// Called once when the engine stops reporting for an object.
    fn finish(&self) {}
}

/// Shared progress sink handle.
pub type SharedProgress = Arc<dyn ProgressSink>;

/// Sink that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _update: &ProgressUpdate) {}
}

/// Render a single-line progress bar.
///
/// ```
/// use rangeload::progress::{render_progress_line, ProgressAction, ProgressUpdate};
///
/// let line = render_progress_line(&ProgressUpdate {
///     action: ProgressAction::Downloaded,
///     bytes_done: 1024,
///     total: Some(2048),
///     label: "data.bin".to_string(),
/// });
/// assert!(line.ends_with("] Downloaded 1,024 of 2,048 bytes (50%) data.bin"));
/// ```
pub fn render_progress_line(update: &ProgressUpdate) -> String {
    let done = update.bytes_done;
    let effective_total = update.total.filter(|t| *t > 0).unwrap_or(1).max(done);
    let fraction = done as f64 / effective_total as f64;

    let ticks = ((fraction * PROGRESS_TICKS as f64).round() as usize).min(PROGRESS_TICKS);
    let percent = (fraction * 100.0).floor() as u64;

    let bar = if ticks > 0 {
        format!("{}>", "=".repeat(ticks - 1))
    } else {
        String::new()
    };
    let of_total = match update.total {
        Some(total) if total > 0 => format!(" of {}", group_thousands(total)),
        _ => String::new(),
    };

    format!(
        "[{}{}] {} {}{} bytes ({}%) {}",
        bar,
        " ".repeat(PROGRESS_TICKS - ticks),
        update.action.label(),
        group_thousands(done),
        of_total,
        percent,
        update.label
    )
}

/// Format an integer with comma thousands separators.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Sink that redraws a plain progress line on stderr.
///
/// Uses only carriage returns, so the output stays readable when stderr is
/// redirected to a file.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn update(&self, update: &ProgressUpdate) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}", render_progress_line(update));
        let _ = stderr.flush();
    }

    fn finish(&self) {
        let _ = writeln!(std::io::stderr());
    }
}

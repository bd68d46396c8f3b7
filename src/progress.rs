//! Progress and log-line callbacks for a preparation run.
//!
//! Inject an [`Arc<dyn PreparationProgressCallback>`] via
//! [`crate::config::PreparationConfigBuilder::progress_callback`] to receive
//! per-file events and the human-readable log stream (toolkit output, missing
//! file warnings, stage notes).
//!
//! The callback is handed down by reference to every pipeline stage; the
//! library keeps no global logging state of its own for this stream.
//! Diagnostics for developers still go through `tracing`.
//!
//! # Example
//!
//! ```rust
//! use pdf_dispatch::{LogLevel, PreparationProgressCallback};
//! use std::sync::Mutex;
//!
//! #[derive(Default)]
//! struct Collect(Mutex<Vec<String>>);
//!
//! impl PreparationProgressCallback for Collect {
//!     fn on_log(&self, level: LogLevel, line: &str) {
//!         self.0.lock().unwrap().push(format!("{level:?}: {line}"));
//!     }
//! }
//! ```

use crate::package::PreparationStats;
use std::path::Path;
use std::sync::Arc;

/// Severity of a log-stream line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Called by the package processor and the pipeline stages as a run
/// progresses.
///
/// Implementations must be `Send + Sync`. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait PreparationProgressCallback: Send + Sync {
    /// Called once before the first package.
    ///
    /// # Arguments
    /// * `recipients` — number of packages requested
    /// * `files`      — number of file references across all packages
    fn on_run_start(&self, recipients: usize, files: usize) {
        let _ = (recipients, files);
    }

    /// Called before a resolved file enters the pipeline.
    fn on_file_start(&self, recipient: &str, relative_path: &str) {
        let _ = (recipient, relative_path);
    }

    /// Called when a file was written to `output_path`.
    ///
    /// `password` is the owner password of the encrypted copy, when the
    /// pipeline encrypts.
    fn on_file_complete(
        &self,
        recipient: &str,
        relative_path: &str,
        output_path: &Path,
        password: Option<&str>,
    ) {
        let _ = (recipient, relative_path, output_path, password);
    }

    /// Called when a file reference could not be processed: missing from the
    /// inventory, or a stage failed fatally.
    fn on_file_error(&self, recipient: &str, relative_path: &str, error: &str) {
        let _ = (recipient, relative_path, error);
    }

    /// One line of the run log.
    fn on_log(&self, level: LogLevel, line: &str) {
        let _ = (level, line);
    }

    /// Called once after the last package, not called on cancellation.
    fn on_run_complete(&self, stats: &PreparationStats) {
        let _ = stats;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl PreparationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PreparationConfig`].
pub type ProgressCallback = Arc<dyn PreparationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl PreparationProgressCallback for TrackingCallback {
        fn on_file_start(&self, _recipient: &str, _relative_path: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_complete(&self, _r: &str, _p: &str, _o: &Path, _pw: Option<&str>) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_file_error(&self, _r: &str, _p: &str, _e: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_log(&self, level: LogLevel, line: &str) {
            self.lines.lock().unwrap().push((level, line.to_string()));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(2, 3);
        cb.on_file_start("A", "x.pdf");
        cb.on_file_complete("A", "x.pdf", Path::new("/out/A/x.pdf"), Some("pw"));
        cb.on_file_error("B", "y.pdf", "missing");
        cb.on_log(LogLevel::Warn, "line");
        cb.on_run_complete(&PreparationStats::default());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_file_start("A", "x.pdf");
        tracker.on_file_complete("A", "x.pdf", Path::new("/o/x.pdf"), None);
        tracker.on_file_start("A", "y.pdf");
        tracker.on_file_error("A", "y.pdf", "toolkit failed");
        tracker.on_log(LogLevel::Info, "[qpdf x.pdf] done");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.lines.lock().unwrap()[0].0, LogLevel::Info);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start(1, 1);
        cb.on_log(LogLevel::Error, "boom");
    }
}

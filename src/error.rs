//! Error types for the pdf-dispatch library.
//!
//! Failures come in three tiers, and only one of them is an error value:
//!
//! * [`PrepError`] — **fatal for one file** (toolkit failure, unreadable
//!   introspection output, broken MediaBox) or for the whole run
//!   (cancellation, unwritable output directory).
//! * A missing file reference is **not** an error: the package processor logs
//!   it and records it in [`crate::package::PreparationStats::missing_files`].
//! * An invalid redaction pattern is **not** an error either: the clean stage
//!   disables itself and logs a warning once.
//!
//! `PrepError` is `Clone` because the stage caches hand the same computed
//! result, including a failure, to every concurrent waiter.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type PrepResult<T> = Result<T, PrepError>;

/// All errors returned by the pdf-dispatch library.
#[derive(Debug, Clone, Error)]
pub enum PrepError {
    // ── Control flow ──────────────────────────────────────────────────────
    /// The run was stopped by request. Not a failure of any file.
    #[error("Preparation cancelled")]
    Cancelled,

    // ── Toolkit errors ────────────────────────────────────────────────────
    /// The toolkit executable could not be started.
    #[error("Failed to start '{command}': {reason}\nSet PDFDISPATCH_QPDF=/path/to/qpdf or install qpdf on PATH.")]
    ToolkitSpawn { command: String, reason: String },

    /// The toolkit ran and exited unsuccessfully.
    #[error("Command failed ({status}): {command}\n{detail}")]
    ToolkitFailed {
        command: String,
        status: String,
        detail: String,
    },

    /// The toolkit reported success but the expected output file is absent.
    #[error("Command produced no output file '{path}': {command}")]
    ToolkitOutputMissing { command: String, path: PathBuf },

    // ── PDF structure errors ──────────────────────────────────────────────
    /// `--json` output could not be parsed or lacks the expected sections.
    #[error("Invalid page introspection for '{path}': {detail}")]
    InvalidIntrospection { path: PathBuf, detail: String },

    /// A page has no usable `/MediaBox`, even after walking `/Parent`.
    #[error("Page {page} of '{path}' has no valid MediaBox: {detail}")]
    InvalidMediaBox {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    /// The decomposed intermediate file lacks structure the surgery needs.
    #[error("PDF '{path}' cannot be patched: {detail}")]
    MalformedPdf { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading, writing or creating a file or directory failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PrepError {
    /// Wrap an I/O error together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PrepError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// `true` when the run was stopped by request rather than by a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PrepError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_distinguishable() {
        assert!(PrepError::Cancelled.is_cancelled());
        assert!(!PrepError::Internal("x".into()).is_cancelled());
    }

    #[test]
    fn toolkit_failed_display_includes_command_and_detail() {
        let e = PrepError::ToolkitFailed {
            command: "qpdf in.pdf out.pdf".into(),
            status: "exit status: 2".into(),
            detail: "qpdf: in.pdf: not a PDF file".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("qpdf in.pdf out.pdf"), "got: {msg}");
        assert!(msg.contains("not a PDF file"), "got: {msg}");
    }

    #[test]
    fn io_error_is_cloneable_and_keeps_source() {
        let e = PrepError::io(
            "/tmp/x.pdf",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let copy = e.clone();
        assert!(copy.to_string().contains("/tmp/x.pdf"));
        assert!(std::error::Error::source(&copy).is_some());
    }

    #[test]
    fn media_box_display() {
        let e = PrepError::InvalidMediaBox {
            path: "a.pdf".into(),
            page: 3,
            detail: "missing".into(),
        };
        assert!(e.to_string().contains("Page 3"));
    }
}

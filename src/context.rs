//! Per-file value object threaded through the pipeline.
//!
//! A [`ProcessingContext`] is never mutated in place. Each stage receives the
//! current context by reference and returns a new one built with the
//! `with_*` transforms, so a failed stage leaves the caller holding the last
//! good state (and its temp-path list) for cleanup.

use std::path::{Path, PathBuf};

/// Everything a stage needs to know about the file it is working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingContext {
    /// Inventory file this context was created for. Never changes.
    pub source_path: PathBuf,
    /// File the next stage reads. Starts as the source file.
    pub working_path: PathBuf,
    /// Source path relative to the inventory root, forward slashes.
    pub relative_path: String,
    /// Recipient display name (unsanitized; used for watermark and metadata).
    pub recipient: String,
    /// Directory the final file lands in.
    pub target_directory: PathBuf,
    /// File name of the final file.
    pub basename: String,
    /// Intermediate files created for this file, in creation order.
    pub temporary_paths: Vec<PathBuf>,
    /// Owner password, set once by the restriction stage.
    pub password: Option<String>,
    /// Echo stage progress into the run log.
    pub use_default_logging: bool,
}

impl ProcessingContext {
    pub fn new(
        working_path: impl Into<PathBuf>,
        relative_path: impl Into<String>,
        recipient: impl Into<String>,
        target_directory: impl Into<PathBuf>,
        basename: impl Into<String>,
    ) -> Self {
        let working_path = working_path.into();
        Self {
            source_path: working_path.clone(),
            working_path,
            relative_path: relative_path.into(),
            recipient: recipient.into(),
            target_directory: target_directory.into(),
            basename: basename.into(),
            temporary_paths: Vec::new(),
            password: None,
            use_default_logging: true,
        }
    }

    pub fn with_default_logging(mut self, enabled: bool) -> Self {
        self.use_default_logging = enabled;
        self
    }

    /// Final output location: `target_directory/basename`.
    pub fn target_path(&self) -> PathBuf {
        self.target_directory.join(&self.basename)
    }

    /// Same context, reading from `path` from now on.
    pub fn with_working_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            working_path: path.into(),
            ..self.clone()
        }
    }

    /// Same context with `path` recorded as a temp file. Recording a path
    /// twice is a no-op.
    pub fn with_temporary_path(&self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut next = self.clone();
        if !next.temporary_paths.contains(&path) {
            next.temporary_paths.push(path);
        }
        next
    }

    pub fn with_password(&self, password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..self.clone()
        }
    }

    /// `true` when `path` is one of this file's intermediates.
    pub fn is_temporary(&self, path: &Path) -> bool {
        self.temporary_paths.iter().any(|p| p == path)
    }
}

//! Recipient packages and the processor that drives them through a pipeline.
//!
//! Output layout:
//!
//! ```text
//! <output>/<recipient folder>/[<collection>/]<relative dir>/<basename>
//! ```

use crate::cancel::CancelSignal;
use crate::config::PreparationConfig;
use crate::context::ProcessingContext;
use crate::error::{PrepError, PrepResult};
use crate::inventory::{normalize_reference, Inventory, InventoryEntry};
use crate::pipeline::{Pipeline, StageRun};
use crate::progress::{LogLevel, NoopProgressCallback, PreparationProgressCallback};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// One recipient and the relative file references prepared for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    #[serde(alias = "name")]
    pub recipient: String,
    #[serde(default)]
    pub files: Vec<String>,
}

impl Package {
    pub fn new<I, S>(recipient: impl Into<String>, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipient: recipient.into(),
            files: files.into_iter().map(Into::into).collect(),
        }
    }
}

/// A file that failed for a reason other than cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub recipient: String,
    pub relative_path: String,
    pub error: String,
}

/// One written output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedFile {
    pub recipient: String,
    pub relative_path: String,
    pub output_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreparationStats {
    pub requested_recipients: usize,
    /// Packages with at least one file written.
    pub processed_recipients: usize,
    pub processed_files: usize,
    /// References not found in the inventory, sorted and deduplicated.
    pub missing_files: Vec<String>,
    pub failed_files: Vec<FailedFile>,
    pub prepared: Vec<PreparedFile>,
}

/// Folder name for `name`: every character outside `[A-Za-z0-9._-]` becomes
/// `_`. Empty and dot-only results fall back to `fallback`.
pub fn sanitize_folder_name(name: &str, fallback: &str) -> String {
    let folder: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if folder.is_empty() || folder.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        folder
    }
}

/// Resolves packages against an inventory and runs each hit through the
/// pipeline.
pub struct PackageProcessor {
    pipeline: Arc<Pipeline>,
    config: PreparationConfig,
}

impl PackageProcessor {
    pub fn new(pipeline: Arc<Pipeline>, config: PreparationConfig) -> Self {
        Self { pipeline, config }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn config(&self) -> &PreparationConfig {
        &self.config
    }

    /// Prepare every package into `output_dir`.
    ///
    /// Missing references and per-file failures are recorded in the stats
    /// and do not stop the run. Cancellation returns
    /// [`PrepError::Cancelled`]; files already written stay in place.
    pub async fn prepare(
        &self,
        packages: &[Package],
        inventory: &Inventory,
        output_dir: &Path,
        cancel: &CancelSignal,
    ) -> PrepResult<PreparationStats> {
        let noop = NoopProgressCallback;
        let cb: &dyn PreparationProgressCallback = match self.config.progress_callback {
            Some(ref cb) => cb.as_ref(),
            None => &noop,
        };

        let total_files = packages.iter().map(|p| p.files.len()).sum();
        cb.on_run_start(packages.len(), total_files);
        info!(
            "Preparing {} package(s), {} file reference(s) into {}",
            packages.len(),
            total_files,
            output_dir.display()
        );

        let mut stats = PreparationStats {
            requested_recipients: packages.len(),
            ..Default::default()
        };
        for package in packages {
            cancel.check()?;
            let written = self
                .prepare_package(package, inventory, output_dir, cancel, cb, &mut stats)
                .await?;
            if written > 0 {
                stats.processed_recipients += 1;
            }
        }

        stats.missing_files.sort();
        stats.missing_files.dedup();
        info!(
            "Prepared {} file(s) for {}/{} recipient(s), {} missing, {} failed",
            stats.processed_files,
            stats.processed_recipients,
            stats.requested_recipients,
            stats.missing_files.len(),
            stats.failed_files.len()
        );
        cb.on_run_complete(&stats);
        Ok(stats)
    }

    /// Returns the number of files written for this package.
    async fn prepare_package(
        &self,
        package: &Package,
        inventory: &Inventory,
        output_dir: &Path,
        cancel: &CancelSignal,
        cb: &dyn PreparationProgressCallback,
        stats: &mut PreparationStats,
    ) -> PrepResult<usize> {
        let recipient_dir = self.recipient_dir(output_dir, &package.recipient);
        tokio::fs::create_dir_all(&recipient_dir)
            .await
            .map_err(|e| PrepError::io(&recipient_dir, e))?;

        let mut seen = HashSet::new();
        let mut hits: Vec<&InventoryEntry> = Vec::new();
        for reference in &package.files {
            if !seen.insert(normalize_reference(reference)) {
                continue;
            }
            match inventory.lookup(reference) {
                Some(entry) => hits.push(entry),
                None => {
                    let reference = reference.trim();
                    let line = format!("Missing file for {}: {}", package.recipient, reference);
                    warn!("{}", line);
                    cb.on_log(LogLevel::Warn, &line);
                    cb.on_file_error(&package.recipient, reference, "not found in source folder");
                    stats.missing_files.push(reference.to_string());
                }
            }
        }
        hits.sort_by_cached_key(|e| e.relative_path.to_lowercase());
        hits.dedup_by(|a, b| a.relative_path == b.relative_path);

        let run = StageRun::new(cancel, cb);
        let mut written = 0;
        for entry in hits {
            cancel.check()?;
            let target_dir = entry
                .relative_dir
                .split('/')
                .filter(|part| !part.is_empty())
                .fold(recipient_dir.clone(), |acc, part| acc.join(part));
            tokio::fs::create_dir_all(&target_dir)
                .await
                .map_err(|e| PrepError::io(&target_dir, e))?;

            let ctx = ProcessingContext::new(
                &entry.absolute_path,
                &entry.relative_path,
                &package.recipient,
                target_dir,
                &entry.basename,
            )
            .with_default_logging(self.config.use_default_logging);

            cb.on_file_start(&package.recipient, &entry.relative_path);
            match self.pipeline.process(ctx, &run).await {
                Ok(done) => {
                    written += 1;
                    stats.processed_files += 1;
                    cb.on_file_complete(
                        &package.recipient,
                        &entry.relative_path,
                        &done.working_path,
                        done.password.as_deref(),
                    );
                    stats.prepared.push(PreparedFile {
                        recipient: package.recipient.clone(),
                        relative_path: entry.relative_path.clone(),
                        output_path: done.working_path,
                        password: done.password,
                    });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    let line = format!(
                        "Failed {} for {}: {}",
                        entry.relative_path, package.recipient, e
                    );
                    error!("{}", line);
                    cb.on_log(LogLevel::Error, &line);
                    cb.on_file_error(&package.recipient, &entry.relative_path, &e.to_string());
                    stats.failed_files.push(FailedFile {
                        recipient: package.recipient.clone(),
                        relative_path: entry.relative_path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(written)
    }

    fn recipient_dir(&self, output_dir: &Path, recipient: &str) -> PathBuf {
        let fallback = &self.config.default_folder;
        let dir = output_dir.join(sanitize_folder_name(recipient, fallback));
        match self.config.collection {
            Some(ref c) if !c.trim().is_empty() => dir.join(sanitize_folder_name(c, fallback)),
            _ => dir,
        }
    }
}

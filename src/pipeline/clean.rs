//! Sensitive-data redaction stage.
//!
//! The working file is decomposed to QDF so text operators are plain
//! bytes, masked with [`RedactionPatterns`], and rebuilt. The result only
//! depends on the source content, so it is computed once per source
//! signature and shared by every recipient; the cleaned file belongs to the
//! cache, not to any one file's temp list.

use crate::config::PreparationConfig;
use crate::context::ProcessingContext;
use crate::error::{PrepError, PrepResult};
use crate::pdf::redact::RedactionPatterns;
use crate::pipeline::cache::{Disposable, SignatureCache};
use crate::pipeline::{keep, temp_pdf, Stage, StageRun};
use crate::toolkit::Toolkit;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of cleaning one source file.
#[derive(Debug)]
pub enum CleanArtifact {
    /// Nothing matched; the source is used as is.
    Unchanged,
    /// Masked copy owned by the cache.
    Cleaned { path: PathBuf, replacements: usize },
}

impl Disposable for CleanArtifact {
    fn dispose(&self) {
        if let CleanArtifact::Cleaned { path, .. } = self {
            if let Err(e) = std::fs::remove_file(path) {
                debug!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
}

pub struct CleanStage {
    toolkit: Arc<Toolkit>,
    temp_dir: PathBuf,
    patterns: Result<Arc<RedactionPatterns>, String>,
    warned: AtomicBool,
    cache: SignatureCache<CleanArtifact>,
}

impl CleanStage {
    /// Compile the configured patterns. A malformed pattern does not fail
    /// construction; the stage then passes files through and warns once.
    pub fn new(toolkit: Arc<Toolkit>, config: &PreparationConfig) -> Self {
        let split = config.effective_split_pattern();
        let patterns = RedactionPatterns::compile(&config.redaction_pattern, split.as_deref())
            .map(Arc::new)
            .map_err(|e| e.to_string());
        if let Err(ref e) = patterns {
            warn!("Invalid redaction pattern, redaction disabled: {}", e);
        }
        Self {
            toolkit,
            temp_dir: config.temp_dir(),
            patterns,
            warned: AtomicBool::new(false),
            cache: SignatureCache::new("clean"),
        }
    }

    /// Number of distinct sources currently cached.
    pub fn cached_sources(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl Stage for CleanStage {
    fn name(&self) -> &'static str {
        "clean"
    }

    async fn run(
        &self,
        ctx: &ProcessingContext,
        run: &StageRun<'_>,
    ) -> PrepResult<ProcessingContext> {
        let patterns = match self.patterns {
            Ok(ref p) => p.clone(),
            Err(ref e) => {
                if !self.warned.swap(true, Ordering::SeqCst) {
                    run.warn(&format!("Redaction disabled, invalid pattern: {e}"));
                }
                return Ok(ctx.clone());
            }
        };

        run.cancel.check()?;
        let source = ctx.working_path.clone();
        let toolkit = self.toolkit.clone();
        let temp_dir = self.temp_dir.clone();
        let artifact = self
            .cache
            .get_or_compute(&ctx.working_path, move || {
                clean_file(toolkit, temp_dir, patterns, source)
            })
            .await?;

        match &*artifact {
            CleanArtifact::Unchanged => {
                run.info(ctx, &format!("Clean: nothing to redact in {}", ctx.relative_path));
                Ok(ctx.clone())
            }
            CleanArtifact::Cleaned { path, replacements } => {
                run.info(
                    ctx,
                    &format!("Clean: redacted {replacements} occurrence(s) in {}", ctx.relative_path),
                );
                Ok(ctx.with_working_path(path))
            }
        }
    }

    async fn dispose(&self) {
        self.cache.flush().await;
    }
}

async fn clean_file(
    toolkit: Arc<Toolkit>,
    temp_dir: PathBuf,
    patterns: Arc<RedactionPatterns>,
    source: PathBuf,
) -> PrepResult<CleanArtifact> {
    let qdf = temp_pdf(&temp_dir, "pdfdispatch-clean-qdf-")?;
    toolkit.decompose(&source, &qdf, false).await?;

    let mut bytes = read(&qdf).await?;
    let replacements = patterns.apply(&mut bytes);
    if replacements == 0 {
        return Ok(CleanArtifact::Unchanged);
    }
    tokio::fs::write(&qdf, &bytes)
        .await
        .map_err(|e| PrepError::io(qdf.to_path_buf(), e))?;

    let cleaned = temp_pdf(&temp_dir, "pdfdispatch-clean-")?;
    toolkit.rebuild(&qdf, &cleaned).await?;
    Ok(CleanArtifact::Cleaned {
        path: keep(cleaned)?,
        replacements,
    })
}

async fn read(path: &Path) -> PrepResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| PrepError::io(path, e))
}

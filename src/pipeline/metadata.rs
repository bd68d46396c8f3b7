//! Metadata rewrite stage: drop XMP, scrub the Info dictionary, and record
//! who the copy was shared with in `/Subject`.

use crate::config::PreparationConfig;
use crate::context::ProcessingContext;
use crate::error::{PrepError, PrepResult};
use crate::pdf::display_name;
use crate::pdf::info::patch_info;
use crate::pipeline::{keep, temp_pdf, Stage, StageRun};
use crate::toolkit::Toolkit;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// `/Subject` text for `recipient`.
pub fn subject_line(recipient: &str) -> String {
    format!("Shared with {}", display_name(recipient))
        .trim_end()
        .to_string()
}

pub struct MetadataStage {
    toolkit: Arc<Toolkit>,
    temp_dir: PathBuf,
}

impl MetadataStage {
    pub fn new(toolkit: Arc<Toolkit>, config: &PreparationConfig) -> Self {
        Self {
            toolkit,
            temp_dir: config.temp_dir(),
        }
    }
}

#[async_trait]
impl Stage for MetadataStage {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn run(
        &self,
        ctx: &ProcessingContext,
        run: &StageRun<'_>,
    ) -> PrepResult<ProcessingContext> {
        let qdf = temp_pdf(&self.temp_dir, "pdfdispatch-meta-qdf-")?;
        self.toolkit.decompose(&ctx.working_path, &qdf, true).await?;

        let bytes = tokio::fs::read(&qdf)
            .await
            .map_err(|e| PrepError::io(qdf.to_path_buf(), e))?;
        let subject = subject_line(&ctx.recipient);
        let patched = patch_info(&bytes, &subject).map_err(|detail| PrepError::MalformedPdf {
            path: ctx.working_path.clone(),
            detail,
        })?;
        tokio::fs::write(&qdf, patched)
            .await
            .map_err(|e| PrepError::io(qdf.to_path_buf(), e))?;

        let output = temp_pdf(&self.temp_dir, "pdfdispatch-meta-")?;
        self.toolkit.rebuild(&qdf, &output).await?;
        drop(qdf);

        let output = keep(output)?;
        run.info(ctx, &format!("Metadata: {} → \"{subject}\"", ctx.relative_path));
        Ok(ctx.with_working_path(&output).with_temporary_path(output))
    }
}

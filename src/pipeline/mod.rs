//! The per-file stage chain.
//!
//! Each submodule implements exactly one transformation step. A stage reads
//! `ctx.working_path`, writes a new intermediate file, and returns a new
//! [`ProcessingContext`] pointing at it.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ clean ──▶ watermark ──▶ metadata ──▶ restrict ──▶ target
//!           (redact)   (overlay)     (Info)       (encrypt)
//! ```
//!
//! 1. [`clean`]     — mask sensitive identifiers in the decompressed token
//!    stream; result cached per source content
//! 2. [`watermark`] — stamp a translucent diagonal recipient label on every
//!    page; page geometry cached per source content
//! 3. [`metadata`]  — strip author/producer/title/subject, record the
//!    recipient in `/Subject`
//! 4. [`restrict`]  — encrypt into the target path with a fresh owner
//!    password
//!
//! ## Lifecycle
//!
//! [`Pipeline::process`] checks the [`CancelSignal`] before starting and
//! around every stage, and always deletes the per-file intermediates it
//! recorded, whatever the outcome. Cached artifacts outlive single files and
//! are released by [`Pipeline::dispose`].

pub mod cache;
pub mod clean;
pub mod metadata;
pub mod restrict;
pub mod watermark;

use crate::cancel::CancelSignal;
use crate::config::PreparationConfig;
use crate::context::ProcessingContext;
use crate::error::{PrepError, PrepResult};
use crate::progress::{LogLevel, PreparationProgressCallback};
use crate::toolkit::Toolkit;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, info, warn};

pub use clean::CleanStage;
pub use metadata::MetadataStage;
pub use restrict::RestrictionStage;
pub use watermark::WatermarkStage;

// ── Stage contract ───────────────────────────────────────────────────────

/// Run-scoped collaborators handed to every stage.
#[derive(Clone, Copy)]
pub struct StageRun<'a> {
    pub cancel: &'a CancelSignal,
    pub log: &'a dyn PreparationProgressCallback,
}

impl<'a> StageRun<'a> {
    pub fn new(cancel: &'a CancelSignal, log: &'a dyn PreparationProgressCallback) -> Self {
        Self { cancel, log }
    }

    /// Progress line, emitted only when the file has default logging on.
    pub fn info(&self, ctx: &ProcessingContext, line: &str) {
        debug!("{}", line);
        if ctx.use_default_logging {
            self.log.on_log(LogLevel::Info, line);
        }
    }

    /// Warning line, always emitted.
    pub fn warn(&self, line: &str) {
        warn!("{}", line);
        self.log.on_log(LogLevel::Warn, line);
    }
}

/// One transformation step.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transform `ctx.working_path` and return the next context. Any file
    /// the returned context reads that the stage created must either be
    /// recorded with [`ProcessingContext::with_temporary_path`] or be owned
    /// by the stage itself.
    async fn run(&self, ctx: &ProcessingContext, run: &StageRun<'_>)
        -> PrepResult<ProcessingContext>;

    /// Release stage-owned shared resources.
    async fn dispose(&self) {}
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// An ordered chain of stages.
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Clean → Watermark → Metadata → Restriction. The clean stage is left
    /// out when `config.redaction_enabled` is false.
    pub fn standard(toolkit: Arc<Toolkit>, config: &PreparationConfig) -> Self {
        let mut builder = Pipeline::builder("standard");
        if config.redaction_enabled {
            builder = builder.add_stage(CleanStage::new(toolkit.clone(), config));
        }
        builder
            .add_stage(WatermarkStage::new(toolkit.clone(), config))
            .add_stage(MetadataStage::new(toolkit.clone(), config))
            .add_stage(RestrictionStage::new(toolkit, config))
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage over `ctx`.
    ///
    /// On success the returned context's working path is the final file; all
    /// other recorded intermediates are gone. On failure or cancellation
    /// every recorded intermediate is gone.
    pub async fn process(
        &self,
        ctx: ProcessingContext,
        run: &StageRun<'_>,
    ) -> PrepResult<ProcessingContext> {
        run.cancel.check()?;
        info!("[{}] {} for {}", self.name, ctx.relative_path, ctx.recipient);

        let mut current = ctx;
        let outcome = self.run_stages(&mut current, run).await;
        let keep = outcome.as_ref().ok().map(|done| done.working_path.clone());
        cleanup(&current, keep.as_deref()).await;
        outcome
    }

    async fn run_stages(
        &self,
        current: &mut ProcessingContext,
        run: &StageRun<'_>,
    ) -> PrepResult<ProcessingContext> {
        for stage in &self.stages {
            run.cancel.check()?;
            debug!("[{}] stage {} on {}", self.name, stage.name(), current.working_path.display());
            let next = stage.run(current, run).await?;
            *current = next;
            run.cancel.check()?;
        }
        Ok(current.clone())
    }

    /// Flush stage caches and delete their backing files.
    pub async fn dispose(&self) {
        for stage in &self.stages {
            stage.dispose().await;
        }
        debug!("[{}] disposed", self.name);
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    pub fn add_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            name: self.name,
            stages: self.stages,
        }
    }
}

// ── Temp files ───────────────────────────────────────────────────────────

/// Fresh empty `<prefix>XXXX.pdf` under `dir`, deleted on drop.
pub(crate) fn temp_pdf(dir: &Path, prefix: &str) -> PrepResult<TempPath> {
    std::fs::create_dir_all(dir).map_err(|e| PrepError::io(dir, e))?;
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".pdf")
        .tempfile_in(dir)
        .map(|f| f.into_temp_path())
        .map_err(|e| PrepError::io(dir, e))
}

/// Detach `temp` from drop-deletion; ownership passes to the caller.
pub(crate) fn keep(temp: TempPath) -> PrepResult<PathBuf> {
    temp.keep().map_err(|e| PrepError::io(e.path.to_path_buf(), e.error))
}

async fn cleanup(ctx: &ProcessingContext, keep: Option<&Path>) {
    for path in &ctx.temporary_paths {
        if Some(path.as_path()) == keep {
            continue;
        }
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgressCallback;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Copies the working file into a new temp file.
    struct CopyStage {
        dir: PathBuf,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Stage for CopyStage {
        fn name(&self) -> &'static str {
            "copy"
        }

        async fn run(
            &self,
            ctx: &ProcessingContext,
            _run: &StageRun<'_>,
        ) -> PrepResult<ProcessingContext> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let out = temp_pdf(&self.dir, "copy-")?;
            tokio::fs::copy(&ctx.working_path, &out)
                .await
                .map_err(|e| PrepError::io(&ctx.working_path, e))?;
            let out = keep(out)?;
            Ok(ctx.with_working_path(&out).with_temporary_path(out))
        }
    }

    struct FailStage;

    #[async_trait]
    impl Stage for FailStage {
        fn name(&self) -> &'static str {
            "fail"
        }

        async fn run(
            &self,
            _ctx: &ProcessingContext,
            _run: &StageRun<'_>,
        ) -> PrepResult<ProcessingContext> {
            Err(PrepError::Internal("stage failed".into()))
        }
    }

    /// Requests cancellation while running.
    struct CancelStage;

    #[async_trait]
    impl Stage for CancelStage {
        fn name(&self) -> &'static str {
            "cancel"
        }

        async fn run(
            &self,
            ctx: &ProcessingContext,
            run: &StageRun<'_>,
        ) -> PrepResult<ProcessingContext> {
            run.cancel.cancel();
            Ok(ctx.clone())
        }
    }

    fn setup() -> (tempfile::TempDir, ProcessingContext) {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.pdf");
        std::fs::write(&src, b"%PDF-1.4").unwrap();
        let ctx = ProcessingContext::new(&src, "src.pdf", "A", dir.path().join("out"), "src.pdf");
        (dir, ctx)
    }

    fn temp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir.join("tmp"))
            .map(|rd| rd.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn success_keeps_only_final_working_file() {
        let (dir, ctx) = setup();
        let runs = Arc::new(AtomicUsize::new(0));
        let p = Pipeline::builder("t")
            .add_stage(CopyStage { dir: dir.path().join("tmp"), runs: runs.clone() })
            .add_stage(CopyStage { dir: dir.path().join("tmp"), runs: runs.clone() })
            .build();
        let cancel = CancelSignal::new();
        let run = StageRun::new(&cancel, &NoopProgressCallback);

        let done = p.process(ctx, &run).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(done.working_path.exists());
        assert_eq!(temp_files(dir.path()), 1);
    }

    #[tokio::test]
    async fn failure_removes_every_intermediate() {
        let (dir, ctx) = setup();
        let runs = Arc::new(AtomicUsize::new(0));
        let p = Pipeline::builder("t")
            .add_stage(CopyStage { dir: dir.path().join("tmp"), runs })
            .add_stage(FailStage)
            .build();
        let cancel = CancelSignal::new();
        let run = StageRun::new(&cancel, &NoopProgressCallback);

        let err = p.process(ctx, &run).await.unwrap_err();
        assert!(!err.is_cancelled());
        assert_eq!(temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let (dir, ctx) = setup();
        let runs = Arc::new(AtomicUsize::new(0));
        let p = Pipeline::builder("t")
            .add_stage(CopyStage { dir: dir.path().join("tmp"), runs: runs.clone() })
            .build();
        let cancel = CancelSignal::new();
        cancel.cancel();
        let run = StageRun::new(&cancel, &NoopProgressCallback);

        assert!(p.process(ctx, &run).await.unwrap_err().is_cancelled());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_between_stages_stops_and_cleans() {
        let (dir, ctx) = setup();
        let runs = Arc::new(AtomicUsize::new(0));
        let p = Pipeline::builder("t")
            .add_stage(CopyStage { dir: dir.path().join("tmp"), runs: runs.clone() })
            .add_stage(CancelStage)
            .add_stage(CopyStage { dir: dir.path().join("tmp"), runs: runs.clone() })
            .build();
        let cancel = CancelSignal::new();
        let run = StageRun::new(&cancel, &NoopProgressCallback);

        assert!(p.process(ctx, &run).await.unwrap_err().is_cancelled());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(temp_files(dir.path()), 0);
    }

    #[test]
    fn standard_pipeline_order() {
        let tk = Arc::new(Toolkit::new("qpdf"));
        let p = Pipeline::standard(tk.clone(), &PreparationConfig::default());
        assert_eq!(p.stage_names(), vec!["clean", "watermark", "metadata", "restrict"]);

        let no_redact = PreparationConfig::builder()
            .redaction_enabled(false)
            .build()
            .unwrap();
        let p = Pipeline::standard(tk, &no_redact);
        assert_eq!(p.stage_names(), vec!["watermark", "metadata", "restrict"]);
    }
}

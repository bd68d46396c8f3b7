//! Recipient watermark stage.
//!
//! Page sizes come from `qpdf --json` and are cached per source file and
//! source signature. Redaction only masks bytes inside content streams, so
//! the cleaned copy a recipient reads has the same pages as its source and
//! introspection runs once per source. Keying by source also means a
//! changed source evicts its old geometry entry. The overlay itself is
//! rebuilt for each recipient because the label differs.

use crate::config::PreparationConfig;
use crate::context::ProcessingContext;
use crate::error::{PrepError, PrepResult};
use crate::pdf::display_name;
use crate::pdf::geometry::{page_boxes, PageBox};
use crate::pdf::overlay::build_overlay;
use crate::pipeline::cache::{Disposable, SignatureCache};
use crate::pipeline::{keep, temp_pdf, Stage, StageRun};
use crate::toolkit::Toolkit;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Printed when a recipient name has no printable characters.
pub const FALLBACK_LABEL: &str = "WATERMARK";

/// Page sizes of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct PageGeometry(pub Vec<PageBox>);

impl Disposable for PageGeometry {}

/// Label drawn on the page for `recipient`.
pub fn watermark_label(recipient: &str) -> String {
    let label = display_name(recipient);
    if label.is_empty() {
        FALLBACK_LABEL.to_string()
    } else {
        label
    }
}

pub struct WatermarkStage {
    toolkit: Arc<Toolkit>,
    temp_dir: PathBuf,
    geometry: SignatureCache<PageGeometry>,
}

impl WatermarkStage {
    pub fn new(toolkit: Arc<Toolkit>, config: &PreparationConfig) -> Self {
        Self {
            toolkit,
            temp_dir: config.temp_dir(),
            geometry: SignatureCache::new("geometry"),
        }
    }

    /// Number of distinct sources with cached geometry.
    pub fn cached_sources(&self) -> usize {
        self.geometry.len()
    }

    async fn page_geometry(&self, ctx: &ProcessingContext) -> PrepResult<Arc<PageGeometry>> {
        let toolkit = self.toolkit.clone();
        let working = ctx.working_path.clone();
        self.geometry
            .get_or_compute(&ctx.source_path, move || async move {
                let json = toolkit.inspect_json(&working).await?;
                page_boxes(&json, &working).map(PageGeometry)
            })
            .await
    }
}

#[async_trait]
impl Stage for WatermarkStage {
    fn name(&self) -> &'static str {
        "watermark"
    }

    async fn run(
        &self,
        ctx: &ProcessingContext,
        run: &StageRun<'_>,
    ) -> PrepResult<ProcessingContext> {
        let label = watermark_label(&ctx.recipient);
        let geometry = self.page_geometry(ctx).await?;
        if geometry.0.is_empty() {
            return Err(PrepError::InvalidIntrospection {
                path: ctx.working_path.clone(),
                detail: "document has no pages".into(),
            });
        }

        let overlay = temp_pdf(&self.temp_dir, "pdfdispatch-overlay-")?;
        tokio::fs::write(&overlay, build_overlay(&label, &geometry.0))
            .await
            .map_err(|e| PrepError::io(overlay.to_path_buf(), e))?;

        let stamped = temp_pdf(&self.temp_dir, "pdfdispatch-stamped-")?;
        self.toolkit
            .overlay(&ctx.working_path, &overlay, &stamped)
            .await?;
        drop(overlay);

        let optimized = temp_pdf(&self.temp_dir, "pdfdispatch-watermarked-")?;
        let output = match self.toolkit.optimize(&stamped, &optimized).await {
            Ok(()) => keep(optimized)?,
            Err(e) => {
                run.warn(&format!(
                    "Optimize failed for {}, keeping unoptimized copy: {e}",
                    ctx.relative_path
                ));
                drop(optimized);
                keep(stamped)?
            }
        };

        run.info(
            ctx,
            &format!(
                "Watermark: stamped {} page(s) of {} for {label}",
                geometry.0.len(),
                ctx.relative_path
            ),
        );
        Ok(ctx.with_working_path(&output).with_temporary_path(output))
    }

    async fn dispose(&self) {
        self.geometry.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_falls_back_when_empty() {
        assert_eq!(watermark_label("  jean  dupont "), "JEAN  DUPONT");
        assert_eq!(watermark_label("Élodie"), "ELODIE");
        assert_eq!(watermark_label("   "), FALLBACK_LABEL);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::cancel::CancelSignal;
        use crate::progress::NoopProgressCallback;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        const PAGES_JSON: &str = r#"{"version": 1, "pages": [{"object": "3 0 R"}],
            "objects": {"3 0 R": {"/Type": "/Page", "/MediaBox": [0, 0, 612, 792]}}}"#;

        /// Answers `--json` with one Letter page, otherwise copies its
        /// second-to-last argument to its last. Logs every call.
        fn fake_qpdf(dir: &Path) -> PathBuf {
            let json = dir.join("pages.json");
            std::fs::write(&json, PAGES_JSON).unwrap();
            let script = dir.join("fake-qpdf");
            std::fs::write(
                &script,
                format!(
                    "#!/bin/sh\n\
                     echo \"$1\" >> '{log}'\n\
                     if [ \"$1\" = \"--json\" ]; then cat '{json}'; exit 0; fi\n\
                     prev=; last=\n\
                     for a; do prev=$last; last=$a; done\n\
                     cp \"$prev\" \"$last\"\n",
                    log = dir.join("calls.log").display(),
                    json = json.display(),
                ),
            )
            .unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
            script
        }

        fn introspections(dir: &Path) -> usize {
            std::fs::read_to_string(dir.join("calls.log"))
                .unwrap_or_default()
                .lines()
                .filter(|l| *l == "--json")
                .count()
        }

        #[tokio::test]
        async fn geometry_is_cached_per_source_not_per_working_copy() {
            let dir = tempfile::tempdir().unwrap();
            let config = PreparationConfig::builder()
                .temp_dir(dir.path().join("tmp"))
                .build()
                .unwrap();
            let stage = WatermarkStage::new(Arc::new(Toolkit::new(fake_qpdf(dir.path()))), &config);
            let cancel = CancelSignal::new();
            let run = StageRun::new(&cancel, &NoopProgressCallback);

            let source = dir.path().join("a.pdf");
            std::fs::write(&source, b"%PDF-1.4 original").unwrap();
            let cleaned_one = dir.path().join("cleaned-1.pdf");
            let cleaned_two = dir.path().join("cleaned-2.pdf");
            std::fs::write(&cleaned_one, b"%PDF-1.4 masked").unwrap();
            std::fs::write(&cleaned_two, b"%PDF-1.4 masked").unwrap();

            for (recipient, working) in [("A", &cleaned_one), ("B", &cleaned_two)] {
                let ctx = ProcessingContext::new(&source, "a.pdf", recipient, dir.path(), "a.pdf")
                    .with_working_path(working);
                let done = stage.run(&ctx, &run).await.unwrap();
                assert_ne!(done.working_path, *working);
            }
            assert_eq!(introspections(dir.path()), 1);
            assert_eq!(stage.cached_sources(), 1);

            // A changed source replaces its entry instead of adding one.
            std::fs::write(&source, b"%PDF-1.4 original, edited").unwrap();
            let ctx = ProcessingContext::new(&source, "a.pdf", "C", dir.path(), "a.pdf")
                .with_working_path(&cleaned_one);
            stage.run(&ctx, &run).await.unwrap();
            assert_eq!(introspections(dir.path()), 2);
            assert_eq!(stage.cached_sources(), 1);

            stage.dispose().await;
            assert_eq!(stage.cached_sources(), 0);
        }
    }
}

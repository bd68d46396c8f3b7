//! # pdf-dispatch
//!
//! Prepare per-recipient copies of a folder of PDF documents.
//!
//! ## Why this crate?
//!
//! Sharing a board pack or a review set usually means sending the same PDFs
//! to many people. Each copy should carry the recipient's name so leaks are
//! traceable, must not expose sensitive identifiers left in the text layer,
//! and should not be printable or editable. This crate drives the `qpdf`
//! command-line toolkit to do all of that, one recipient at a time, while
//! sharing the expensive per-document work between recipients.
//!
//! ## Pipeline Overview
//!
//! ```text
//! assignments
//!  │
//!  ├─ 1. Prepare    reviewer / member assignments → recipient packages
//!  ├─ 2. Inventory  recursive .pdf scan of the source folder
//!  ├─ 3. Package    per recipient: resolve references, create folders
//!  ├─ 4. Clean      mask sensitive identifiers (cached per source)
//!  ├─ 5. Watermark  diagonal recipient label on every page
//!  ├─ 6. Metadata   scrub Info, record "Shared with NAME"
//!  └─ 7. Restrict   AES-256 with a fresh owner password, no print/extract
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_dispatch::{prepare_packages, CancelSignal, Package, PreparationConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let packages = vec![
//!         Package::new("Jean Dupont", ["board/minutes.pdf", "budget.pdf"]),
//!         Package::new("Ann Lee", ["board/minutes.pdf"]),
//!     ];
//!     let stats = prepare_packages(
//!         &packages,
//!         Path::new("source"),
//!         Path::new("out"),
//!         PreparationConfig::default(),
//!         &CancelSignal::new(),
//!     )
//!     .await?;
//!     eprintln!("{} file(s), {} missing", stats.processed_files, stats.missing_files.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfdispatch` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-dispatch = { version = "0.1", default-features = false }
//! ```
//!
//! ## Locating qpdf
//!
//! The executable is resolved once per process by the `qpdf-locate` crate:
//! `PDFDISPATCH_QPDF`, then `PATH`, then a bundled per-platform binary under
//! the resource roots, then the bare name `qpdf`. Set
//! [`PreparationConfig::toolkit_path`] to bypass resolution.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod inventory;
pub mod matcher;
pub mod package;
pub mod pdf;
pub mod pipeline;
pub mod prepare;
pub mod progress;
pub mod toolkit;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelSignal;
pub use config::{ModifyPermission, PreparationConfig, PreparationConfigBuilder};
pub use context::ProcessingContext;
pub use error::{PrepError, PrepResult};
pub use inventory::{Inventory, InventoryEntry};
pub use matcher::PdfFileMatcher;
pub use package::{FailedFile, Package, PackageProcessor, PreparationStats, PreparedFile};
pub use pipeline::{Pipeline, PipelineBuilder, Stage, StageRun};
pub use prepare::{
    prepare_packages, MemberAssignment, MemberPreparation, ReviewerAssignment, ReviewerPreparation,
};
pub use progress::{LogLevel, NoopProgressCallback, PreparationProgressCallback, ProgressCallback};
pub use toolkit::Toolkit;

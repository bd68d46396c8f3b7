//! Preparation services: turn raw assignment data into recipient packages.
//!
//! - [`ReviewerPreparation`]: file → reviewers assignments, inverted into one
//!   package per reviewer.
//! - [`MemberPreparation`]: member → person-name references, each resolved
//!   to a file with [`PdfFileMatcher`].
//!
//! Both hand the packages to a [`PackageProcessor`]. [`prepare_packages`] is
//! the one-call entry point for callers that already have packages.

use crate::cancel::CancelSignal;
use crate::config::PreparationConfig;
use crate::error::PrepResult;
use crate::inventory::{normalize_reference, Inventory};
use crate::matcher::PdfFileMatcher;
use crate::package::{Package, PackageProcessor, PreparationStats};
use crate::pipeline::Pipeline;
use crate::toolkit::Toolkit;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

// ── Reviewers ────────────────────────────────────────────────────────────

/// One document and the people who review it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerAssignment {
    pub file: String,
    #[serde(default)]
    pub reviewers: Vec<String>,
}

pub struct ReviewerPreparation {
    processor: PackageProcessor,
}

impl ReviewerPreparation {
    pub fn new(pipeline: Arc<Pipeline>, config: PreparationConfig) -> Self {
        Self {
            processor: PackageProcessor::new(pipeline, config),
        }
    }

    /// One package per reviewer, in order of first appearance.
    pub fn packages(assignments: &[ReviewerAssignment], inventory: &Inventory) -> Vec<Package> {
        let mut order: Vec<Package> = Vec::new();
        let mut by_reviewer: HashMap<String, usize> = HashMap::new();
        let mut seen: Vec<HashSet<String>> = Vec::new();

        for assignment in assignments {
            let file = resolve_file_reference(&assignment.file, inventory);
            for reviewer in &assignment.reviewers {
                let reviewer = reviewer.trim();
                if reviewer.is_empty() {
                    continue;
                }
                let idx = *by_reviewer.entry(reviewer.to_string()).or_insert_with(|| {
                    order.push(Package::new(reviewer, Vec::<String>::new()));
                    seen.push(HashSet::new());
                    order.len() - 1
                });
                if seen[idx].insert(normalize_reference(&file)) {
                    order[idx].files.push(file.clone());
                }
            }
        }
        debug!("{} assignment(s) → {} reviewer package(s)", assignments.len(), order.len());
        order
    }

    pub async fn prepare(
        &self,
        assignments: &[ReviewerAssignment],
        inventory: &Inventory,
        output_dir: &Path,
        cancel: &CancelSignal,
    ) -> PrepResult<PreparationStats> {
        let packages = Self::packages(assignments, inventory);
        self.processor.prepare(&packages, inventory, output_dir, cancel).await
    }
}

/// Resolve a reviewer file reference: exact relative path, then with a
/// `.pdf` suffix, then a basename that occurs exactly once. Anything else
/// is returned unchanged so the processor reports it missing.
pub fn resolve_file_reference(reference: &str, inventory: &Inventory) -> String {
    let reference = reference.trim();
    if let Some(entry) = inventory.lookup(reference) {
        return entry.relative_path.clone();
    }
    if let Some(entry) = inventory.lookup(&format!("{reference}.pdf")) {
        return entry.relative_path.clone();
    }

    let wanted = normalize_reference(reference);
    let wanted_pdf = format!("{wanted}.pdf");
    let mut matches = inventory.entries().iter().filter(|e| {
        let base = e.basename.to_lowercase();
        base == wanted || base == wanted_pdf
    });
    match (matches.next(), matches.next()) {
        (Some(entry), None) => entry.relative_path.clone(),
        _ => reference.to_string(),
    }
}

// ── Members ──────────────────────────────────────────────────────────────

/// One member and the people whose files they receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAssignment {
    pub member: String,
    #[serde(default)]
    pub references: Vec<String>,
}

pub struct MemberPreparation {
    processor: PackageProcessor,
}

impl MemberPreparation {
    pub fn new(pipeline: Arc<Pipeline>, config: PreparationConfig) -> Self {
        Self {
            processor: PackageProcessor::new(pipeline, config),
        }
    }

    /// One package per member; every name reference is replaced by the
    /// best-matching inventory path when there is one.
    pub fn packages(
        assignments: &[MemberAssignment],
        inventory: &Inventory,
        cancel: &CancelSignal,
    ) -> PrepResult<Vec<Package>> {
        let matcher = PdfFileMatcher::new(inventory.relative_paths().map(str::to_string));
        let mut packages = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let mut files = Vec::with_capacity(assignment.references.len());
            for reference in &assignment.references {
                match matcher.find_by_name_reference_cancellable(reference, cancel)? {
                    Some(path) => {
                        debug!("{}: '{}' → {}", assignment.member, reference, path);
                        files.push(path.to_string());
                    }
                    None => files.push(reference.trim().to_string()),
                }
            }
            packages.push(Package::new(assignment.member.trim(), files));
        }
        Ok(packages)
    }

    pub async fn prepare(
        &self,
        assignments: &[MemberAssignment],
        inventory: &Inventory,
        output_dir: &Path,
        cancel: &CancelSignal,
    ) -> PrepResult<PreparationStats> {
        let packages = Self::packages(assignments, inventory, cancel)?;
        self.processor.prepare(&packages, inventory, output_dir, cancel).await
    }
}

// ── One-call entry point ─────────────────────────────────────────────────

/// Scan `source_dir`, run the standard pipeline over `packages` and release
/// its caches.
pub async fn prepare_packages(
    packages: &[Package],
    source_dir: &Path,
    output_dir: &Path,
    config: PreparationConfig,
    cancel: &CancelSignal,
) -> PrepResult<PreparationStats> {
    let inventory = Inventory::scan(source_dir, cancel).await?;
    let toolkit = Arc::new(Toolkit::from_config(&config));
    info!("Using toolkit {}", toolkit.executable().display());

    let pipeline = Arc::new(Pipeline::standard(toolkit, &config));
    let processor = PackageProcessor::new(pipeline.clone(), config);
    let outcome = processor.prepare(packages, &inventory, output_dir, cancel).await;
    pipeline.dispose().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> Inventory {
        Inventory::from_relative_paths(
            "/src",
            ["board/Minutes.pdf", "a/report.pdf", "b/report.pdf", "dupont_jean.pdf", "martin_jean-marc.pdf"],
        )
    }

    #[test]
    fn file_references_resolve_in_order() {
        let inv = inventory();
        assert_eq!(resolve_file_reference("BOARD/minutes.pdf", &inv), "board/Minutes.pdf");
        assert_eq!(resolve_file_reference("board/Minutes", &inv), "board/Minutes.pdf");
        assert_eq!(resolve_file_reference("minutes", &inv), "board/Minutes.pdf");
        // ambiguous basename
        assert_eq!(resolve_file_reference("report.pdf", &inv), "report.pdf");
        assert_eq!(resolve_file_reference(" nowhere.pdf ", &inv), "nowhere.pdf");
    }

    #[test]
    fn reviewers_are_inverted_in_first_appearance_order() {
        let inv = inventory();
        let assignments = vec![
            ReviewerAssignment {
                file: "board/minutes.pdf".into(),
                reviewers: vec!["Bob".into(), "Alice".into()],
            },
            ReviewerAssignment {
                file: "a/report.pdf".into(),
                reviewers: vec!["Alice".into(), " ".into()],
            },
            ReviewerAssignment {
                file: "BOARD/Minutes".into(),
                reviewers: vec!["Alice".into()],
            },
        ];

        let packages = ReviewerPreparation::packages(&assignments, &inv);
        assert_eq!(
            packages,
            vec![
                Package::new("Bob", ["board/Minutes.pdf"]),
                Package::new("Alice", ["board/Minutes.pdf", "a/report.pdf"]),
            ]
        );
    }

    #[test]
    fn member_references_resolve_through_matcher() {
        let inv = inventory();
        let assignments = vec![MemberAssignment {
            member: "Committee A".into(),
            references: vec!["Jean Dupont".into(), "Jean-Marc Martin".into(), "Nobody".into()],
        }];

        let packages = MemberPreparation::packages(&assignments, &inv, &CancelSignal::new()).unwrap();
        assert_eq!(
            packages,
            vec![Package::new(
                "Committee A",
                ["dupont_jean.pdf", "martin_jean-marc.pdf", "Nobody"]
            )]
        );
    }

    #[test]
    fn member_resolution_honours_cancellation() {
        let cancel = CancelSignal::new();
        cancel.cancel();
        let assignments = vec![MemberAssignment {
            member: "M".into(),
            references: vec!["Jean Dupont".into()],
        }];
        let err = MemberPreparation::packages(&assignments, &inventory(), &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn assignments_deserialize() {
        let r: Vec<ReviewerAssignment> =
            serde_json::from_str(r#"[{"file": "x.pdf", "reviewers": ["A"]}]"#).unwrap();
        assert_eq!(r[0].reviewers, vec!["A"]);
        let m: Vec<MemberAssignment> = serde_json::from_str(r#"[{"member": "M"}]"#).unwrap();
        assert!(m[0].references.is_empty());
    }
}

//! Recursive `.pdf` inventory of a source folder.
//!
//! Built once per run. Lookups are case-insensitive on the relative path,
//! accept backslash separators and ignore a leading `./` or `/`, so
//! references typed by hand or exported from Windows tools still resolve.

use crate::cancel::CancelSignal;
use crate::error::{PrepError, PrepResult};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One PDF under the source root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryEntry {
    pub absolute_path: PathBuf,
    /// Forward-slash path relative to the root, e.g. `board/minutes.pdf`.
    pub relative_path: String,
    /// Directory part of `relative_path`; empty at the root.
    pub relative_dir: String,
    pub basename: String,
}

impl InventoryEntry {
    pub fn new(root: &Path, relative_path: &str) -> Self {
        let relative_path = relative_path.trim_start_matches('/').to_string();
        let (relative_dir, basename) = match relative_path.rsplit_once('/') {
            Some((dir, base)) => (dir.to_string(), base.to_string()),
            None => (String::new(), relative_path.clone()),
        };
        let absolute_path = relative_path
            .split('/')
            .fold(root.to_path_buf(), |acc, part| acc.join(part));
        Self {
            absolute_path,
            relative_path,
            relative_dir,
            basename,
        }
    }
}

/// Lookup key for a user-supplied reference.
pub fn normalize_reference(reference: &str) -> String {
    let mut s = reference.trim().replace('\\', "/");
    loop {
        if let Some(rest) = s.strip_prefix("./") {
            s = rest.to_string();
        } else if let Some(rest) = s.strip_prefix('/') {
            s = rest.to_string();
        } else {
            break;
        }
    }
    s.to_lowercase()
}

/// Every PDF under a root, sorted by case-insensitive relative path.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    root: PathBuf,
    entries: Vec<InventoryEntry>,
    index: HashMap<String, usize>,
}

impl Inventory {
    /// Walk `root` recursively on the blocking pool.
    pub async fn scan(root: impl AsRef<Path>, cancel: &CancelSignal) -> PrepResult<Self> {
        let root = root.as_ref().to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || Self::scan_blocking(&root, &cancel))
            .await
            .map_err(|e| PrepError::Internal(format!("Inventory task panicked: {e}")))?
    }

    /// Blocking walk of `root`. Unreadable entries are skipped with a warning.
    pub fn scan_blocking(root: &Path, cancel: &CancelSignal) -> PrepResult<Self> {
        let meta = std::fs::metadata(root).map_err(|e| PrepError::io(root, e))?;
        if !meta.is_dir() {
            return Err(PrepError::io(
                root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            ));
        }

        let mut relative = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            cancel.check()?;
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let is_pdf = entry
                .path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| x.eq_ignore_ascii_case("pdf"));
            if !is_pdf {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let rel: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            relative.push(rel.join("/"));
        }

        let inventory = Self::from_relative_paths(root, relative);
        info!("Inventory: {} PDF(s) under {}", inventory.len(), root.display());
        Ok(inventory)
    }

    /// Build from known relative paths without touching the file system.
    pub fn from_relative_paths<I, S>(root: impl AsRef<Path>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let root = root.as_ref().to_path_buf();
        let mut entries: Vec<InventoryEntry> = paths
            .into_iter()
            .map(|p| InventoryEntry::new(&root, &p.as_ref().replace('\\', "/")))
            .collect();
        entries.sort_by_cached_key(|e| e.relative_path.to_lowercase());

        let mut index = HashMap::with_capacity(entries.len());
        let mut unique = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = entry.relative_path.to_lowercase();
            if index.contains_key(&key) {
                debug!("Ignoring case-duplicate {}", entry.relative_path);
                continue;
            }
            index.insert(key, unique.len());
            unique.push(entry);
        }
        Self {
            root,
            entries: unique,
            index,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[InventoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Relative paths in inventory order.
    pub fn relative_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.relative_path.as_str())
    }

    /// Case-insensitive lookup by relative path.
    pub fn lookup(&self, reference: &str) -> Option<&InventoryEntry> {
        self.index
            .get(&normalize_reference(reference))
            .map(|&i| &self.entries[i])
    }
}

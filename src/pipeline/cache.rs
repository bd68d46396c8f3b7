//! Per-stage result cache keyed by source path and file signature.
//!
//! Preparing one folder for twenty recipients runs the same source file
//! through the pipeline twenty times. The expensive, recipient-independent
//! work (redaction, page introspection) is done once per unique content:
//!
//! * an entry is reused only while the file's `(mtime_ms, size)` signature
//!   is unchanged; a different signature evicts and disposes the old entry;
//! * concurrent callers for the same signature await one shared future;
//! * failed computations are not cached;
//! * [`SignatureCache::flush`] disposes everything at shutdown.

use crate::error::{PrepError, PrepResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// A cached artifact that may own resources outside the process (temp files).
pub trait Disposable: Send + Sync + 'static {
    /// Release owned resources. Must not fail.
    fn dispose(&self) {}
}

/// Cheap content identity: modification time and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileSignature {
    pub mtime_ms: u64,
    pub size: u64,
}

impl FileSignature {
    pub async fn of(path: &Path) -> PrepResult<Self> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| PrepError::io(path, e))?;
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(Self {
            mtime_ms,
            size: meta.len(),
        })
    }
}

type SharedResult<T> = Shared<BoxFuture<'static, Result<Arc<T>, PrepError>>>;

struct CacheEntry<T> {
    signature: FileSignature,
    generation: u64,
    result: SharedResult<T>,
}

/// Single-flight cache of `Arc<T>` results keyed by path.
pub struct SignatureCache<T: Disposable> {
    label: &'static str,
    entries: Mutex<HashMap<PathBuf, CacheEntry<T>>>,
    next_generation: AtomicU64,
}

impl<T: Disposable> SignatureCache<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached result for `path`, computing it with `compute` when
    /// absent or stale.
    pub async fn get_or_compute<F, Fut>(&self, path: &Path, compute: F) -> PrepResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PrepResult<T>> + Send + 'static,
    {
        let signature = FileSignature::of(path).await?;

        let (generation, shared, stale) = {
            let mut entries = self.lock();
            let hit = entries
                .get(path)
                .filter(|entry| entry.signature == signature)
                .map(|entry| (entry.generation, entry.result.clone()));
            match hit {
                Some((generation, shared)) => {
                    debug!("{} cache hit: {}", self.label, path.display());
                    (generation, shared, None)
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let shared = compute().map(|r| r.map(Arc::new)).boxed().shared();
                    let stale = entries.insert(
                        path.to_path_buf(),
                        CacheEntry {
                            signature,
                            generation,
                            result: shared.clone(),
                        },
                    );
                    (generation, shared, stale)
                }
            }
        };

        if let Some(stale) = stale {
            debug!("{} cache invalidated: {}", self.label, path.display());
            dispose_entry(stale);
        }

        let result = shared.await;
        if result.is_err() {
            let mut entries = self.lock();
            if entries.get(path).is_some_and(|e| e.generation == generation) {
                entries.remove(path);
            }
        }
        result
    }

    /// Drop every entry and dispose its artifact, waiting for in-flight
    /// computations to settle first.
    pub async fn flush(&self) {
        let drained: Vec<CacheEntry<T>> = self.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            if let Ok(artifact) = entry.result.await {
                artifact.dispose();
            }
        }
    }
}

fn dispose_entry<T: Disposable>(entry: CacheEntry<T>) {
    match entry.result.peek() {
        Some(Ok(artifact)) => artifact.dispose(),
        Some(Err(_)) => {}
        None => {
            tokio::spawn(async move {
                if let Ok(artifact) = entry.result.await {
                    artifact.dispose();
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug)]
    struct Counted {
        value: u32,
        disposed: Arc<AtomicUsize>,
    }

    impl Disposable for Counted {
        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn source(dir: &Path, body: &[u8]) -> PathBuf {
        let p = dir.join("src.pdf");
        std::fs::write(&p, body).unwrap();
        p
    }

    #[tokio::test]
    async fn same_signature_computes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(dir.path(), b"%PDF-1.4 one");
        let cache = SignatureCache::<Counted>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let disposed = disposed.clone();
            let got = cache
                .get_or_compute(&path, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Counted { value: 7, disposed })
                })
                .await
                .unwrap();
            assert_eq!(got.value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(dir.path(), b"%PDF-1.4 shared");
        let cache = SignatureCache::<Counted>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));

        let make = || {
            let calls = calls.clone();
            let disposed = disposed.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(Counted { value: 1, disposed })
            }
        };
        let (a, b) = tokio::join!(
            cache.get_or_compute(&path, make()),
            cache.get_or_compute(&path, make())
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changed_size_recomputes_and_disposes_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(dir.path(), b"short");
        let cache = SignatureCache::<Counted>::new("test");
        let disposed = Arc::new(AtomicUsize::new(0));

        let d = disposed.clone();
        cache
            .get_or_compute(&path, move || async move { Ok(Counted { value: 1, disposed: d }) })
            .await
            .unwrap();

        std::fs::write(&path, b"much longer content").unwrap();
        let d = disposed.clone();
        let second = cache
            .get_or_compute(&path, move || async move { Ok(Counted { value: 2, disposed: d }) })
            .await
            .unwrap();

        assert_eq!(second.value, 2);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(dir.path(), b"x");
        let cache = SignatureCache::<Counted>::new("test");

        let err = cache
            .get_or_compute(&path, || async { Err(PrepError::Internal("boom".into())) })
            .await;
        assert!(err.is_err());
        assert!(cache.is_empty());

        let disposed = Arc::new(AtomicUsize::new(0));
        let ok = cache
            .get_or_compute(&path, move || async move { Ok(Counted { value: 3, disposed }) })
            .await;
        assert_eq!(ok.unwrap().value, 3);
    }

    #[tokio::test]
    async fn flush_disposes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = source(dir.path(), b"x");
        let cache = SignatureCache::<Counted>::new("test");
        let disposed = Arc::new(AtomicUsize::new(0));
        let d = disposed.clone();
        cache
            .get_or_compute(&path, move || async move { Ok(Counted { value: 1, disposed: d }) })
            .await
            .unwrap();

        cache.flush().await;
        assert!(cache.is_empty());
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_source_is_an_io_error() {
        let cache = SignatureCache::<Counted>::new("test");
        let err = cache
            .get_or_compute(Path::new("/nonexistent/src.pdf"), || async {
                Err(PrepError::Internal("unreachable".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PrepError::Io { .. }));
    }
}

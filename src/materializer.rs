//! Resource materialization
//!
//! Given one id, fetch its contents into a private per-id directory, unpack
//! the zip bundle if the store left one, and locate exactly one media file.
//! That file is handed out as bytes or as a copy under a destination
//! directory. The per-id directory is removed on every path.

use crate::error::{Error, ResourceError, Result};
use crate::store::{BUNDLE_FILE_NAME, ResourceStore, unpack_bundle};
use crate::types::{ResourceId, RetrievedItem};
use crate::utils::{create_unique, is_media_file};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// How materialized payloads are handed out
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaterializeMode {
    /// Read the media file into memory
    Bytes,
    /// Copy the media file under `dest`, keeping its relative path
    Files {
        /// Destination root
        dest: PathBuf,
    },
}

/// Turns resource ids into [`RetrievedItem`]s
///
/// Disk work (bundle unpacking, media scans, copies) runs on the blocking
/// pool and is tracked, so [`shutdown`](Self::shutdown) can wait for it
/// before the scratch directory it writes into is removed.
#[derive(Clone)]
pub struct Materializer {
    store: Arc<dyn ResourceStore>,
    blocking: TaskTracker,
    cancel: CancellationToken,
}

impl Materializer {
    /// Materializer reading from `store`
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            blocking: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Same store, fresh blocking-task scope, stopped by `cancel`
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self {
            store: Arc::clone(&self.store),
            blocking: TaskTracker::new(),
            cancel,
        }
    }

    /// Stop bundle unpacking and wait for every blocking job started so far
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.blocking.close();
        self.blocking.wait().await;
    }

    /// Materialize `id`, staging its raw contents under `scratch`
    pub async fn materialize(
        &self,
        id: ResourceId,
        scratch: &Path,
        mode: &MaterializeMode,
    ) -> Result<RetrievedItem> {
        let work_dir = scratch.join(id.to_string());
        // a previous attempt for this id may have left files behind
        if tokio::fs::try_exists(&work_dir).await? {
            tokio::fs::remove_dir_all(&work_dir).await?;
        }
        // not create_dir_all: a scratch root that is already gone stays gone
        tokio::fs::create_dir(&work_dir).await?;

        let result = self.materialize_in(id, &work_dir, mode).await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            tracing::warn!(resource_id = id.0, error = %e, "failed to remove resource scratch");
        }
        result
    }

    async fn materialize_in(
        &self,
        id: ResourceId,
        work_dir: &Path,
        mode: &MaterializeMode,
    ) -> Result<RetrievedItem> {
        self.store.fetch(id, work_dir).await?;

        let dir = work_dir.to_path_buf();
        let cancel = self.cancel.clone();
        let relative = self
            .run_blocking(move || {
                let bundle = dir.join(BUNDLE_FILE_NAME);
                if bundle.exists() {
                    let extracted = unpack_bundle(&bundle, &dir, &cancel)?;
                    std::fs::remove_file(&bundle)?;
                    debug!(resource_id = id.0, files = extracted, "bundle unpacked");
                }
                locate_media(id, &dir)
            })
            .await?;
        let source = work_dir.join(&relative);

        match mode {
            MaterializeMode::Bytes => {
                let data = tokio::fs::read(&source).await?;
                debug!(resource_id = id.0, bytes = data.len(), "materialized into memory");
                Ok(RetrievedItem::from_bytes(id, data))
            }
            MaterializeMode::Files { dest } => {
                let wanted = dest.join(&relative);
                let (target, size) = self
                    .run_blocking(move || {
                        if let Some(parent) = wanted.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        // the name is claimed before any byte is copied
                        let (target, mut out) = create_unique(&wanted)?;
                        let mut input = std::fs::File::open(&source)?;
                        let size = std::io::copy(&mut input, &mut out)?;
                        Ok((target, size))
                    })
                    .await?;
                debug!(resource_id = id.0, bytes = size, path = %target.display(), "materialized to file");
                Ok(RetrievedItem::from_file(id, target, size))
            }
        }
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.blocking
            .spawn_blocking(job)
            .await
            .map_err(|e| Error::Other(format!("staging task failed: {e}")))?
    }
}

/// Find the single media file under `dir`, returned relative to `dir`
///
/// Fails with [`ResourceError::NotFound`] when there is none and
/// [`ResourceError::AmbiguousResource`] when there are several.
pub fn locate_media(id: ResourceId, dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_media_file(entry.path()))
        .filter_map(|entry| entry.path().strip_prefix(dir).ok().map(Path::to_path_buf))
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(ResourceError::NotFound { id }.into()),
        1 => Ok(candidates.remove(0)),
        _ => Err(ResourceError::AmbiguousResource { id, candidates }.into()),
    }
}

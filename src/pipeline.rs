//! Query and download entry points
//!
//! [`Booru`] wires the pipeline together per source:
//! tag policy → id enumerator → retrieval session → collector, and for
//! downloads → packager.

use crate::collector::collect_session;
use crate::config::{Config, SourceConfig, normalize_source_name};
use crate::enumerator::{IdStream, enumerate_ids};
use crate::error::{Error, Result};
use crate::http::{SessionPool, SessionProvider};
use crate::materializer::{MaterializeMode, Materializer};
use crate::packager::{ArchiveScope, StagedFile, archive_file_name, package_blocking};
use crate::policy::{HttpMaxIdSource, MaxIdCache, MaxIdSource, RatingPolicy, RatingSelection, prepare_query};
use crate::retrieval::open_retrieval;
use crate::store::{HttpResourceStore, ResourceStore};
use crate::types::{CollectionResult, Quota};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything the pipeline needs for one source
pub struct SourceHandle {
    config: SourceConfig,
    client: reqwest::Client,
    max_id: Option<Arc<MaxIdCache>>,
    store: Arc<dyn ResourceStore>,
}

impl SourceHandle {
    /// Source settings
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Memoized max-id snapshot, if the source has one
    pub fn max_id_cache(&self) -> Option<&Arc<MaxIdCache>> {
        self.max_id.as_ref()
    }

    async fn query_tags(&self, tags: &[String]) -> Vec<String> {
        match &self.max_id {
            Some(cache) => prepare_query(tags, &self.config, cache).await,
            None => crate::policy::build_query(tags, &self.config, None),
        }
    }
}

/// Tag-query retrieval over one or more booru sources
///
/// # Example
///
/// ```no_run
/// use booru_dl::{Booru, Config, RatingSelection};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let booru = Booru::new(Config::default())?;
///     let tags = vec!["surtr_(arknights)".to_string()];
///
///     let images = booru.query("danbooru", &tags, 4, RatingSelection::Safe).await?;
///     for item in &images.items {
///         println!("{} ({} bytes)", item.id, item.size);
///     }
///
///     let archive = booru
///         .download("danbooru", &tags, Some(50), Some(25 * 1024 * 1024), RatingSelection::All)
///         .await?;
///     println!("{} files in {}", archive.written_count, archive.path.display());
///     Ok(())
/// }
/// ```
pub struct Booru {
    config: Config,
    sources: HashMap<String, SourceHandle>,
}

impl Booru {
    /// Build a pipeline with one shared HTTP client per source
    pub fn new(config: Config) -> Result<Self> {
        Self::with_sessions(config, &SessionPool::new())
    }

    /// Build a pipeline taking HTTP clients from `sessions`
    pub fn with_sessions(config: Config, sessions: &dyn SessionProvider) -> Result<Self> {
        config.validate()?;

        let mut sources = HashMap::new();
        for source in &config.sources {
            let client = sessions.client(source)?;
            let max_id = source.max_id_url.as_ref().map(|url| {
                let snapshot: Arc<dyn MaxIdSource> = Arc::new(HttpMaxIdSource::new(
                    client.clone(),
                    url.clone(),
                    config.retry.clone(),
                ));
                Arc::new(MaxIdCache::new(snapshot))
            });
            let store: Arc<dyn ResourceStore> = Arc::new(HttpResourceStore::new(
                client.clone(),
                source,
                config.retry.clone(),
            ));
            sources.insert(
                normalize_source_name(&source.name),
                SourceHandle {
                    config: source.clone(),
                    client,
                    max_id,
                    store,
                },
            );
        }

        Ok(Self { config, sources })
    }

    /// Replace the resource store of a source
    pub fn with_store(mut self, source: &str, store: Arc<dyn ResourceStore>) -> Result<Self> {
        self.handle_mut(source)?.store = store;
        Ok(self)
    }

    /// Replace the max-id snapshot of a source
    pub fn with_max_id_source(mut self, source: &str, snapshot: Arc<dyn MaxIdSource>) -> Result<Self> {
        self.handle_mut(source)?.max_id = Some(Arc::new(MaxIdCache::new(snapshot)));
        Ok(self)
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve a source by name
    pub fn source(&self, name: &str) -> Result<&SourceHandle> {
        self.sources
            .get(&normalize_source_name(name))
            .ok_or_else(|| Error::config(format!("unknown source '{name}'"), "sources.name"))
    }

    fn handle_mut(&mut self, name: &str) -> Result<&mut SourceHandle> {
        self.sources
            .get_mut(&normalize_source_name(name))
            .ok_or_else(|| Error::config(format!("unknown source '{name}'"), "sources.name"))
    }

    async fn ids(
        &self,
        handle: &SourceHandle,
        tags: &[String],
        ratings: &RatingSelection,
    ) -> IdStream {
        let query = handle.query_tags(tags).await;
        tracing::debug!(source = %handle.config.name, tags = ?query, "prepared query");
        enumerate_ids(
            handle.client.clone(),
            &handle.config,
            query,
            RatingPolicy::for_source(&handle.config, ratings),
            self.config.retry.clone(),
        )
    }

    /// Up to `count` images held in memory
    ///
    /// An empty result means the query matched nothing usable; a transport
    /// failure is returned as an error instead.
    pub async fn query(
        &self,
        source: &str,
        tags: &[String],
        count: usize,
        ratings: RatingSelection,
    ) -> Result<CollectionResult> {
        let handle = self.source(source)?;
        let ids = self.ids(handle, tags, &ratings).await;

        let mut session = open_retrieval(
            ids,
            Materializer::new(Arc::clone(&handle.store)),
            MaterializeMode::Bytes,
            &self.config.retrieval,
        )?;
        let result = collect_session(&mut session, Quota::count(count)).await;
        session.close().await;
        let result = result?;

        tracing::info!(
            source = %handle.config.name,
            count = result.len(),
            skipped = result.skipped,
            total_size = result.total_size,
            "query finished"
        );
        Ok(result)
    }

    /// Download matching images into one archive
    ///
    /// Collection stops at `max_count` items or before the first item that
    /// would exceed `max_total_size`; the packager then re-checks the budget
    /// per file. The returned scope owns the archive and deletes it on drop.
    pub async fn download(
        &self,
        source: &str,
        tags: &[String],
        max_count: Option<usize>,
        max_total_size: Option<u64>,
        ratings: RatingSelection,
    ) -> Result<ArchiveScope> {
        let handle = self.source(source)?;
        let scope_dir = self.config.retrieval.scratch("booru-dl-archive-")?;
        let staging = scope_dir.path().join("files");
        tokio::fs::create_dir_all(&staging).await?;

        let ids = self.ids(handle, tags, &ratings).await;
        let mut session = open_retrieval(
            ids,
            Materializer::new(Arc::clone(&handle.store)),
            MaterializeMode::Files {
                dest: staging.clone(),
            },
            &self.config.retrieval,
        )?;
        let quota = Quota {
            max_count,
            max_total_size,
        };
        let collected = collect_session(&mut session, quota).await;
        session.close().await;
        let collected = collected?;

        let staged: Vec<StagedFile> = collected.items.iter().filter_map(StagedFile::from_item).collect();
        let archive_path = scope_dir
            .path()
            .join(archive_file_name(tags, chrono::Utc::now()));
        let archive = package_blocking(staged, staging, max_total_size, archive_path).await?;

        tracing::info!(
            source = %handle.config.name,
            collected = collected.len(),
            skipped = collected.skipped,
            written = archive.written_count,
            "download packaged"
        );
        Ok(ArchiveScope::new(archive, scope_dir))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_source_is_config_error() {
        let booru = Booru::new(Config::default()).unwrap();
        let err = booru.source("e621").err().unwrap();
        assert_eq!(err.class(), crate::error::ErrorClass::Config);
        assert!(booru.source(" Danbooru").is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config {
            sources: Vec::new(),
            ..Config::default()
        };
        assert!(Booru::new(config).is_err());
    }

    #[test]
    fn sources_without_snapshot_have_no_cache() {
        let mut config = Config::default();
        config.sources[0].max_id_url = None;
        let booru = Booru::new(config).unwrap();
        assert!(booru.source("danbooru").unwrap().max_id_cache().is_none());
        assert!(booru.source("gelbooru").unwrap().max_id_cache().is_some());
    }
}

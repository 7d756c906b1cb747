//! Rating and tag policy
//!
//! Turns a user tag list into the query sent to a source: user tags first, in
//! their original order, followed by synthetic tags the source profile asks
//! for (an `id:<N` upper bound and a default `sort:` order). Rating filtering
//! happens later, in the enumerator, against a [`RatingPolicy`].

use crate::config::{IdBoundPolicy, RetryConfig, SourceConfig};
use crate::error::Result;
use crate::retry::fetch_with_retry;
use crate::types::ResourceId;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Prefix of the synthetic upper-bound tag
const ID_TAG_PREFIX: &str = "id:";
/// Prefix of any ordering tag
const SORT_TAG_PREFIX: &str = "sort:";

/// Which preset of rating labels the caller wants
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RatingSelection {
    /// Every rating of the source
    #[default]
    All,
    /// The source's safe preset
    Safe,
    /// An explicit allow-list
    Custom(BTreeSet<String>),
}

/// Set of accepted rating labels for one source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RatingPolicy {
    allowed: BTreeSet<String>,
}

impl RatingPolicy {
    /// Policy accepting exactly `labels`
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve a selection against a source's vocabulary
    pub fn for_source(source: &SourceConfig, selection: &RatingSelection) -> Self {
        match selection {
            RatingSelection::All => Self::new(source.ratings.iter().cloned()),
            RatingSelection::Safe => Self::new(source.safe_ratings.iter().cloned()),
            RatingSelection::Custom(labels) => Self::new(labels.iter().cloned()),
        }
    }

    /// True if `rating` is accepted
    pub fn allows(&self, rating: &str) -> bool {
        self.allowed.contains(rating)
    }

    /// Accepted labels
    pub fn labels(&self) -> &BTreeSet<String> {
        &self.allowed
    }
}

/// Supplies the current maximum known resource id of a source
#[async_trait]
pub trait MaxIdSource: Send + Sync {
    /// Fetch a fresh value
    async fn fetch_max_id(&self) -> Result<ResourceId>;
}

/// Reads a JSON array of ids and reports its maximum
pub struct HttpMaxIdSource {
    client: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

impl HttpMaxIdSource {
    /// Create a source reading `url` through `client`
    pub fn new(client: reqwest::Client, url: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client,
            url: url.into(),
            retry,
        }
    }
}

#[async_trait]
impl MaxIdSource for HttpMaxIdSource {
    async fn fetch_max_id(&self) -> Result<ResourceId> {
        let client = &self.client;
        let url = self.url.as_str();
        let ids: Vec<u64> = fetch_with_retry(&self.retry, || async move {
            let response = crate::http::get_checked(client, url, &[]).await?;
            let body = response.bytes().await?;
            Ok::<_, crate::error::Error>(serde_json::from_slice(&body)?)
        })
        .await?;

        ids.into_iter()
            .max()
            .map(ResourceId)
            .ok_or_else(|| crate::error::Error::Other(format!("id list at {} is empty", self.url)))
    }
}

/// Memoized "current max id" with explicit invalidation
///
/// The first successful fetch is kept until [`invalidate`](Self::invalidate)
/// is called. A failed fetch is not cached, so the next caller tries again.
/// Staleness only loosens the upper bound, it never affects correctness.
pub struct MaxIdCache {
    source: Arc<dyn MaxIdSource>,
    value: Mutex<Option<ResourceId>>,
}

impl MaxIdCache {
    /// Cache in front of `source`
    pub fn new(source: Arc<dyn MaxIdSource>) -> Self {
        Self {
            source,
            value: Mutex::new(None),
        }
    }

    /// Cached value, refreshing once if empty; `None` if the refresh failed
    pub async fn get(&self) -> Option<ResourceId> {
        let mut value = self.value.lock().await;
        if let Some(id) = *value {
            return Some(id);
        }
        match self.source.fetch_max_id().await {
            Ok(id) => {
                tracing::debug!(max_id = id.0, "refreshed max id snapshot");
                *value = Some(id);
                Some(id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not refresh max id, query will not be bounded");
                None
            }
        }
    }

    /// Cached value without refreshing
    pub async fn peek(&self) -> Option<ResourceId> {
        *self.value.lock().await
    }

    /// Drop the cached value so the next `get` refreshes
    pub async fn invalidate(&self) {
        *self.value.lock().await = None;
    }
}

fn user_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_prefix(tags: &[String], prefix: &str) -> bool {
    tags.iter().any(|t| t.starts_with(prefix))
}

/// True if the source profile would append an id bound to `tags`
pub fn wants_id_bound(tags: &[String], source: &SourceConfig) -> bool {
    let tags = user_tags(tags);
    if has_prefix(&tags, ID_TAG_PREFIX) {
        return false;
    }
    match source.id_bound {
        IdBoundPolicy::Never => false,
        IdBoundPolicy::WhenFewerThan(n) => tags.len() < n,
        IdBoundPolicy::Always => true,
    }
}

/// Augment user tags with the source's synthetic tags
///
/// Deterministic given the same inputs and `max_id` snapshot. Blank tags are
/// dropped, everything else is passed through as-is. With no `max_id` the
/// bound is omitted.
pub fn build_query(tags: &[String], source: &SourceConfig, max_id: Option<ResourceId>) -> Vec<String> {
    let bound = wants_id_bound(tags, source);
    let mut query = user_tags(tags);

    if bound && let Some(max_id) = max_id {
        query.push(format!("{ID_TAG_PREFIX}<{max_id}"));
    }
    if let Some(sort) = &source.default_sort
        && !has_prefix(&query, SORT_TAG_PREFIX)
    {
        query.push(sort.clone());
    }
    query
}

/// [`build_query`] that consults `cache` only when a bound is wanted
pub async fn prepare_query(tags: &[String], source: &SourceConfig, cache: &MaxIdCache) -> Vec<String> {
    let max_id = if wants_id_bound(tags, source) {
        cache.get().await
    } else {
        None
    };
    build_query(tags, source, max_id)
}

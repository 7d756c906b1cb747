//! Paginated id enumeration
//!
//! [`IdEnumerator`] walks a source's listing endpoint page by page and yields
//! the ids that survive the parent and rating filters, in page order. It is a
//! pull-based stream: a page is only requested once the consumer has drained
//! the previous one, and nothing beyond one page is buffered.
//!
//! The walk ends on the first empty page or after `max_pages` pages, whichever
//! comes first. A transport failure ends the stream with that error.

use crate::config::{RetryConfig, SourceConfig};
use crate::error::{Error, Result};
use crate::http::{credential_params, get_checked};
use crate::policy::RatingPolicy;
use crate::retry::fetch_with_retry;
use crate::types::{PostRecord, ResourceId};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::Deserialize;

/// Boxed stream of enumerated ids
pub type IdStream = BoxStream<'static, Result<ResourceId>>;

/// Listing payload, either a bare array or an object wrapping it under `post`
#[derive(Deserialize)]
#[serde(untagged)]
enum ListingResponse {
    Posts(Vec<PostRecord>),
    Wrapped {
        #[serde(default)]
        post: Vec<PostRecord>,
    },
}

impl ListingResponse {
    fn into_posts(self) -> Vec<PostRecord> {
        match self {
            ListingResponse::Posts(posts) => posts,
            ListingResponse::Wrapped { post } => post,
        }
    }
}

/// Page walking limits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageLimits {
    /// Items requested per page
    pub page_size: u32,
    /// Maximum number of pages requested
    pub max_pages: u32,
    /// Index of the first page
    pub first_page: u32,
}

impl PageLimits {
    /// Limits configured for `source`
    pub fn for_source(source: &SourceConfig) -> Self {
        Self {
            page_size: source.page_size,
            max_pages: source.max_pages,
            first_page: source.first_page,
        }
    }
}

/// Lazy id enumeration for one tag query
#[derive(Clone)]
pub struct IdEnumerator {
    client: reqwest::Client,
    url: String,
    page_param: String,
    limit_param: String,
    base_params: Vec<(String, String)>,
    tags: Vec<String>,
    ratings: RatingPolicy,
    limits: PageLimits,
    retry: RetryConfig,
}

impl IdEnumerator {
    /// Enumerator over `tags` against `source`, accepting `ratings`
    pub fn new(
        client: reqwest::Client,
        source: &SourceConfig,
        tags: Vec<String>,
        ratings: RatingPolicy,
        retry: RetryConfig,
    ) -> Self {
        let mut base_params = source.extra_params.clone();
        base_params.extend(credential_params(source));
        Self {
            client,
            url: source.listing_url(),
            page_param: source.page_param.clone(),
            limit_param: source.limit_param.clone(),
            base_params,
            tags,
            ratings,
            limits: PageLimits::for_source(source),
            retry,
        }
    }

    /// Override the page size and ceiling
    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Fetch and decode one raw page (no filtering)
    pub async fn fetch_page(&self, page: u32) -> Result<Vec<PostRecord>> {
        let mut params = self.base_params.clone();
        params.push((self.limit_param.clone(), self.limits.page_size.to_string()));
        params.push((self.page_param.clone(), page.to_string()));
        params.push(("tags".to_string(), self.tags.join(" ")));

        let client = &self.client;
        let url = self.url.as_str();
        let params = params.as_slice();
        let listing: ListingResponse = fetch_with_retry(&self.retry, || async move {
            let response = get_checked(client, url, params).await?;
            let body = response.bytes().await?;
            Ok::<_, Error>(serde_json::from_slice(&body)?)
        })
        .await?;
        Ok(listing.into_posts())
    }

    /// Ids of a page that pass the parent and rating filters, in page order
    pub fn accepted_ids(&self, posts: &[PostRecord]) -> Vec<ResourceId> {
        posts
            .iter()
            .filter(|post| !post.has_parent())
            .filter(|post| {
                post.rating
                    .as_deref()
                    .is_some_and(|rating| self.ratings.allows(rating))
            })
            .map(|post| post.id)
            .collect()
    }

    /// Turn the enumerator into a lazy id stream
    pub fn into_stream(self) -> IdStream {
        let first = self.limits.first_page;
        let pages = stream::try_unfold((self, 0u32), move |(enumerator, walked)| async move {
            if walked >= enumerator.limits.max_pages {
                tracing::info!(
                    pages = walked,
                    "page ceiling reached, stopping enumeration"
                );
                return Ok::<_, Error>(None);
            }

            let page = first + walked;
            let posts = enumerator.fetch_page(page).await?;
            if posts.is_empty() {
                tracing::info!(page, "empty page, enumeration finished");
                return Ok(None);
            }

            let ids = enumerator.accepted_ids(&posts);
            tracing::debug!(
                page,
                received = posts.len(),
                accepted = ids.len(),
                "listing page fetched"
            );
            Ok(Some((ids, (enumerator, walked + 1))))
        });

        pages
            .map_ok(|ids| stream::iter(ids.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

/// Lazy stream of accepted ids for `tags` against `source`
pub fn enumerate_ids(
    client: reqwest::Client,
    source: &SourceConfig,
    tags: Vec<String>,
    ratings: RatingPolicy,
    retry: RetryConfig,
) -> IdStream {
    IdEnumerator::new(client, source, tags, ratings, retry).into_stream()
}

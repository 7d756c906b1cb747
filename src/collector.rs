//! Quota-bounded collection
//!
//! [`collect`] drains a stream of retrieved items, keeping the first
//! occurrence of each id, until a [`Quota`] is met or the stream ends.
//!
//! The size cap is a hard stop: the first item that would push the running
//! total over `max_total_size` ends the whole collection, even if a smaller
//! item later in the stream would still fit.

use crate::error::Result;
use crate::retrieval::RetrievalSession;
use crate::types::{CollectionResult, Quota, RetrievedItem};
use futures::stream::{Stream, StreamExt};
use std::collections::HashSet;
use tracing::{debug, info};

/// Drain `items` under `quota`
///
/// Any error from the stream aborts the collection and is returned; no
/// partial result is handed back in that case.
pub async fn collect<S>(items: &mut S, quota: Quota) -> Result<CollectionResult>
where
    S: Stream<Item = Result<RetrievedItem>> + Unpin,
{
    let mut result = CollectionResult::default();
    if quota.max_count == Some(0) {
        return Ok(result);
    }

    let mut seen = HashSet::new();
    while let Some(next) = items.next().await {
        let item = next?;

        if seen.contains(&item.id) {
            debug!(resource_id = item.id.0, "duplicate id ignored");
            continue;
        }

        if let Some(max_total_size) = quota.max_total_size
            && result.total_size.saturating_add(item.size) > max_total_size
        {
            info!(
                resource_id = item.id.0,
                size = item.size,
                total = result.total_size,
                max_total_size,
                "size budget reached, stopping collection"
            );
            break;
        }

        seen.insert(item.id);
        result.total_size += item.size;
        result.items.push(item);

        if let Some(max_count) = quota.max_count
            && result.items.len() >= max_count
        {
            info!(count = max_count, "count quota reached, stopping collection");
            break;
        }
    }

    Ok(result)
}

/// [`collect`] over a retrieval session, recording how many ids it skipped
pub async fn collect_session(
    session: &mut RetrievalSession,
    quota: Quota,
) -> Result<CollectionResult> {
    let mut result = collect(session, quota).await?;
    result.skipped = session.skipped();
    Ok(result)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::ResourceId;
    use futures::stream;

    fn items(sizes: &[(u64, usize)]) -> impl Stream<Item = Result<RetrievedItem>> + Unpin {
        let items: Vec<Result<RetrievedItem>> = sizes
            .iter()
            .map(|(id, size)| Ok(RetrievedItem::from_bytes(ResourceId(*id), vec![0u8; *size])))
            .collect();
        stream::iter(items)
    }

    fn ids(result: &CollectionResult) -> Vec<u64> {
        result.ids().into_iter().map(|id| id.get()).collect()
    }

    #[tokio::test]
    async fn duplicates_are_dropped_first_wins() {
        let mut stream = items(&[(1, 3), (2, 3), (1, 9), (3, 3), (2, 1)]);
        let result = collect(&mut stream, Quota::default()).await.unwrap();
        assert_eq!(ids(&result), vec![1, 2, 3]);
        assert_eq!(result.total_size, 9);
    }

    #[tokio::test]
    async fn count_cap_returns_exactly_k() {
        let mut stream = items(&[(1, 1), (2, 1), (3, 1), (4, 1), (5, 1)]);
        let result = collect(&mut stream, Quota::count(3)).await.unwrap();
        assert_eq!(result.len(), 3);

        // the rest of the stream is left unconsumed
        assert_eq!(stream.next().await.unwrap().unwrap().id, ResourceId(4));
    }

    #[tokio::test]
    async fn count_cap_ignores_duplicates() {
        let mut stream = items(&[(1, 1), (1, 1), (1, 1), (2, 1)]);
        let result = collect(&mut stream, Quota::count(2)).await.unwrap();
        assert_eq!(ids(&result), vec![1, 2]);
    }

    #[tokio::test]
    async fn size_cap_is_a_hard_stop() {
        let mut stream = items(&[(1, 10), (2, 10), (3, 30), (4, 5)]);
        let result = collect(&mut stream, Quota::size(25)).await.unwrap();
        assert_eq!(ids(&result), vec![1, 2]);
        assert_eq!(result.total_size, 20);
    }

    #[tokio::test]
    async fn size_cap_allows_exact_fit() {
        let mut stream = items(&[(1, 10), (2, 15), (3, 1)]);
        let result = collect(&mut stream, Quota::size(25)).await.unwrap();
        assert_eq!(ids(&result), vec![1, 2]);
        assert_eq!(result.total_size, 25);
    }

    #[tokio::test]
    async fn both_caps_whichever_first() {
        let quota = Quota {
            max_count: Some(2),
            max_total_size: Some(100),
        };
        let mut stream = items(&[(1, 10), (2, 10), (3, 10)]);
        let result = collect(&mut stream, quota).await.unwrap();
        assert_eq!(result.len(), 2);

        let quota = Quota {
            max_count: Some(5),
            max_total_size: Some(15),
        };
        let mut stream = items(&[(1, 10), (2, 10), (3, 1)]);
        let result = collect(&mut stream, quota).await.unwrap();
        assert_eq!(ids(&result), vec![1]);
    }

    #[tokio::test]
    async fn zero_count_takes_nothing() {
        let mut stream = items(&[(1, 1)]);
        let result = collect(&mut stream, Quota::count(0)).await.unwrap();
        assert!(result.is_empty());
        assert!(stream.next().await.is_some());
    }

    #[tokio::test]
    async fn stream_error_aborts_collection() {
        let mut stream = stream::iter(vec![
            Ok(RetrievedItem::from_bytes(ResourceId(1), vec![1])),
            Err(Error::HttpStatus {
                url: "http://x".into(),
                status: 503,
            }),
            Ok(RetrievedItem::from_bytes(ResourceId(2), vec![1])),
        ]);
        let err = collect(&mut stream, Quota::default()).await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn empty_stream_is_empty_success() {
        let mut stream = items(&[]);
        let result = collect(&mut stream, Quota::count(4)).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.skipped, 0);
    }
}

//! Deduplicating retrieval session
//!
//! [`open_retrieval`] spawns one driver task that pulls ids from an
//! [`IdStream`], skips ids it has already started, and materializes up to
//! `concurrency` resources at a time. Finished items are pushed through a
//! bounded channel to the consumer, in completion order.
//!
//! The session owns its workers. Dropping it (for example after breaking out
//! of a loop once a quota is met) cancels the driver, which stops every
//! in-flight fetch and waits for their blocking staging jobs before removing
//! the scratch directory. [`RetrievalSession::close`] does the same and also
//! waits for the driver to finish.

use crate::config::{FailurePolicy, RetrievalConfig};
use crate::enumerator::IdStream;
use crate::error::Result;
use crate::materializer::{MaterializeMode, Materializer};
use crate::types::RetrievedItem;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Live retrieval scope yielding materialized items
pub struct RetrievalSession {
    items: ReceiverStream<Result<RetrievedItem>>,
    driver: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    skipped: Arc<AtomicU64>,
}

impl RetrievalSession {
    /// Number of ids skipped so far because they failed to materialize
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Stop all workers and wait for the driver to exit
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take()
            && let Err(e) = driver.await
            && !e.is_cancelled()
        {
            tracing::error!(error = %e, "retrieval driver panicked");
        }
    }
}

impl Stream for RetrievalSession {
    type Item = Result<RetrievedItem>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().items).poll_next(cx)
    }
}

impl Drop for RetrievalSession {
    fn drop(&mut self) {
        // the driver still has to drain blocking jobs and remove scratch
        self.cancel.cancel();
    }
}

/// Open a retrieval scope over `ids`
///
/// Must be called from within a tokio runtime.
pub fn open_retrieval(
    ids: IdStream,
    materializer: Materializer,
    mode: MaterializeMode,
    config: &RetrievalConfig,
) -> Result<RetrievalSession> {
    let scratch = config.scratch("booru-dl-fetch-")?;
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let cancel = CancellationToken::new();
    let skipped = Arc::new(AtomicU64::new(0));

    let driver = tokio::spawn(drive(DriverParams {
        ids,
        materializer: materializer.scoped(cancel.child_token()),
        mode,
        scratch,
        concurrency: config.concurrency.max(1),
        failure_policy: config.failure_policy,
        tx,
        cancel: cancel.clone(),
        skipped: Arc::clone(&skipped),
    }));

    Ok(RetrievalSession {
        items: ReceiverStream::new(rx),
        driver: Some(driver),
        cancel,
        skipped,
    })
}

struct DriverParams {
    ids: IdStream,
    materializer: Materializer,
    mode: MaterializeMode,
    scratch: tempfile::TempDir,
    concurrency: usize,
    failure_policy: FailurePolicy,
    tx: mpsc::Sender<Result<RetrievedItem>>,
    cancel: CancellationToken,
    skipped: Arc<AtomicU64>,
}

async fn drive(params: DriverParams) {
    let DriverParams {
        ids,
        materializer,
        mode,
        scratch,
        concurrency,
        failure_policy,
        tx,
        cancel,
        skipped,
    } = params;
    let scratch_path = scratch.path().to_path_buf();
    let staging = materializer.clone();

    let mut started = HashSet::new();
    let mut results = ids
        .try_filter(move |id| futures::future::ready(started.insert(*id)))
        .map(|next| {
            let materializer = materializer.clone();
            let mode = mode.clone();
            let scratch_path = scratch_path.clone();
            async move {
                match next {
                    Ok(id) => materializer.materialize(id, &scratch_path, &mode).await,
                    Err(e) => Err(e),
                }
            }
        })
        .buffer_unordered(concurrency);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = results.next() => next,
        };

        let outcome = match next {
            Some(outcome) => outcome,
            None => break,
        };

        let outcome = match outcome {
            Err(e) if e.is_item_level() && failure_policy == FailurePolicy::Skip => {
                skipped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(code = e.error_code(), error = %e, "skipping resource");
                continue;
            }
            other => other,
        };
        let terminal = outcome.is_err();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(outcome) => {
                if sent.is_err() {
                    // consumer went away
                    break;
                }
            }
        }

        if terminal {
            break;
        }
    }

    // in-flight fetches and their blocking jobs end before scratch goes away
    drop(results);
    staging.shutdown().await;
    drop(scratch);
}

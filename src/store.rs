//! Remote resource stores
//!
//! A [`ResourceStore`] places whatever a source holds for one resource id into
//! a directory. It does not decide which file is the media payload; the
//! [`Materializer`](crate::materializer::Materializer) does that afterwards.

use crate::config::{RetryConfig, SourceConfig};
use crate::error::{Error, ResourceError, Result};
use crate::retry::fetch_with_retry;
use crate::types::ResourceId;
use crate::utils::filename_from_response;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// File name a zip bundle body is stored under, before it is unpacked
pub const BUNDLE_FILE_NAME: &str = ".bundle.zip";

/// Fetches the raw contents of one resource
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Place the contents for `id` into `dir`, which already exists and is empty
    ///
    /// A zip bundle may be left as [`BUNDLE_FILE_NAME`]; it is unpacked in
    /// place before media is located.
    async fn fetch(&self, id: ResourceId, dir: &Path) -> Result<()>;
}

/// Store backed by a URL template such as `https://cdn/images/{id}.webp`
///
/// Plain bodies are streamed to disk chunk by chunk. Zip bodies are stored as
/// bundles and later unpacked in place, which is how several media candidates
/// for a single id can appear.
pub struct HttpResourceStore {
    client: reqwest::Client,
    source: SourceConfig,
    retry: RetryConfig,
}

impl HttpResourceStore {
    /// Store for `source`, sharing `client`
    pub fn new(client: reqwest::Client, source: &SourceConfig, retry: RetryConfig) -> Self {
        Self {
            client,
            source: source.clone(),
            retry,
        }
    }

    async fn fetch_once(&self, id: ResourceId, url: &str, dir: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ResourceError::NotFound { id }.into());
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let is_bundle = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("zip"))
            || url.to_lowercase().ends_with(".zip");

        let name = if is_bundle {
            BUNDLE_FILE_NAME.to_string()
        } else {
            filename_from_response(&response, url, &id.to_string())
        };

        let written = stream_to_file(response, &dir.join(&name)).await?;
        debug!(resource_id = id.0, bytes = written, file = %name, "resource body stored");
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for HttpResourceStore {
    async fn fetch(&self, id: ResourceId, dir: &Path) -> Result<()> {
        let url = self.source.resource_url_for(id);
        fetch_with_retry(&self.retry, || self.fetch_once(id, &url, dir)).await
    }
}

/// Stream a response body into `path`, returning the number of bytes written
async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut body = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Unpack a zip bundle into `dest`, skipping entries with unsafe paths
///
/// Returns the number of files written. `cancel` is checked before every
/// entry; once it fires, unpacking stops and nothing more is written.
pub fn unpack_bundle(archive_path: &Path, dest: &Path, cancel: &CancellationToken) -> Result<usize> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut extracted = 0;

    for index in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(Error::Other(format!(
                "unpacking {} cancelled after {extracted} files",
                archive_path.display()
            )));
        }
        let mut entry = archive.by_index(index)?;
        let relative: PathBuf = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                warn!(entry = entry.name(), "skipping bundle entry with unsafe path");
                continue;
            }
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }

    Ok(extracted)
}

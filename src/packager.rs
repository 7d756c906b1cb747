//! Archive packaging
//!
//! [`package`] writes staged files into one deflate-compressed zip. The byte
//! budget is checked again while writing, against each file's on-disk size:
//! an entry is written only if the running uncompressed total stays strictly
//! below the budget. Unlike the collector, a skipped entry does not end
//! packaging; later, smaller entries are still tried.

use crate::error::{Error, Result};
use crate::types::{ResourceId, RetrievedItem};
use crate::utils::normalize_tags;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One file waiting to be packaged
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedFile {
    /// Resource the file belongs to
    pub id: ResourceId,
    /// Location on scratch storage
    pub path: PathBuf,
}

impl StagedFile {
    /// Staged file for `item`, if its payload is a file
    pub fn from_item(item: &RetrievedItem) -> Option<Self> {
        item.path().map(|path| Self {
            id: item.id,
            path: path.to_path_buf(),
        })
    }
}

/// A written archive and what went into it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackagedArchive {
    /// Archive location
    pub path: PathBuf,
    /// Files handed to the packager
    pub staged_count: usize,
    /// Files actually written
    pub written_count: usize,
    /// Sum of on-disk sizes of written files
    pub total_size: u64,
    /// Size of the archive file itself
    pub archive_size: u64,
}

/// Archive file name for a tag list at a point in time
///
/// # Examples
///
/// ```
/// use booru_dl::packager::archive_file_name;
/// use chrono::{TimeZone, Utc};
///
/// let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap();
/// assert_eq!(
///     archive_file_name(&["Cat Ears".to_string()], at),
///     "cat_ears-20240501T123005000.zip"
/// );
/// ```
pub fn archive_file_name(tags: &[String], at: DateTime<Utc>) -> String {
    format!("{}-{}.zip", normalize_tags(tags), at.format("%Y%m%dT%H%M%S%3f"))
}

fn entry_name(file: &StagedFile, staging_root: &Path) -> Result<String> {
    // files outside the root lose their directories, so the id keeps them apart
    let relative = file
        .path
        .strip_prefix(staging_root)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| {
            file.path
                .file_name()
                .map(|name| PathBuf::from(format!("{}-{}", file.id, name.to_string_lossy())))
        })
        .ok_or_else(|| Error::Other(format!("cannot name archive entry for {}", file.path.display())))?;

    // zip entry names always use forward slashes
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Write `files` into a zip at `archive_path`
///
/// Entries are named by their path relative to `staging_root` (or their
/// file name when outside it) and considered in the given order. With no
/// `max_total_size` every file is written. A repeated id is written once.
pub fn package(
    files: &[StagedFile],
    staging_root: &Path,
    max_total_size: Option<u64>,
    archive_path: &Path,
) -> Result<PackagedArchive> {
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let out = std::fs::File::create(archive_path)?;
    let mut writer = zip::ZipWriter::new(out);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut written_ids = HashSet::new();
    let mut total_size = 0u64;
    let mut written_count = 0usize;

    for file in files {
        if written_ids.contains(&file.id) {
            debug!(resource_id = file.id.0, "duplicate id not packaged twice");
            continue;
        }

        let size = std::fs::metadata(&file.path)?.len();
        if let Some(max_total_size) = max_total_size
            && total_size.saturating_add(size) >= max_total_size
        {
            debug!(
                resource_id = file.id.0,
                size,
                total = total_size,
                max_total_size,
                "file does not fit archive budget, skipping"
            );
            continue;
        }

        let name = entry_name(file, staging_root)?;
        writer.start_file(name, options)?;
        let mut source = std::fs::File::open(&file.path)?;
        std::io::copy(&mut source, &mut writer)?;

        written_ids.insert(file.id);
        total_size += size;
        written_count += 1;
    }

    let mut out = writer.finish()?;
    out.flush()?;
    let archive_size = std::fs::metadata(archive_path)?.len();

    info!(
        path = %archive_path.display(),
        staged = files.len(),
        written = written_count,
        total_size,
        archive_size,
        "archive written"
    );

    Ok(PackagedArchive {
        path: archive_path.to_path_buf(),
        staged_count: files.len(),
        written_count,
        total_size,
        archive_size,
    })
}

/// [`package`] on the blocking thread pool
pub async fn package_blocking(
    files: Vec<StagedFile>,
    staging_root: PathBuf,
    max_total_size: Option<u64>,
    archive_path: PathBuf,
) -> Result<PackagedArchive> {
    tokio::task::spawn_blocking(move || {
        package(&files, &staging_root, max_total_size, &archive_path)
    })
    .await
    .map_err(|e| Error::Other(format!("packaging task failed: {e}")))?
}

/// A packaged archive together with the scratch directory holding it
///
/// The archive and every staged file are deleted when the scope is dropped,
/// so the caller must consume the archive before that.
pub struct ArchiveScope {
    archive: PackagedArchive,
    dir: tempfile::TempDir,
}

impl ArchiveScope {
    /// Wrap an archive living inside `dir`
    pub fn new(archive: PackagedArchive, dir: tempfile::TempDir) -> Self {
        Self { archive, dir }
    }

    /// The archive
    pub fn archive(&self) -> &PackagedArchive {
        &self.archive
    }

    /// Scratch directory backing this scope
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the scratch directory now, reporting failures
    pub fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

impl Deref for ArchiveScope {
    type Target = PackagedArchive;

    fn deref(&self) -> &Self::Target {
        &self.archive
    }
}

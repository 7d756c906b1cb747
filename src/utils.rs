//! Utility functions for file naming and tag normalization

use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Maximum length of the tag part of an archive name
const MAX_TAG_SLUG_LEN: usize = 80;

static SLUG_INVALID: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"[^a-z0-9_-]+").expect("static regex is valid")
});

/// Media file extensions recognized when locating a resource's payload
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "webp", "png", "jpg", "jpeg", "gif", "bmp", "avif", "tif", "tiff",
];

/// Check whether a path looks like a media file, by extension
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use booru_dl::utils::is_media_file;
///
/// assert!(is_media_file(Path::new("images/123.WEBP")));
/// assert!(!is_media_file(Path::new("123.json")));
/// ```
#[must_use]
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_lowercase();
            MEDIA_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Create a new file at `path`, or at the first free " (1)", " (2)", ... variant
///
/// Each candidate is opened with `create_new`, so two callers racing for the
/// same name always end up with distinct files.
///
/// # Examples
///
/// ```
/// use booru_dl::utils::create_unique;
///
/// let dir = tempfile::TempDir::new().unwrap();
/// let (first, _) = create_unique(&dir.path().join("123.webp")).unwrap();
/// let (second, _) = create_unique(&dir.path().join("123.webp")).unwrap();
/// assert_eq!(first, dir.path().join("123.webp"));
/// assert_eq!(second, dir.path().join("123 (1).webp"));
/// ```
pub fn create_unique(path: &Path) -> Result<(PathBuf, std::fs::File)> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("cannot extract file stem from {}", path.display())))?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path
        .parent()
        .ok_or_else(|| Error::Other(format!("cannot extract parent of {}", path.display())))?;

    for i in 0..=MAX_RENAME_ATTEMPTS {
        let candidate = if i == 0 {
            path.to_path_buf()
        } else {
            match extension {
                Some(ext) => parent.join(format!("{} ({}).{}", stem, i, ext)),
                None => parent.join(format!("{} ({})", stem, i)),
            }
        };
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::Other(format!(
        "could not find a unique name for {} after {} attempts",
        path.display(),
        MAX_RENAME_ATTEMPTS
    )))
}

/// Reduce a header- or URL-supplied name to a single safe path component
fn safe_component(name: &str) -> Option<String> {
    let name = Path::new(name.trim()).file_name()?.to_str()?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// Extract a file name (with extension) from an HTTP response
///
/// Tries the Content-Disposition header first (plain and RFC 5987 forms),
/// then the last URL path segment, then falls back to `fallback`.
pub fn filename_from_response(response: &reqwest::Response, url: &str, fallback: &str) -> String {
    if let Some(content_disposition) = response.headers().get("content-disposition")
        && let Ok(value) = content_disposition.to_str()
        && let Some(name) = filename_from_disposition(value)
    {
        return name;
    }

    if let Ok(parsed_url) = url::Url::parse(url)
        && let Some(mut segments) = parsed_url.path_segments()
        && let Some(last_segment) = segments.next_back()
        && let Ok(decoded) = urlencoding::decode(last_segment)
        && let Some(name) = safe_component(&decoded)
    {
        return name;
    }

    fallback.to_string()
}

fn filename_from_disposition(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // charset'lang'encoded-filename
            let encoded = encoded.rsplit('\'').next().unwrap_or(encoded);
            if let Ok(decoded) = urlencoding::decode(encoded)
                && let Some(name) = safe_component(&decoded)
            {
                return Some(name);
            }
        } else if let Some(plain) = part.strip_prefix("filename=") {
            if let Some(name) = safe_component(plain.trim_matches('"')) {
                return Some(name);
            }
        }
    }
    None
}

/// Normalize a tag list into a filesystem-safe slug
///
/// Tags are lowercased, runs of characters outside `[a-z0-9_-]` collapse to
/// `_`, and the tags are joined with `+`. Empty input yields `untagged`.
///
/// # Examples
///
/// ```
/// use booru_dl::utils::normalize_tags;
///
/// let tags = vec!["Surtr (Arknights)".to_string(), "solo".to_string()];
/// assert_eq!(normalize_tags(&tags), "surtr_arknights_+solo");
/// ```
pub fn normalize_tags(tags: &[String]) -> String {
    let parts: Vec<String> = tags
        .iter()
        .map(|tag| SLUG_INVALID.replace_all(&tag.trim().to_lowercase(), "_").into_owned())
        .filter(|slug| !slug.is_empty() && slug != "_")
        .collect();

    if parts.is_empty() {
        return "untagged".to_string();
    }

    let mut slug = parts.join("+");
    if slug.len() > MAX_TAG_SLUG_LEN {
        // slug is ASCII, any index is a char boundary
        slug.truncate(MAX_TAG_SLUG_LEN);
    }
    slug
}

//! Error types for booru-dl
//!
//! This module provides the error taxonomy of the retrieval pipeline:
//! - Transport failures (network, non-success HTTP status) that abort a whole query
//! - Item-level resource failures ([`ResourceError`]) that the retrieval session absorbs
//! - Configuration, I/O, serialization and archive failures
//!
//! Every [`Error`] maps onto an [`ErrorClass`] so a host can tell a failed query
//! apart from an empty-but-successful one.

use crate::types::ResourceId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for booru-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for booru-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "page_size")
        key: Option<String>,
    },

    /// Network error raised by the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// Response status code
        status: u16,
    },

    /// A single resource could not be materialized
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Archive read or write failure
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Item-level failures for one resource id
///
/// These never abort a batch under the default failure policy; the retrieval
/// session skips the id and counts it.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// No media file present among the retrieved contents
    #[error("resource {id} has no media file")]
    NotFound {
        /// The resource id that produced no media
        id: ResourceId,
    },

    /// More than one file looks like media for this id
    #[error("resource {id} is ambiguous: {} candidate media files", candidates.len())]
    AmbiguousResource {
        /// The resource id with several media candidates
        id: ResourceId,
        /// Candidate files, relative to the resource's scratch directory
        candidates: Vec<PathBuf>,
    },
}

impl ResourceError {
    /// The resource id this failure refers to
    pub fn id(&self) -> ResourceId {
        match self {
            ResourceError::NotFound { id } => *id,
            ResourceError::AmbiguousResource { id, .. } => *id,
        }
    }
}

/// Coarse classification used to pick a user-facing message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Remote unreachable or misbehaving; retry later
    Transport,
    /// Misconfiguration; needs operator action
    Config,
    /// A specific resource was unusable
    Resource,
    /// Local failure (disk, archive, serialization)
    Internal,
}

impl Error {
    /// Build a configuration error tied to a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Classify this error for user-visible reporting
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Network(_) | Error::HttpStatus { .. } => ErrorClass::Transport,
            Error::Config { .. } => ErrorClass::Config,
            Error::Resource(_) => ErrorClass::Resource,
            Error::Io(_) | Error::Serialization(_) | Error::Archive(_) | Error::Other(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// True for failures scoped to a single resource id
    pub fn is_item_level(&self) -> bool {
        matches!(self, Error::Resource(_))
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Network(_) => "network_error",
            Error::HttpStatus { .. } => "http_status",
            Error::Resource(ResourceError::NotFound { .. }) => "resource_not_found",
            Error::Resource(ResourceError::AmbiguousResource { .. }) => "ambiguous_resource",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Archive(_) => "archive_error",
            Error::Other(_) => "internal_error",
        }
    }
}

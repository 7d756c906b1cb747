//! # booru-dl
//!
//! Tag-query image retrieval for booru-style image boards.
//!
//! A query flows through a fixed pipeline:
//!
//! - **Tag policy** normalizes tags and may bound them below the newest
//!   post id known to a snapshot
//! - **Enumerator** pages through the listing API and yields accepted ids
//! - **Retrieval session** fetches ids concurrently, once each
//! - **Collector** stops at a count or byte quota
//! - **Packager** bundles downloaded files into one zip archive
//!
//! ## Quick Start
//!
//! ```no_run
//! use booru_dl::{Booru, Config, RatingSelection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let booru = Booru::new(Config::default())?;
//!     let tags = vec!["1girl".to_string(), "solo".to_string()];
//!
//!     let result = booru.query("danbooru", &tags, 4, RatingSelection::Safe).await?;
//!     println!("got {} images, {} skipped", result.len(), result.skipped);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Quota-bounded collection
pub mod collector;
/// Configuration types
pub mod config;
/// Paginated id enumeration
pub mod enumerator;
/// Error types
pub mod error;
/// HTTP sessions
pub mod http;
/// Per-id fetch and media location
pub mod materializer;
/// Zip packaging
pub mod packager;
/// Query and download entry points
pub mod pipeline;
/// Tag and rating policy
pub mod policy;
/// Concurrent deduplicating retrieval
pub mod retrieval;
/// Retry logic with exponential backoff
pub mod retry;
/// Resource stores
pub mod store;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, FailurePolicy, IdBoundPolicy, RetrievalConfig, RetryConfig, SourceConfig};
pub use error::{Error, ErrorClass, ResourceError, Result};
pub use packager::{ArchiveScope, PackagedArchive};
pub use pipeline::{Booru, SourceHandle};
pub use policy::{MaxIdSource, RatingSelection};
pub use retrieval::RetrievalSession;
pub use store::ResourceStore;
pub use types::{CollectionResult, Payload, Quota, ResourceId, RetrievedItem};

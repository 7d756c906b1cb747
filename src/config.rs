//! Configuration types for booru-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for [`Booru`](crate::Booru)
///
/// Fields are organized into logical sub-configs:
/// - [`sources`](SourceConfig): one entry per remote catalog
/// - [`retrieval`](RetrievalConfig): fetch workers and failure policy
/// - [`retry`](RetryConfig): backoff for transport calls
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Remote catalogs (at least one required)
    pub sources: Vec<SourceConfig>,

    /// Retrieval session settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Retry behavior for listing and resource requests
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: vec![SourceConfig::danbooru(), SourceConfig::gelbooru()],
            retrieval: RetrievalConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Look up a source by name (case-insensitive, surrounding whitespace ignored)
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        let wanted = normalize_source_name(name);
        self.sources
            .iter()
            .find(|s| normalize_source_name(&s.name) == wanted)
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::config("at least one source is required", "sources"));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(normalize_source_name(&source.name)) {
                return Err(Error::config(
                    format!("duplicate source name '{}'", source.name),
                    "sources.name",
                ));
            }
            source.validate()?;
        }

        if self.retrieval.concurrency == 0 {
            return Err(Error::config(
                "concurrency must be at least 1",
                "retrieval.concurrency",
            ));
        }
        if self.retrieval.channel_capacity == 0 {
            return Err(Error::config(
                "channel_capacity must be at least 1",
                "retrieval.channel_capacity",
            ));
        }

        Ok(())
    }
}

/// Canonical form of a source name used for lookups and session reuse
pub fn normalize_source_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// When to append the synthetic `id:<N` upper-bound tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdBoundPolicy {
    /// Never add the bound
    Never,
    /// Add the bound when the user supplied fewer than this many tags
    WhenFewerThan(usize),
    /// Always add the bound
    Always,
}

impl Default for IdBoundPolicy {
    fn default() -> Self {
        IdBoundPolicy::WhenFewerThan(2)
    }
}

/// One remote booru-style catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name, e.g. "danbooru"
    pub name: String,

    /// Base URL of the API, e.g. "https://danbooru.donmai.us"
    pub base_url: String,

    /// Listing endpoint path (default: "/posts.json")
    #[serde(default = "default_listing_path")]
    pub listing_path: String,

    /// Query parameter carrying the page number (default: "page")
    #[serde(default = "default_page_param")]
    pub page_param: String,

    /// Query parameter carrying the page size (default: "limit")
    #[serde(default = "default_limit_param")]
    pub limit_param: String,

    /// Index of the first page (default: 1)
    #[serde(default = "default_first_page")]
    pub first_page: u32,

    /// Items requested per page (default: 200)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Hard ceiling on pages walked per query (default: 1000)
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Extra fixed query parameters sent with every listing request
    #[serde(default)]
    pub extra_params: Vec<(String, String)>,

    /// Every rating label of this source
    pub ratings: BTreeSet<String>,

    /// Ratings considered safe for restricted contexts
    pub safe_ratings: BTreeSet<String>,

    /// When to add the synthetic id upper bound
    #[serde(default)]
    pub id_bound: IdBoundPolicy,

    /// Sort tag appended when the query carries no `sort:` tag
    #[serde(default)]
    pub default_sort: Option<String>,

    /// URL of a JSON array of known ids; its maximum is the id upper bound
    #[serde(default)]
    pub max_id_url: Option<String>,

    /// Resource URL template, `{id}` is replaced by the resource id
    pub resource_url: String,

    /// Account name sent as the `login` parameter
    #[serde(default)]
    pub login: Option<String>,

    /// API key sent as the `api_key` parameter
    #[serde(default)]
    pub api_key: Option<String>,

    /// User agent for every request of this source
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl SourceConfig {
    /// Danbooru-compatible source
    ///
    /// Single-letter ratings, id bound only on near-empty queries, remote default order.
    pub fn danbooru() -> Self {
        Self {
            name: "danbooru".to_string(),
            base_url: "https://danbooru.donmai.us".to_string(),
            listing_path: default_listing_path(),
            page_param: default_page_param(),
            limit_param: default_limit_param(),
            first_page: default_first_page(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            extra_params: vec![("format".to_string(), "json".to_string())],
            ratings: labels(&["g", "s", "q", "e"]),
            safe_ratings: labels(&["g", "s"]),
            id_bound: IdBoundPolicy::WhenFewerThan(2),
            default_sort: None,
            max_id_url: Some(
                "https://huggingface.co/datasets/deepghs/danbooru_newest-webp-4Mpixel/resolve/main/exist_ids.json"
                    .to_string(),
            ),
            resource_url:
                "https://huggingface.co/datasets/deepghs/danbooru_newest-webp-4Mpixel/resolve/main/images/{id}.webp"
                    .to_string(),
            login: None,
            api_key: None,
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }

    /// Gelbooru-compatible source
    ///
    /// Long rating names, zero-based `pid` pages, always bounded and score-sorted.
    pub fn gelbooru() -> Self {
        Self {
            name: "gelbooru".to_string(),
            base_url: "https://gelbooru.com".to_string(),
            listing_path: "/index.php".to_string(),
            page_param: "pid".to_string(),
            limit_param: default_limit_param(),
            first_page: 0,
            page_size: 100,
            max_pages: default_max_pages(),
            extra_params: vec![
                ("page".to_string(), "dapi".to_string()),
                ("s".to_string(), "post".to_string()),
                ("q".to_string(), "index".to_string()),
                ("json".to_string(), "1".to_string()),
            ],
            ratings: labels(&["general", "sensitive", "questionable", "explicit"]),
            safe_ratings: labels(&["general", "sensitive"]),
            id_bound: IdBoundPolicy::Always,
            default_sort: Some("sort:score:desc".to_string()),
            max_id_url: Some(
                "https://huggingface.co/datasets/deepghs/gelbooru-webp-4Mpixel/resolve/main/exist_ids.json"
                    .to_string(),
            ),
            resource_url:
                "https://huggingface.co/datasets/deepghs/gelbooru-webp-4Mpixel/resolve/main/images/{id}.webp"
                    .to_string(),
            login: None,
            api_key: None,
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }

    /// Full listing endpoint URL
    pub fn listing_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.listing_path
        )
    }

    /// Resource URL for one id
    pub fn resource_url_for(&self, id: crate::types::ResourceId) -> String {
        self.resource_url.replace("{id}", &id.to_string())
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("source name must not be empty", "sources.name"));
        }
        if self.base_url.trim().is_empty() {
            return Err(Error::config(
                format!("source '{}' has an empty base_url", self.name),
                "sources.base_url",
            ));
        }
        if self.page_size == 0 {
            return Err(Error::config(
                format!("source '{}' has page_size 0", self.name),
                "sources.page_size",
            ));
        }
        if self.max_pages == 0 {
            return Err(Error::config(
                format!("source '{}' has max_pages 0", self.name),
                "sources.max_pages",
            ));
        }
        if !self.resource_url.contains("{id}") {
            return Err(Error::config(
                format!("source '{}' resource_url lacks an {{id}} placeholder", self.name),
                "sources.resource_url",
            ));
        }
        if self.ratings.is_empty() {
            return Err(Error::config(
                format!("source '{}' declares no ratings", self.name),
                "sources.ratings",
            ));
        }
        if let Some(unknown) = self.safe_ratings.difference(&self.ratings).next() {
            return Err(Error::config(
                format!(
                    "source '{}' lists safe rating '{}' outside its ratings",
                    self.name, unknown
                ),
                "sources.safe_ratings",
            ));
        }
        Ok(())
    }
}

fn labels(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// What the retrieval session does when one id fails to materialize
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip the id, count it and keep going (default)
    #[default]
    Skip,
    /// Surface the failure and end the session
    Abort,
}

/// Retrieval session settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Concurrent fetch workers per session (default: 4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Item-level failure handling
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Materialized items buffered ahead of the consumer (default: 16)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Parent directory for scratch space (system temp dir when unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            failure_policy: FailurePolicy::default(),
            channel_capacity: default_channel_capacity(),
            scratch_dir: None,
        }
    }
}

impl RetrievalConfig {
    /// Create a scoped scratch directory under the configured parent
    pub fn scratch(&self, prefix: &str) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match &self.scratch_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

/// Retry configuration for transient transport failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

fn default_listing_path() -> String {
    "/posts.json".to_string()
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_limit_param() -> String {
    "limit".to_string()
}

fn default_first_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    200
}

fn default_max_pages() -> u32 {
    1000
}

fn default_user_agent() -> String {
    concat!("booru-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_concurrency() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    16
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_source_json() -> &'static str {
        r#"{
            "name": "Local",
            "base_url": "http://localhost:9000",
            "ratings": ["g", "s", "q", "e"],
            "safe_ratings": ["g"],
            "resource_url": "http://localhost:9000/img/{id}"
        }"#
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert!(config.source("danbooru").is_some());
        assert!(config.source("  GelBooru ").is_some());
        assert!(config.source("e621").is_none());
    }

    #[test]
    fn source_defaults_are_applied() {
        let json = format!(r#"{{"sources": [{}]}}"#, minimal_source_json());
        let config = Config::from_json_str(&json).unwrap();
        let source = &config.sources[0];

        assert_eq!(source.listing_path, "/posts.json");
        assert_eq!(source.page_param, "page");
        assert_eq!(source.first_page, 1);
        assert_eq!(source.page_size, 200);
        assert_eq!(source.max_pages, 1000);
        assert_eq!(source.id_bound, IdBoundPolicy::WhenFewerThan(2));
        assert_eq!(source.default_sort, None);
        assert_eq!(source.timeout, Duration::from_secs(30));
        assert_eq!(config.retrieval.concurrency, 4);
        assert_eq!(config.retrieval.failure_policy, FailurePolicy::Skip);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn id_bound_policy_serde_forms() {
        let always: IdBoundPolicy = serde_json::from_str(r#""always""#).unwrap();
        assert_eq!(always, IdBoundPolicy::Always);
        let fewer: IdBoundPolicy = serde_json::from_str(r#"{"when_fewer_than": 3}"#).unwrap();
        assert_eq!(fewer, IdBoundPolicy::WhenFewerThan(3));
    }

    #[test]
    fn rejects_empty_sources() {
        let err = Config::from_json_str(r#"{"sources": []}"#).unwrap_err();
        assert_eq!(err.error_code(), "config_error");
    }

    #[test]
    fn rejects_duplicate_source_names() {
        let mut config = Config::default();
        let mut dup = SourceConfig::danbooru();
        dup.name = " DANBOORU".to_string();
        config.sources.push(dup);
        match config.validate().unwrap_err() {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("sources.name")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_source_fields() {
        let cases: Vec<(Box<dyn Fn(&mut SourceConfig)>, &str)> = vec![
            (Box::new(|s: &mut SourceConfig| s.base_url.clear()), "sources.base_url"),
            (Box::new(|s: &mut SourceConfig| s.page_size = 0), "sources.page_size"),
            (Box::new(|s: &mut SourceConfig| s.max_pages = 0), "sources.max_pages"),
            (
                Box::new(|s: &mut SourceConfig| s.resource_url = "http://x/img.webp".into()),
                "sources.resource_url",
            ),
            (Box::new(|s: &mut SourceConfig| s.ratings.clear()), "sources.ratings"),
            (
                Box::new(|s: &mut SourceConfig| {
                    s.safe_ratings.insert("x".into());
                }),
                "sources.safe_ratings",
            ),
        ];

        for (mutate, expected_key) in cases {
            let mut config = Config::default();
            mutate(&mut config.sources[0]);
            match config.validate().unwrap_err() {
                Error::Config { key, .. } => assert_eq!(key.as_deref(), Some(expected_key)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = Config::default();
        config.retrieval.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn url_helpers() {
        let mut source = SourceConfig::danbooru();
        source.base_url = "http://localhost:1234/".to_string();
        assert_eq!(source.listing_url(), "http://localhost:1234/posts.json");
        source.resource_url = "http://cdn/{id}/{id}.webp".to_string();
        assert_eq!(
            source.resource_url_for(crate::types::ResourceId(5)),
            "http://cdn/5/5.webp"
        );
    }

    #[test]
    fn scratch_dir_respects_parent() {
        let parent = tempfile::TempDir::new().unwrap();
        let retrieval = RetrievalConfig {
            scratch_dir: Some(parent.path().join("nested")),
            ..Default::default()
        };
        let scratch = retrieval.scratch("test-").unwrap();
        assert!(scratch.path().starts_with(parent.path().join("nested")));
        assert!(scratch.path().is_dir());
    }

    #[test]
    fn duration_round_trip_as_seconds() {
        let retry = RetryConfig::default();
        let json = serde_json::to_value(&retry).unwrap();
        assert_eq!(json["initial_delay"], 1);
        assert_eq!(json["max_delay"], 30);
    }
}

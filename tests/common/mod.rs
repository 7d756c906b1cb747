//! Fake booru server and pipeline builders for integration tests

#![allow(dead_code)]

use booru_dl::{Booru, Config, IdBoundPolicy, RetrievalConfig, RetryConfig, SourceConfig};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Source name used by every test
pub const SOURCE: &str = "fakebooru";

/// Page size of the fake listing
pub const PAGE_SIZE: u32 = 3;

/// One post in a fake listing page
pub fn post(id: u64, rating: &str) -> Value {
    json!({ "id": id, "rating": rating, "parent_id": null })
}

/// A post that is a child of another post
pub fn child_post(id: u64, parent: u64) -> Value {
    json!({ "id": id, "rating": "g", "parent_id": parent })
}

/// Deterministic image body for an id
pub fn image_bytes(id: u64, size: usize) -> Vec<u8> {
    (0..size).map(|i| ((id as usize + i) % 251) as u8).collect()
}

/// Wiremock-backed fake booru
pub struct FakeBooru {
    /// Underlying mock server
    pub server: MockServer,
}

impl FakeBooru {
    /// Start an empty fake booru; unknown pages answer with an empty list
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .with_priority(10)
            .mount(&server)
            .await;
        Self { server }
    }

    /// Serve `posts` as listing page `page`
    pub async fn page(&self, page: u32, posts: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/posts.json"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(posts)))
            .mount(&self.server)
            .await;
    }

    /// Serve an image of `size` bytes for `id`
    pub async fn image(&self, id: u64, size: usize) {
        Mock::given(method("GET"))
            .and(path(format!("/images/{id}.webp")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/webp")
                    .set_body_bytes(image_bytes(id, size)),
            )
            .mount(&self.server)
            .await;
    }

    /// Source profile pointing at this server
    pub fn source(&self) -> SourceConfig {
        let uri = self.server.uri();
        SourceConfig {
            name: SOURCE.to_string(),
            base_url: uri.clone(),
            page_size: PAGE_SIZE,
            max_pages: 20,
            extra_params: Vec::new(),
            id_bound: IdBoundPolicy::Never,
            default_sort: None,
            max_id_url: Some(format!("{uri}/exist_ids.json")),
            resource_url: format!("{uri}/images/{{id}}.webp"),
            ..SourceConfig::danbooru()
        }
    }
}

/// Configuration with a single source, no retries and scratch under `scratch`
pub fn config_for(source: SourceConfig, scratch: &TempDir) -> Config {
    Config {
        sources: vec![source],
        retrieval: RetrievalConfig {
            concurrency: 3,
            scratch_dir: Some(scratch.path().to_path_buf()),
            ..RetrievalConfig::default()
        },
        retry: RetryConfig::none(),
    }
}

/// Pipeline over `fake` with its default source profile
pub fn booru(fake: &FakeBooru, scratch: &TempDir) -> Booru {
    Booru::new(config_for(fake.source(), scratch)).expect("valid test config")
}

/// Tag list from string slices
pub fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

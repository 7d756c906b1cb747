//! HTTP session provider
//!
//! Every source gets one [`reqwest::Client`], built on first use and shared by
//! the enumerator and all fetch workers afterwards. `reqwest::Client` is an
//! `Arc` around a connection pool, so clones are cheap and safe to use from
//! concurrent tasks.

use crate::config::{SourceConfig, normalize_source_name};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Supplies an authenticated HTTP client for a source
pub trait SessionProvider: Send + Sync {
    /// Client to use for every request against `source`
    fn client(&self, source: &SourceConfig) -> Result<reqwest::Client>;
}

/// Lazily built clients keyed by normalized source name
#[derive(Default)]
pub struct SessionPool {
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl SessionPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients built so far
    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// True if no client has been built yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build(source: &SourceConfig) -> Result<reqwest::Client> {
        tracing::debug!(source = %source.name, "building HTTP client");
        let client = reqwest::Client::builder()
            .user_agent(source.user_agent.clone())
            .timeout(source.timeout)
            .build()?;
        Ok(client)
    }
}

impl SessionProvider for SessionPool {
    fn client(&self, source: &SourceConfig) -> Result<reqwest::Client> {
        let key = normalize_source_name(&source.name);
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = Self::build(source)?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

/// Credential query parameters for a source, if it has any
pub fn credential_params(source: &SourceConfig) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if let Some(login) = &source.login {
        params.push(("login".to_string(), login.clone()));
    }
    if let Some(api_key) = &source.api_key {
        params.push(("api_key".to_string(), api_key.clone()));
    }
    params
}

/// Send a GET and turn any non-success status into [`Error::HttpStatus`]
pub async fn get_checked(
    client: &reqwest::Client,
    url: &str,
    query: &[(String, String)],
) -> Result<reqwest::Response> {
    let response = client.get(url).query(query).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

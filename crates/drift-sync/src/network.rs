//! # Network Adapter
//!
//! The HTTP contract the engine pushes through and pulls from, plus the
//! bundled reqwest implementation.
//!
//! ## Contract Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Network Adapter Seam                             │
//! │                                                                         │
//! │  SyncEngine                                                             │
//! │    push: POST endpoint, JSON entity ──► status code consumed only      │
//! │    pull: GET endpoint ──► JSON array of entity objects                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              NetworkAdapter (trait)                             │   │
//! │  │  get · post · put · patch · delete · is_online ·               │   │
//! │  │  connectivity_stream · test_connection                          │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 ▼                                       │
//! │  HttpNetworkAdapter (reqwest) - base URL + headers + timeout,          │
//! │  watch-channel connectivity that coalesces duplicate states            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! HTTP responses come back as `Ok(AdapterResponse)` for every status code;
//! only transport-level failures (cannot connect, timed out) are errors.
//! The engine consumes the status code and decides row state from it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value as Json;
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Adapter Response
// =============================================================================

/// What the remote answered: status code plus parsed JSON body (if any).
#[derive(Debug, Clone)]
pub struct AdapterResponse {
    pub status_code: u16,
    pub data: Option<Json>,
}

impl AdapterResponse {
    pub fn new(status_code: u16, data: Option<Json>) -> Self {
        AdapterResponse { status_code, data }
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Converts a non-2xx response into the matching error kind.
    pub fn error_for_status(&self) -> SyncResult<&Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SyncError::from_status(
                self.status_code,
                format!("HTTP {}", self.status_code),
            ))
        }
    }
}

// =============================================================================
// Adapter Contract
// =============================================================================

/// HTTP + connectivity contract consumed by the engine.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    async fn get(&self, path: &str) -> SyncResult<AdapterResponse>;

    async fn post(&self, path: &str, body: &Json) -> SyncResult<AdapterResponse>;

    async fn put(&self, path: &str, body: &Json) -> SyncResult<AdapterResponse>;

    async fn patch(&self, path: &str, body: &Json) -> SyncResult<AdapterResponse>;

    async fn delete(&self, path: &str) -> SyncResult<AdapterResponse>;

    /// Last observed connectivity state.
    fn is_online(&self) -> bool;

    /// Stream of connectivity transitions. Duplicate states are coalesced;
    /// a fresh receiver observes the current state immediately.
    fn connectivity_stream(&self) -> watch::Receiver<bool>;

    /// Probes reachability (the base URL, or `url` when given) and updates
    /// the connectivity state with the outcome.
    async fn test_connection(&self, url: Option<&str>) -> bool;
}

// =============================================================================
// Adapter Configuration
// =============================================================================

/// Configuration for the bundled HTTP adapter.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base URL every relative path is joined to.
    pub base_url: String,

    /// Headers attached to every request.
    pub default_headers: Vec<(String, String)>,

    /// Timeout applied to connect, send, and receive.
    pub timeout: Duration,
}

impl NetworkConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        NetworkConfig {
            base_url: base_url.into(),
            default_headers: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Adds a default header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// =============================================================================
// HTTP Adapter
// =============================================================================

/// Bundled `NetworkAdapter` over reqwest.
///
/// Connectivity is a `watch` channel: `set_online` only notifies on actual
/// transitions, and the engine's listener sees the current state on
/// subscribe. The adapter starts offline until a probe succeeds.
pub struct HttpNetworkAdapter {
    client: reqwest::Client,
    base_url: Url,
    online_tx: watch::Sender<bool>,
}

impl HttpNetworkAdapter {
    /// Builds the adapter: validates the base URL, assembles default
    /// headers, and configures the client timeout.
    pub fn new(config: NetworkConfig) -> SyncResult<Self> {
        let base_url = Url::parse(&config.base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.default_headers {
            let name = name
                .parse::<HeaderName>()
                .map_err(|e| SyncError::InvalidConfig(format!("bad header name: {}", e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SyncError::InvalidConfig(format!("bad header value: {}", e)))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        let (online_tx, _) = watch::channel(false);

        Ok(HttpNetworkAdapter {
            client,
            base_url,
            online_tx,
        })
    }

    /// Records a connectivity observation; duplicate states do not notify.
    pub fn set_online(&self, online: bool) {
        self.online_tx.send_if_modified(|state| {
            if *state != online {
                *state = online;
                true
            } else {
                false
            }
        });
    }

    fn join(&self, path: &str) -> SyncResult<Url> {
        // join("/todos") relative to https://host/api -> https://host/todos,
        // so splice absolute-looking paths onto the base path instead
        if let Some(stripped) = path.strip_prefix('/') {
            let mut url = self.base_url.clone();
            let base_path = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{}/{}", base_path, stripped));
            Ok(url)
        } else {
            Ok(self.base_url.join(path)?)
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> SyncResult<AdapterResponse> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let data = response.json::<Json>().await.ok();
        debug!(status = status, "Remote responded");
        Ok(AdapterResponse::new(status, data))
    }
}

#[async_trait]
impl NetworkAdapter for HttpNetworkAdapter {
    async fn get(&self, path: &str) -> SyncResult<AdapterResponse> {
        self.execute(self.client.get(self.join(path)?)).await
    }

    async fn post(&self, path: &str, body: &Json) -> SyncResult<AdapterResponse> {
        self.execute(self.client.post(self.join(path)?).json(body))
            .await
    }

    async fn put(&self, path: &str, body: &Json) -> SyncResult<AdapterResponse> {
        self.execute(self.client.put(self.join(path)?).json(body))
            .await
    }

    async fn patch(&self, path: &str, body: &Json) -> SyncResult<AdapterResponse> {
        self.execute(self.client.patch(self.join(path)?).json(body))
            .await
    }

    async fn delete(&self, path: &str) -> SyncResult<AdapterResponse> {
        self.execute(self.client.delete(self.join(path)?)).await
    }

    fn is_online(&self) -> bool {
        *self.online_tx.borrow()
    }

    fn connectivity_stream(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }

    async fn test_connection(&self, url: Option<&str>) -> bool {
        let target = match url {
            Some(u) => match Url::parse(u) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(url = %u, error = %e, "Bad probe URL");
                    return false;
                }
            },
            None => self.base_url.clone(),
        };

        let reachable = match self.client.get(target).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        };

        self.set_online(reachable);
        reachable
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> HttpNetworkAdapter {
        HttpNetworkAdapter::new(
            NetworkConfig::new("https://api.example")
                .header("Authorization", "Bearer token")
                .timeout(Duration::from_secs(5)),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(HttpNetworkAdapter::new(NetworkConfig::new("not a url")).is_err());
    }

    #[test]
    fn test_join_keeps_base_path() {
        let adapter = HttpNetworkAdapter::new(NetworkConfig::new("https://host/api")).unwrap();
        assert_eq!(
            adapter.join("/todos").unwrap().as_str(),
            "https://host/api/todos"
        );
        assert_eq!(
            adapter.join("todos").unwrap().as_str(),
            "https://host/todos"
        );
    }

    #[test]
    fn test_starts_offline_and_coalesces() {
        let adapter = adapter();
        assert!(!adapter.is_online());

        let mut rx = adapter.connectivity_stream();
        assert!(!*rx.borrow_and_update());

        adapter.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());

        // same state again: no notification
        adapter.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_response_success_ranges() {
        assert!(AdapterResponse::new(200, None).is_success());
        assert!(AdapterResponse::new(201, None).is_success());
        assert!(!AdapterResponse::new(304, None).is_success());
        assert!(!AdapterResponse::new(500, None).is_success());
    }

    #[test]
    fn test_error_for_status_maps_kinds() {
        assert!(matches!(
            AdapterResponse::new(401, None).error_for_status(),
            Err(SyncError::Auth(_))
        ));
        assert!(AdapterResponse::new(204, None).error_for_status().is_ok());
    }
}

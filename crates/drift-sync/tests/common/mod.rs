//! Shared fixtures for the end-to-end sync scenarios: a concrete syncable
//! entity and a scripted network adapter.

// not every test binary touches every fixture
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::watch;

use drift_db::EntityFactory;
use drift_sync::{
    AdapterResponse, JsonMap, NetworkAdapter, SyncEntity, SyncResult,
};

/// Wires test logs to `RUST_LOG`; repeated calls are fine.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Test Entity
// =============================================================================

/// The classic syncable to-do item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub done: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default = "one")]
    pub version: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub metadata: JsonMap,
}

fn one() -> i64 {
    1
}

pub fn ms(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

impl TodoItem {
    pub fn new(id: &str, title: &str, updated_at_ms: i64) -> Self {
        TodoItem {
            id: id.to_string(),
            title: title.to_string(),
            done: false,
            created_at: ms(updated_at_ms),
            updated_at: ms(updated_at_ms),
            synced_at: None,
            version: 1,
            is_deleted: false,
            metadata: JsonMap::new(),
        }
    }

    pub fn with_synced_at(mut self, millis: i64) -> Self {
        self.synced_at = Some(ms(millis));
        self
    }
}

impl SyncEntity for TodoItem {
    fn table_name(&self) -> &str {
        "todos"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn metadata(&self) -> JsonMap {
        self.metadata.clone()
    }

    fn to_json(&self) -> JsonMap {
        match serde_json::to_value(self) {
            Ok(Json::Object(map)) => map,
            _ => JsonMap::new(),
        }
    }

    fn boxed_clone(&self) -> Box<dyn SyncEntity> {
        Box::new(self.clone())
    }
}

/// Factory registered for the `todos` table.
pub fn todo_factory() -> EntityFactory {
    Arc::new(|map: JsonMap| {
        let todo: TodoItem = serde_json::from_value(Json::Object(map))
            .map_err(|e| drift_core::CoreError::Validation(e.to_string()))?;
        Ok(Box::new(todo) as Box<dyn SyncEntity>)
    })
}

/// Builds the wire JSON for a remote todo, the way the server renders it.
pub fn remote_todo(id: &str, title: &str, updated_at_ms: i64, version: i64) -> Json {
    serde_json::json!({
        "id": id,
        "title": title,
        "done": false,
        "created_at": 0,
        "updated_at": updated_at_ms,
        "version": version,
        "is_deleted": false,
        "metadata": {},
    })
}

// =============================================================================
// Scripted Network Adapter
// =============================================================================

/// One request the adapter saw.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub body: Option<Json>,
}

/// Mock adapter with scripted responses and full request recording.
///
/// POSTs answer 201 unless overridden per endpoint; GETs answer 200 with
/// an empty array unless overridden. Connectivity is a watch channel
/// flipped by the test.
pub struct MockAdapter {
    online_tx: watch::Sender<bool>,
    requests: Mutex<Vec<RecordedRequest>>,
    post_status: Mutex<HashMap<String, u16>>,
    get_responses: Mutex<HashMap<String, AdapterResponse>>,
}

impl MockAdapter {
    pub fn new(online: bool) -> Arc<Self> {
        let (online_tx, _) = watch::channel(online);
        Arc::new(MockAdapter {
            online_tx,
            requests: Mutex::new(Vec::new()),
            post_status: Mutex::new(HashMap::new()),
            get_responses: Mutex::new(HashMap::new()),
        })
    }

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

    /// Scripts the status code every POST to `path` receives.
    pub fn respond_to_post(&self, path: &str, status_code: u16) {
        self.post_status
            .lock()
            .unwrap()
            .insert(path.to_string(), status_code);
    }

    /// Scripts a 200 GET response carrying `data`.
    pub fn respond_to_get(&self, path: &str, data: Json) {
        self.get_responses
            .lock()
            .unwrap()
            .insert(path.to_string(), AdapterResponse::new(200, Some(data)));
    }

    /// Scripts a failing GET.
    pub fn fail_get(&self, path: &str, status_code: u16) {
        self.get_responses
            .lock()
            .unwrap()
            .insert(path.to_string(), AdapterResponse::new(status_code, None));
    }

    /// Every recorded request.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Bodies of recorded POSTs to `path`.
    pub fn posts_to(&self, path: &str) -> Vec<Json> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == "POST" && r.path == path)
            .filter_map(|r| r.body.clone())
            .collect()
    }

    fn record(&self, method: &'static str, path: &str, body: Option<&Json>) {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });
    }
}

#[async_trait]
impl NetworkAdapter for MockAdapter {
    async fn get(&self, path: &str) -> SyncResult<AdapterResponse> {
        self.record("GET", path, None);
        Ok(self
            .get_responses
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| AdapterResponse::new(200, Some(Json::Array(vec![])))))
    }

    async fn post(&self, path: &str, body: &Json) -> SyncResult<AdapterResponse> {
        self.record("POST", path, Some(body));
        let status = self
            .post_status
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(201);
        Ok(AdapterResponse::new(status, None))
    }

    async fn put(&self, path: &str, body: &Json) -> SyncResult<AdapterResponse> {
        self.record("PUT", path, Some(body));
        Ok(AdapterResponse::new(200, None))
    }

    async fn patch(&self, path: &str, body: &Json) -> SyncResult<AdapterResponse> {
        self.record("PATCH", path, Some(body));
        Ok(AdapterResponse::new(200, None))
    }

    async fn delete(&self, path: &str) -> SyncResult<AdapterResponse> {
        self.record("DELETE", path, None);
        Ok(AdapterResponse::new(200, None))
    }

    fn is_online(&self) -> bool {
        *self.online_tx.borrow()
    }

    fn connectivity_stream(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }

    async fn test_connection(&self, _url: Option<&str>) -> bool {
        self.is_online()
    }
}

//! End-to-end tests for the queue → drain → reconcile pipeline
//!
//! These tests drive a real `Client` against in-memory and file-backed
//! stores, with a mock transport standing in for the ingest service.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use batchq_core::{
    migrate, Client, ClientConfig, Error, EventStore, FileEventStore, Handle, HttpTransport,
    MemoryEventStore, Project, Request, Response, Result,
};

#[derive(Debug, Clone)]
struct RecordedRequest {
    url: String,
    body: Value,
}

impl RecordedRequest {
    fn events(&self) -> &[Value] {
        self.body["events"].as_array().expect("body has events")
    }
}

enum Mode {
    /// Acknowledge every event in every request
    AcceptAll,
    /// Fail every request at the network level
    NetworkFailure,
    /// Pop scripted responses in order
    Scripted(Mutex<VecDeque<Response>>),
}

struct MockTransport {
    mode: Mode,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    fn accept_all() -> Arc<Self> {
        Arc::new(Self {
            mode: Mode::AcceptAll,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn network_failure() -> Arc<Self> {
        Arc::new(Self {
            mode: Mode::NetworkFailure,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn scripted(responses: Vec<Response>) -> Arc<Self> {
        Arc::new(Self {
            mode: Mode::Scripted(Mutex::new(responses.into())),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        let body: Value = serde_json::from_str(&request.body).expect("request body is JSON");
        self.requests.lock().unwrap().push(RecordedRequest {
            url: request.url,
            body: body.clone(),
        });

        match &self.mode {
            Mode::AcceptAll => {
                let count = body["events"].as_array().map(Vec::len).unwrap_or(0);
                let receipts: Vec<Value> = (0..count).map(|_| json!({"success": true})).collect();
                Ok(Response {
                    status: 200,
                    body: json!({ "receipts": receipts }).to_string(),
                })
            }
            Mode::NetworkFailure => Err(Error::Network("connection refused".to_string())),
            Mode::Scripted(script) => Ok(script
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted responses exhausted")),
        }
    }
}

/// Config with a negligible backoff so retry tests run fast.
fn fast_config() -> ClientConfig {
    ClientConfig {
        base_url: Some("https://ingest.example.com".to_string()),
        upload_retry_interval_coefficient: 0.001,
        ..Default::default()
    }
}

fn client(
    store: Arc<dyn EventStore>,
    transport: Arc<MockTransport>,
    config: ClientConfig,
) -> Client {
    let project = Project::new("project1", Some("wk_test".to_string())).unwrap();
    Client::new(config, store, transport)
        .unwrap()
        .with_default_project(project)
}

fn queued_count(store: &dyn EventStore) -> usize {
    store
        .handles("project1", 10_000)
        .unwrap()
        .values()
        .map(Vec::len)
        .sum()
}

#[tokio::test]
async fn queue_then_drain_uploads_and_clears() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::accept_all();
    let client = client(store.clone(), transport.clone(), fast_config());

    for i in 0..3 {
        client
            .queue_event(None, "mydb.logs", &json!({ "i": i }))
            .unwrap();
    }
    client.send_queued_events(None).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://ingest.example.com/mydb/logs");
    assert_eq!(requests[0].events().len(), 3);
    assert_eq!(queued_count(store.as_ref()), 0);
}

#[tokio::test]
async fn drain_chunks_large_collections_in_order() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::accept_all();
    let config = ClientConfig {
        max_upload_events_at_once: 3,
        ..fast_config()
    };
    let client = client(store.clone(), transport.clone(), config);

    for i in 0..7 {
        client
            .queue_event(None, "mydb.logs", &json!({ "i": i }))
            .unwrap();
    }
    client.send_queued_events(None).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].events().len(), 3);
    assert_eq!(requests[1].events().len(), 3);
    assert_eq!(requests[2].events().len(), 1);

    // Ascending insertion order end to end
    let uploaded: Vec<i64> = requests
        .iter()
        .flat_map(|r| r.events().iter().map(|e| e["i"].as_i64().unwrap()))
        .collect();
    assert_eq!(uploaded, vec![0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(queued_count(store.as_ref()), 0);
}

#[tokio::test]
async fn drain_sends_one_collection_per_request() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::accept_all();
    let client = client(store.clone(), transport.clone(), fast_config());

    client.queue_event(None, "db.alpha", &json!({"a": 1})).unwrap();
    client.queue_event(None, "db.alpha", &json!({"a": 2})).unwrap();
    client.queue_event(None, "db.beta", &json!({"b": 1})).unwrap();

    client.send_queued_events(None).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, "https://ingest.example.com/db/alpha");
    assert_eq!(requests[0].events().len(), 2);
    assert_eq!(requests[1].url, "https://ingest.example.com/db/beta");
    assert_eq!(requests[1].events().len(), 1);
}

#[tokio::test]
async fn permanent_rejection_is_deleted_without_retry() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::scripted(vec![Response {
        status: 200,
        body: json!({
            "receipts": [
                { "success": true },
                { "success": false,
                  "error": { "name": "InvalidPropertyValueError", "description": "bad value" } }
            ]
        })
        .to_string(),
    }]);
    let client = client(store.clone(), transport.clone(), fast_config());

    client.queue_event(None, "db.t", &json!({"ok": 1})).unwrap();
    client.queue_event(None, "db.t", &json!({"bad": 2})).unwrap();

    client.send_queued_events(None).await.unwrap();

    // Both handles removed, and with nothing left there is no retry
    assert_eq!(transport.request_count(), 1);
    assert_eq!(queued_count(store.as_ref()), 0);
}

#[tokio::test]
async fn network_failure_retries_the_full_budget() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::network_failure();
    let config = ClientConfig {
        upload_retry_count: 3,
        ..fast_config()
    };
    let client = client(store.clone(), transport.clone(), config);

    client.queue_event(None, "db.t", &json!({"a": 1})).unwrap();
    client.send_queued_events(None).await.unwrap();

    // Three total attempts (first try plus two retries), event still queued
    assert_eq!(transport.request_count(), 3);
    assert_eq!(queued_count(store.as_ref()), 1);
}

#[tokio::test]
async fn retry_can_be_disabled() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::network_failure();
    let config = ClientConfig {
        enable_retry_uploading: false,
        ..fast_config()
    };
    let client = client(store.clone(), transport.clone(), config);

    client.queue_event(None, "db.t", &json!({"a": 1})).unwrap();
    client.send_queued_events(None).await.unwrap();

    assert_eq!(transport.request_count(), 1);
    assert_eq!(queued_count(store.as_ref()), 1);
}

#[tokio::test]
async fn transient_rejection_is_retried_until_accepted() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::scripted(vec![
        Response {
            status: 200,
            body: json!({
                "receipts": [
                    { "success": false,
                      "error": { "name": "InternalServerError", "description": "try later" } }
                ]
            })
            .to_string(),
        },
        Response {
            status: 200,
            body: json!({ "receipts": [ { "success": true } ] }).to_string(),
        },
    ]);
    let client = client(store.clone(), transport.clone(), fast_config());

    client.queue_event(None, "db.t", &json!({"a": 1})).unwrap();
    client.send_queued_events(None).await.unwrap();

    assert_eq!(transport.request_count(), 2);
    assert_eq!(queued_count(store.as_ref()), 0);
}

#[tokio::test]
async fn server_error_propagates_in_debug_mode() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::scripted(vec![Response {
        status: 500,
        body: "oops".to_string(),
    }]);
    let config = ClientConfig {
        debug: true,
        ..fast_config()
    };
    let client = client(store.clone(), transport.clone(), config);

    client.queue_event(None, "db.t", &json!({"a": 1})).unwrap();
    let result = client.send_queued_events(None).await;

    assert!(matches!(result, Err(Error::Server { status: 500, .. })));
    assert_eq!(queued_count(store.as_ref()), 1);
}

#[tokio::test]
async fn corrupted_stored_event_is_dropped_before_upload() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::accept_all();
    let client = client(store.clone(), transport.clone(), fast_config());

    // Bypass validation to plant a corrupted entry next to a good one
    store.store("project1", "db.t", "not json at all").unwrap();
    client.queue_event(None, "db.t", &json!({"a": 1})).unwrap();

    client.send_queued_events(None).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].events(), [json!({"a": 1})]);
    assert_eq!(queued_count(store.as_ref()), 0);
}

#[tokio::test]
async fn file_store_drain_end_to_end() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(FileEventStore::new(root.path()).unwrap());
    let transport = MockTransport::accept_all();
    let client = client(store.clone(), transport.clone(), fast_config());

    client.queue_event(None, "db.t", &json!({"a": 1})).unwrap();
    client.queue_event(None, "db.t", &json!({"a": 2})).unwrap();
    assert_eq!(queued_count(store.as_ref()), 2);

    client.send_queued_events(None).await.unwrap();

    assert_eq!(transport.request_count(), 1);
    assert_eq!(queued_count(store.as_ref()), 0);
}

#[tokio::test]
async fn legacy_events_are_migrated_on_first_drain() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::accept_all();
    let client = client(store.clone(), transport.clone(), fast_config());

    store
        .store(
            "project1",
            "db.t",
            r##"{"keen":{"timestamp":"t"},"#UUID":"u-1","#SSUT":true,"price":5}"##,
        )
        .unwrap();

    client.send_queued_events(None).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].events(), [json!({"price": 5, "uuid": "u-1"})]);
    assert_eq!(queued_count(store.as_ref()), 0);
}

#[tokio::test]
async fn migration_does_not_run_on_later_drains() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::accept_all();
    let client = client(store.clone(), transport.clone(), fast_config());

    // First drain flips the migration flag
    client.send_queued_events(None).await.unwrap();

    // A legacy-shaped event queued afterwards is uploaded untouched
    store
        .store("project1", "db.t", r##"{"#SSUT":true,"price":2}"##)
        .unwrap();
    client.send_queued_events(None).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].events(), [json!({"#SSUT": true, "price": 2})]);
}

/// Store whose enumeration always fails, for exercising the
/// never-retry-migration policy.
struct FailingStore {
    inner: MemoryEventStore,
}

impl EventStore for FailingStore {
    fn store(&self, project_id: &str, collection: &str, event: &str) -> Result<Handle> {
        self.inner.store(project_id, collection, event)
    }
    fn get(&self, handle: &Handle) -> Result<Option<String>> {
        self.inner.get(handle)
    }
    fn remove(&self, handle: &Handle) -> Result<()> {
        self.inner.remove(handle)
    }
    fn handles(&self, _project_id: &str, _limit: usize) -> Result<batchq_core::store::HandleMap> {
        Err(Error::Storage("enumeration failed".to_string()))
    }
    fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_preference(key, value)
    }
    fn preference(&self, key: &str, default: &str) -> Result<String> {
        self.inner.preference(key, default)
    }
}

#[test]
fn migration_is_never_retried_even_after_failure() {
    let store = FailingStore {
        inner: MemoryEventStore::new(),
    };

    // First attempt fails mid-migration, but the flag was already set
    assert!(migrate::run_if_needed(&store, "project1").is_err());
    assert_eq!(
        store.preference(migrate::MIGRATION_FLAG, "false").unwrap(),
        "true"
    );

    // Second call is a no-op
    assert!(!migrate::run_if_needed(&store, "project1").unwrap());
}

#[tokio::test]
async fn async_drain_reports_exactly_one_completion() {
    let store = Arc::new(MemoryEventStore::new());
    let transport = MockTransport::accept_all();
    let client = Arc::new(client(store.clone(), transport.clone(), fast_config()));

    client.queue_event(None, "db.t", &json!({"a": 1})).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let handle = client.send_queued_events_async(None, move |result| {
        tx.send(result.is_ok()).unwrap();
    });
    handle.await.unwrap();

    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![true]);
    assert_eq!(queued_count(store.as_ref()), 0);
}

//! Client surface: queueing events and the drain-and-retry publish pipeline
//!
//! Producers hand events to [`Client::queue_event`], which validates and
//! durably stores them. A later call to [`Client::send_queued_events`] drains
//! the store for one project: handles are enumerated per collection, chunked
//! to the upload size limit, uploaded one chunk per request, reconciled
//! against the per-event receipts, and retried with exponential backoff
//! while events remain and the retry budget lasts.
//!
//! A drain for a given project never runs concurrently with another drain
//! for the same project; it performs a destructive read-then-delete sequence
//! against the shared store. Drains for different projects are independent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event;
use crate::migrate;
use crate::project::Project;
use crate::reconcile;
use crate::store::{EventStore, Handle};
use crate::transport::{HttpTransport, Method, Request};

/// Upper bound on handles enumerated per drain pass.
const DRAIN_ENUMERATION_LIMIT: usize = 10_000;

/// Client-side event buffering and delivery pipeline.
pub struct Client {
    config: ClientConfig,
    store: Arc<dyn EventStore>,
    transport: Arc<dyn HttpTransport>,
    default_project: Option<Project>,
    active: AtomicBool,
    /// One drain lock per project id (single-flight per project)
    drain_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Client {
    /// Create a client from a validated configuration, a durable store, and
    /// a transport.
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn EventStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            transport,
            default_project: None,
            active: AtomicBool::new(true),
            drain_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Set the project used when operations are called without one.
    pub fn with_default_project(mut self, project: Project) -> Self {
        self.default_project = Some(project);
        self
    }

    /// Whether the client is usable. A client is marked inactive when its
    /// environment failed to initialize; operations on an inactive client
    /// fail with [`Error::Inactive`] without touching the store.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the client active or inactive.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
        tracing::info!(active, "client active state changed");
    }

    /// The client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn resolve_project<'a>(&'a self, project: Option<&'a Project>) -> Result<&'a Project> {
        project.or(self.default_project.as_ref()).ok_or_else(|| {
            Error::Config("no project specified and no default project configured".to_string())
        })
    }

    /// Validate and durably queue one event for later publishing.
    ///
    /// The event is serialized and stored; it stays queued until a drain
    /// cycle uploads it and the server acknowledges it.
    pub fn queue_event(
        &self,
        project: Option<&Project>,
        collection: &str,
        event: &Value,
    ) -> Result<Handle> {
        if !self.is_active() {
            return Err(Error::Inactive);
        }
        let project = self.resolve_project(project)?;

        event::validate_collection_name(collection)?;
        event::validate_event(event)?;

        let serialized = serde_json::to_string(event)?;
        let handle = self
            .store
            .store(project.project_id(), collection, &serialized)?;
        tracing::debug!(
            project_id = project.project_id(),
            collection,
            "queued event"
        );
        Ok(handle)
    }

    /// Drain all queued events for the project, retrying with exponential
    /// backoff until the queue is empty or the retry budget is exhausted.
    ///
    /// Exactly one drain per project runs at a time; a second caller blocks
    /// until the first finishes. Per-chunk upload failures are logged and
    /// the drain continues (unless `debug` is set, in which case they
    /// propagate immediately); storage failures abort the drain.
    pub async fn send_queued_events(&self, project: Option<&Project>) -> Result<()> {
        if !self.is_active() {
            return Err(Error::Inactive);
        }
        let project = self.resolve_project(project)?.clone();
        let project_id = project.project_id().to_string();

        let drain_lock = self.drain_lock(&project_id);
        let _guard = drain_lock.lock().await;

        // Best effort: a failed migration is logged and never retried
        if let Err(e) = migrate::run_if_needed(self.store.as_ref(), &project_id) {
            tracing::warn!(error = %e, "legacy cache migration failed");
        }

        let mut retry_counter: u32 = 0;
        loop {
            let handle_map = self.store.handles(&project_id, DRAIN_ENUMERATION_LIMIT)?;
            for (collection, handles) in handle_map {
                for chunk in handles.chunks(self.config.max_upload_events_at_once) {
                    let (events, live_handles) = self.materialize(chunk)?;
                    if events.is_empty() {
                        continue;
                    }
                    if let Err(e) = self
                        .upload_chunk(&project, &collection, events, &live_handles)
                        .await
                    {
                        if self.config.debug {
                            return Err(e);
                        }
                        tracing::warn!(collection = %collection, error = %e, "chunk upload failed");
                    }
                }
            }

            let remaining: usize = self
                .store
                .handles(&project_id, 1)?
                .values()
                .map(|handles| handles.len())
                .sum();

            let do_retry = remaining > 0
                && self.config.enable_retry_uploading
                && retry_counter < self.config.upload_retry_count.saturating_sub(1);
            if !do_retry {
                if remaining > 0 {
                    tracing::warn!(remaining, "stopping drain with events still queued");
                }
                return Ok(());
            }

            let delay = self.config.retry_delay(retry_counter);
            tracing::debug!(
                retry = retry_counter + 1,
                delay_secs = delay.as_secs_f64(),
                "retrying upload after backoff"
            );
            tokio::time::sleep(delay).await;
            retry_counter += 1;
        }
    }

    /// Spawn a drain on the async runtime and hand the outcome to
    /// `on_complete`. Exactly one of success or failure is reported.
    pub fn send_queued_events_async<F>(
        self: &Arc<Self>,
        project: Option<Project>,
        on_complete: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let result = client.send_queued_events(project.as_ref()).await;
            on_complete(result);
        })
    }

    /// Read each handle's content back and parse it. Corrupted events are
    /// removed on the spot and the chunk continues without them; the
    /// returned handle list stays positionally aligned with the events.
    fn materialize(&self, handles: &[Handle]) -> Result<(Vec<Value>, Vec<Handle>)> {
        let mut events = Vec::with_capacity(handles.len());
        let mut live_handles = Vec::with_capacity(handles.len());

        for handle in handles {
            let raw = match self.store.get(handle)? {
                Some(raw) => raw,
                None => {
                    tracing::debug!(%handle, "event disappeared before upload");
                    continue;
                }
            };
            match serde_json::from_str::<Value>(&raw) {
                Ok(event) => {
                    events.push(event);
                    live_handles.push(handle.clone());
                }
                Err(e) => {
                    tracing::warn!(%handle, error = %e, "stored event is not valid JSON, removing it");
                    if let Err(e) = self.store.remove(handle) {
                        tracing::warn!(%handle, error = %e, "failed to remove corrupted event");
                    }
                }
            }
        }

        Ok((events, live_handles))
    }

    /// Upload one chunk of events for one collection and reconcile the
    /// response. The chunk's events go out as a single request.
    async fn upload_chunk(
        &self,
        project: &Project,
        collection: &str,
        events: Vec<Value>,
        live_handles: &[Handle],
    ) -> Result<()> {
        let count = events.len();
        let body = serde_json::to_string(&serde_json::json!({ "events": events }))?;
        let request = Request {
            url: self.ingest_url(collection)?,
            method: Method::Post,
            write_key: project.write_key().map(str::to_string),
            body,
        };

        tracing::debug!(collection, events = count, "uploading chunk");
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(Error::Server {
                status: response.status,
                body: response.body,
            });
        }

        let outcome = reconcile::apply(self.store.as_ref(), live_handles, &response.body)?;
        tracing::debug!(
            collection,
            removed = outcome.removed,
            retained = outcome.retained,
            "reconciled chunk"
        );
        Ok(())
    }

    /// Upload URL for a collection. Collection names of the form
    /// `database.table` map to `<base_url>/<database>/<table>`.
    fn ingest_url(&self, collection: &str) -> Result<String> {
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?
            .trim_end_matches('/');

        Ok(match collection.split_once('.') {
            Some((database, table)) => format!(
                "{}/{}/{}",
                base,
                urlencoding::encode(database),
                urlencoding::encode(table)
            ),
            None => format!("{}/{}", base, urlencoding::encode(collection)),
        })
    }

    fn drain_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .drain_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(project_id.to_string()).or_default())
    }
}

/// Process-wide client instance. Set once by [`initialize`]; later calls are
/// ignored. There is deliberately no teardown.
static GLOBAL: OnceLock<Arc<Client>> = OnceLock::new();

/// Install the process-wide client. Only the first call has any effect.
pub fn initialize(client: Arc<Client>) {
    if GLOBAL.set(client).is_err() {
        tracing::warn!("client already initialized, ignoring");
    }
}

/// Whether [`initialize`] has been called.
pub fn is_initialized() -> bool {
    GLOBAL.get().is_some()
}

/// The process-wide client installed by [`initialize`].
pub fn global() -> Result<Arc<Client>> {
    GLOBAL.get().cloned().ok_or_else(|| {
        Error::Config("initialize() must be called before requesting the client".to_string())
    })
}

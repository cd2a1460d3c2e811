//! # batchq-core
//!
//! Client-side event buffering with batched delivery.
//!
//! Applications hand the client arbitrary JSON events; the client validates
//! them and queues them in a durable local [`EventStore`] (one file per event
//! in the default backend). A later drain cycle uploads the queue in
//! per-collection chunks to a remote ingest endpoint, reconciles the
//! per-event receipts back into selective deletions, and retries with
//! exponential backoff until the queue is empty or the retry budget runs
//! out. A one-shot, flag-guarded migration rewrites events cached by older
//! releases in the legacy wire format.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use batchq_core::{Client, ClientConfig, FileEventStore, Project, ReqwestTransport};
//!
//! # async fn run() -> batchq_core::Result<()> {
//! let config = ClientConfig {
//!     base_url: Some("https://ingest.example.com".to_string()),
//!     ..Default::default()
//! };
//! let store = Arc::new(FileEventStore::new("/var/cache/myapp")?);
//! let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(30))?);
//! let project = Project::new("project1", Some("write-key".to_string()))?;
//!
//! let client = Client::new(config, store, transport)?.with_default_project(project);
//!
//! client.queue_event(None, "mydb.purchases", &serde_json::json!({"price": 5}))?;
//! client.send_queued_events(None).await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use client::{global, initialize, is_initialized, Client};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use project::Project;
pub use store::{EventStore, FileEventStore, Handle, MemoryEventStore};
pub use transport::{HttpTransport, Method, ReqwestTransport, Request, Response};

// Public modules
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod migrate;
pub mod project;
pub mod reconcile;
pub mod store;
pub mod transport;

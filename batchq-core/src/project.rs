//! Project identity and write credentials

use crate::error::{Error, Result};

/// A destination project for queued events.
///
/// Events are stored and uploaded per project; the write key, when present,
/// authenticates upload requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    project_id: String,
    write_key: Option<String>,
}

impl Project {
    /// Create a new project handle.
    pub fn new(project_id: impl Into<String>, write_key: Option<String>) -> Result<Self> {
        let project_id = project_id.into();
        if project_id.is_empty() {
            return Err(Error::Config(
                "project_id must not be empty".to_string(),
            ));
        }
        Ok(Self {
            project_id,
            write_key,
        })
    }

    /// The project ID, used as the top-level key in the event store.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// The write key sent as the authorization token on uploads.
    pub fn write_key(&self) -> Option<&str> {
        self.write_key.as_deref()
    }
}

//! File-backed event store
//!
//! One file per event under
//! `root/keen/<project_id>/<collection>/<timestamp_millis>.<counter>`, plus a
//! `root/keenpreferences/<key>` file per preference. File names sort in
//! insertion order, which is what the enumeration and aging-out logic rely on.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{Error, Result};

use super::{
    EventStore, Handle, HandleMap, DEFAULT_EVENTS_TO_FORGET, DEFAULT_MAX_EVENTS_PER_COLLECTION,
};

const CACHE_DIR: &str = "keen";
const PREFERENCES_DIR: &str = "keenpreferences";

/// Event store that caches events on the filesystem between queueing and
/// batch posting.
pub struct FileEventStore {
    root: PathBuf,
    max_events_per_collection: usize,
    events_to_forget: usize,
}

impl FileEventStore {
    /// Create a store rooted at an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Storage(format!(
                "event store root '{}' must exist and be a directory",
                root.display()
            )));
        }
        Ok(Self {
            root,
            max_events_per_collection: DEFAULT_MAX_EVENTS_PER_COLLECTION,
            events_to_forget: DEFAULT_EVENTS_TO_FORGET,
        })
    }

    /// Override the per-collection quota and the number of oldest events
    /// discarded when it is exceeded.
    pub fn with_quota(mut self, max_events_per_collection: usize, events_to_forget: usize) -> Self {
        self.max_events_per_collection = max_events_per_collection;
        self.events_to_forget = events_to_forget;
        self
    }

    fn cache_dir(&self) -> Result<PathBuf> {
        let dir = self.root.join(CACHE_DIR);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn preferences_dir(&self) -> Result<PathBuf> {
        let dir = self.root.join(PREFERENCES_DIR);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn collection_dir(&self, project_id: &str, collection: &str) -> Result<PathBuf> {
        let dir = self.cache_dir()?.join(project_id).join(collection);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn sorted_dirs(parent: &Path) -> Result<Vec<PathBuf>> {
        Self::sorted_entries(parent, true)
    }

    fn sorted_files(parent: &Path) -> Result<Vec<PathBuf>> {
        Self::sorted_entries(parent, false)
    }

    fn sorted_entries(parent: &Path, want_dirs: bool) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(parent)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let keep = if want_dirs {
                file_type.is_dir()
            } else {
                file_type.is_file()
            };
            if keep {
                entries.push(entry.path());
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Make room for one more event in the collection directory. When the
    /// quota is met, the oldest events are discarded; a single failed delete
    /// is logged and skipped, never fatal.
    fn age_out(&self, dir: &Path, collection: &str) -> Result<()> {
        let files = Self::sorted_files(dir)?;
        if files.len() < self.max_events_per_collection {
            return Ok(());
        }

        tracing::warn!(
            collection,
            count = files.len(),
            max = self.max_events_per_collection,
            "too many events in cache, aging out old data"
        );
        for path in files.iter().take(self.events_to_forget) {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "could not delete event while aging out, cache may exceed quota"
                );
            }
        }
        Ok(())
    }

    /// Claim a fresh event file named `<millis>.<counter>`, bumping the
    /// counter until an unclaimed name is found. `create_new` makes the
    /// claim atomic under concurrent stores.
    fn create_event_file(dir: &Path) -> Result<(fs::File, PathBuf)> {
        let millis = Utc::now().timestamp_millis();
        let mut counter = 0u32;
        loop {
            let path = dir.join(format!("{}.{}", millis, counter));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((file, path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => counter += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn file_path<'a>(&self, handle: &'a Handle) -> Result<&'a Path> {
        handle.as_file().ok_or_else(|| {
            Error::Storage("handle does not belong to a file-backed store".to_string())
        })
    }
}

impl EventStore for FileEventStore {
    fn store(&self, project_id: &str, collection: &str, event: &str) -> Result<Handle> {
        let dir = self.collection_dir(project_id, collection)?;
        self.age_out(&dir, collection)?;

        let (mut file, path) = Self::create_event_file(&dir)?;
        file.write_all(event.as_bytes())?;

        Ok(Handle::for_file(path))
    }

    fn get(&self, handle: &Handle) -> Result<Option<String>> {
        let path = self.file_path(handle)?;
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, handle: &Handle) -> Result<()> {
        let path = self.file_path(handle)?;
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "deleted event file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "no event found at handle");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn handles(&self, project_id: &str, limit: usize) -> Result<HandleMap> {
        let mut map = BTreeMap::new();

        let project_dir = self.root.join(CACHE_DIR).join(project_id);
        if !project_dir.is_dir() {
            return Ok(map);
        }

        let mut count = 0usize;
        for dir in Self::sorted_dirs(&project_dir)? {
            let collection = match dir.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };

            let mut files = Self::sorted_files(&dir)?;
            if count + files.len() > limit {
                files.truncate(limit - count);
                count = limit;
            } else {
                count += files.len();
            }
            if files.is_empty() {
                continue;
            }

            map.insert(collection, files.into_iter().map(Handle::for_file).collect());
        }

        Ok(map)
    }

    fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        let path = self.preferences_dir()?.join(key);
        fs::write(path, value)?;
        Ok(())
    }

    fn preference(&self, key: &str, default: &str) -> Result<String> {
        let path = self.preferences_dir()?.join(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(default.to_string()),
            Err(e) => Err(e.into()),
        }
    }
}

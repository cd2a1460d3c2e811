//! In-process event store
//!
//! Same contract as the file-backed store, held entirely in memory. Useful
//! for tests and for embedders that do not want events to survive a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

use super::{
    EventStore, Handle, HandleMap, DEFAULT_EVENTS_TO_FORGET, DEFAULT_MAX_EVENTS_PER_COLLECTION,
};

#[derive(Default)]
struct Inner {
    /// project -> collection -> seq -> serialized event
    events: HashMap<String, BTreeMap<String, BTreeMap<u64, String>>>,
    preferences: HashMap<String, String>,
    next_seq: u64,
}

/// Event store held in process memory.
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
    max_events_per_collection: usize,
    events_to_forget: usize,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_events_per_collection: DEFAULT_MAX_EVENTS_PER_COLLECTION,
            events_to_forget: DEFAULT_EVENTS_TO_FORGET,
        }
    }

    /// Override the per-collection quota and the number of oldest events
    /// discarded when it is exceeded.
    pub fn with_quota(mut self, max_events_per_collection: usize, events_to_forget: usize) -> Self {
        self.max_events_per_collection = max_events_per_collection;
        self.events_to_forget = events_to_forget;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another thread panicked mid-operation;
        // the maps themselves are still structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn memory_key<'a>(&self, handle: &'a Handle) -> Result<(&'a str, &'a str, u64)> {
        handle.as_memory().ok_or_else(|| {
            Error::Storage("handle does not belong to an in-memory store".to_string())
        })
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MemoryEventStore {
    fn store(&self, project_id: &str, collection: &str, event: &str) -> Result<Handle> {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let events = inner
            .events
            .entry(project_id.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        if events.len() >= self.max_events_per_collection {
            tracing::warn!(
                collection,
                count = events.len(),
                max = self.max_events_per_collection,
                "too many events in cache, aging out old data"
            );
            let oldest: Vec<u64> = events.keys().take(self.events_to_forget).copied().collect();
            for seq in oldest {
                events.remove(&seq);
            }
        }

        events.insert(seq, event.to_string());
        Ok(Handle::for_memory(
            project_id.to_string(),
            collection.to_string(),
            seq,
        ))
    }

    fn get(&self, handle: &Handle) -> Result<Option<String>> {
        let (project_id, collection, seq) = self.memory_key(handle)?;
        let inner = self.lock();
        Ok(inner
            .events
            .get(project_id)
            .and_then(|collections| collections.get(collection))
            .and_then(|events| events.get(&seq))
            .cloned())
    }

    fn remove(&self, handle: &Handle) -> Result<()> {
        let (project_id, collection, seq) = self.memory_key(handle)?;
        let mut inner = self.lock();
        let removed = inner
            .events
            .get_mut(project_id)
            .and_then(|collections| collections.get_mut(collection))
            .and_then(|events| events.remove(&seq));
        if removed.is_none() {
            tracing::warn!(%handle, "no event found at handle");
        }
        Ok(())
    }

    fn handles(&self, project_id: &str, limit: usize) -> Result<HandleMap> {
        let inner = self.lock();
        let mut map = BTreeMap::new();

        let collections = match inner.events.get(project_id) {
            Some(collections) => collections,
            None => return Ok(map),
        };

        let mut count = 0usize;
        for (collection, events) in collections {
            let take = if count + events.len() > limit {
                let take = limit - count;
                count = limit;
                take
            } else {
                count += events.len();
                events.len()
            };
            if take == 0 {
                continue;
            }

            let handles: Vec<Handle> = events
                .keys()
                .take(take)
                .map(|seq| {
                    Handle::for_memory(project_id.to_string(), collection.clone(), *seq)
                })
                .collect();
            map.insert(collection.clone(), handles);
        }

        Ok(map)
    }

    fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.lock()
            .preferences
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn preference(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .lock()
            .preferences
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_then_get_round_trip() {
        let store = MemoryEventStore::new();
        let handle = store.store("project1", "collection1", r#"{"a":1}"#).unwrap();
        assert_eq!(store.get(&handle).unwrap().as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let store = MemoryEventStore::new();
        let handle = store.store("project1", "collection1", "{}").unwrap();
        store.remove(&handle).unwrap();
        assert_eq!(store.get(&handle).unwrap(), None);
        store.remove(&handle).unwrap();
    }

    #[test]
    fn test_handles_cumulative_limit() {
        let store = MemoryEventStore::new();
        store.store("project1", "collection1", "1").unwrap();
        store.store("project1", "collection1", "2").unwrap();
        store.store("project1", "collection2", "3").unwrap();
        store.store("project1", "collection2", "4").unwrap();

        let map = store.handles("project1", 3).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["collection1"].len(), 2);
        assert_eq!(map["collection2"].len(), 1);
        assert_eq!(
            store.get(&map["collection2"][0]).unwrap().as_deref(),
            Some("3")
        );
    }

    #[test]
    fn test_quota_ages_out_oldest() {
        let store = MemoryEventStore::new().with_quota(5, 2);
        for i in 0..5 {
            store
                .store("project1", "collection1", &format!("event-{}", i))
                .unwrap();
        }
        store.store("project1", "collection1", "event-5").unwrap();

        let map = store.handles("project1", 100).unwrap();
        let stored: Vec<String> = map["collection1"]
            .iter()
            .map(|h| store.get(h).unwrap().unwrap())
            .collect();
        assert_eq!(stored, vec!["event-2", "event-3", "event-4", "event-5"]);
    }

    #[test]
    fn test_preferences() {
        let store = MemoryEventStore::new();
        assert_eq!(store.preference("flag", "false").unwrap(), "false");
        store.set_preference("flag", "true").unwrap();
        assert_eq!(store.preference("flag", "true").unwrap(), "true");
    }
}

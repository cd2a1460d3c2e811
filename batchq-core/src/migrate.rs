//! One-shot migration of legacy-format cached events
//!
//! Older releases queued events wrapped in a legacy envelope (a `keen`
//! metadata object plus `#UUID`/`#SSUT` bookkeeping fields). The ingest
//! service does not accept that shape, so the first drain cycle rewrites
//! every cached event once, guarded by a persisted preference flag.

use serde_json::Value;

use crate::error::Result;
use crate::store::EventStore;

/// Preference key recording migration completion. The key is kept verbatim
/// so caches written by older releases are recognized.
pub const MIGRATION_FLAG: &str = "PREF_MIGRATED_CACHE_TO_INGEST";

const MIGRATION_ENUMERATION_LIMIT: usize = 10_000;

/// Rewrite legacy-envelope events into the ingest format, at most once.
///
/// The completion flag is set to `"true"` *before* the rewrite starts:
/// migration is best effort and must never run a second time, even when this
/// attempt fails partway, so a poison event set cannot be reprocessed
/// forever. Returns `Ok(true)` when a migration pass ran, `Ok(false)` when
/// the flag was already set.
pub fn run_if_needed(store: &dyn EventStore, project_id: &str) -> Result<bool> {
    if store.preference(MIGRATION_FLAG, "false")? == "true" {
        return Ok(false);
    }
    store.set_preference(MIGRATION_FLAG, "true")?;

    tracing::info!(project_id, "migrating cached events to the ingest format");

    let handle_map = store.handles(project_id, MIGRATION_ENUMERATION_LIMIT)?;
    for (collection, handles) in handle_map {
        // Read everything back before deleting the originals
        let mut events = Vec::with_capacity(handles.len());
        for handle in &handles {
            let raw = match store.get(handle)? {
                Some(raw) => raw,
                None => continue,
            };
            match serde_json::from_str::<Value>(&raw) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(%handle, error = %e, "skipping unparseable cached event");
                }
            }
        }

        for handle in &handles {
            if let Err(e) = store.remove(handle) {
                tracing::warn!(%handle, error = %e, "failed to remove legacy event");
            }
        }

        for event in events {
            if let Some(rewritten) = strip_legacy_envelope(event) {
                let serialized = serde_json::to_string(&rewritten)?;
                store.store(project_id, &collection, &serialized)?;
            }
        }
    }

    Ok(true)
}

/// Strip the legacy envelope from one event.
///
/// Drops the `keen` metadata object and the `#SSUT` bookkeeping field,
/// renames `#UUID` to `uuid`, and returns `None` for events with nothing
/// left after stripping.
fn strip_legacy_envelope(event: Value) -> Option<Value> {
    let mut map = match event {
        Value::Object(map) => map,
        _ => return None,
    };

    let uuid = map.remove("#UUID");
    map.remove("keen");
    map.remove("#SSUT");

    if map.is_empty() {
        return None;
    }
    if let Some(Value::String(uuid)) = uuid {
        map.insert("uuid".to_string(), Value::String(uuid));
    }
    Some(Value::Object(map))
}

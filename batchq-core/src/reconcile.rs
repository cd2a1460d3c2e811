//! Batch-response reconciliation
//!
//! The ingest service answers a batch upload with one receipt per submitted
//! event, positionally aligned with the request's event list. Reconciliation
//! walks that alignment and decides, per event, whether its handle can be
//! deleted from the store: acknowledged events and events the server will
//! never accept are removed, everything else stays queued for the next drain
//! cycle.

use serde::Deserialize;

use crate::error::Result;
use crate::store::{EventStore, Handle};

/// Error names for events the server deems permanently invalid. Retrying
/// these would never succeed, so their handles are removed.
const PERMANENT_ERRORS: [&str; 3] = [
    "InvalidCollectionNameError",
    "InvalidPropertyNameError",
    "InvalidPropertyValueError",
];

/// Parsed upload response body.
#[derive(Debug, Deserialize)]
struct IngestResponse {
    #[serde(default)]
    receipts: Vec<EventReceipt>,
}

/// Outcome for one submitted event.
#[derive(Debug, Deserialize)]
struct EventReceipt {
    success: bool,
    #[serde(default)]
    error: Option<ReceiptError>,
}

#[derive(Debug, Deserialize)]
struct ReceiptError {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
}

/// Counts of what reconciliation did with one chunk.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Handles removed from the store (acknowledged or permanently rejected)
    pub removed: usize,
    /// Handles left queued for a later retry
    pub retained: usize,
}

/// Reconcile one chunk's response against the handles submitted in it.
///
/// `handles` must be in the exact order the chunk's events were serialized;
/// positional order is the only correlation between request and receipts.
/// A failed removal is logged and does not block removing the rest.
pub fn apply(
    store: &dyn EventStore,
    handles: &[Handle],
    response_body: &str,
) -> Result<ReconcileOutcome> {
    let response: IngestResponse = serde_json::from_str(response_body)?;

    if response.receipts.len() != handles.len() {
        tracing::warn!(
            receipts = response.receipts.len(),
            submitted = handles.len(),
            "receipt count does not match submitted event count"
        );
    }

    let mut outcome = ReconcileOutcome::default();
    for (handle, receipt) in handles.iter().zip(&response.receipts) {
        let remove = if receipt.success {
            true
        } else {
            match &receipt.error {
                Some(error) if PERMANENT_ERRORS.contains(&error.name.as_str()) => {
                    tracing::warn!(
                        %handle,
                        error = %error.name,
                        description = error.description.as_deref().unwrap_or(""),
                        "server rejected event permanently, deleting it"
                    );
                    true
                }
                Some(error) => {
                    tracing::warn!(
                        %handle,
                        error = %error.name,
                        description = error.description.as_deref().unwrap_or(""),
                        "event could not be ingested, keeping it for retry"
                    );
                    false
                }
                None => {
                    tracing::warn!(%handle, "event failed without error detail, keeping it for retry");
                    false
                }
            }
        };

        if remove {
            match store.remove(handle) {
                Ok(()) => outcome.removed += 1,
                Err(e) => {
                    tracing::warn!(%handle, error = %e, "failed to remove event from store");
                }
            }
        } else {
            outcome.retained += 1;
        }
    }

    Ok(outcome)
}

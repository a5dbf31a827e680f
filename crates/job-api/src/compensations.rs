//! Reversal handlers for job writes.
//!
//! Each ledger entry is named after the write it reverses:
//! - `create`: target is the new job id; reversed by deleting it
//! - `update`: payload is the job before the update; reversed by restoring it
//! - `delete`: payload is the deleted job; reversed by re-creating it

use transaction::{CompensationRegistry, HandlerError, handler_fn};
use uuid::Uuid;

use crate::store::{InMemoryJobStore, Job};

pub const CREATE: &str = "create";
pub const UPDATE: &str = "update";
pub const DELETE: &str = "delete";

/// Builds the registry the job participant replays its ledger with.
pub fn registry(store: InMemoryJobStore) -> CompensationRegistry {
    let mut registry = CompensationRegistry::new();

    let jobs = store.clone();
    registry.register(
        CREATE,
        handler_fn(move |entry| {
            let jobs = jobs.clone();
            async move {
                let id = Uuid::parse_str(&entry.target_id)?;
                if jobs.delete(id).await.is_none() {
                    tracing::debug!(%id, "created job already gone");
                }
                Ok::<(), HandlerError>(())
            }
        }),
    );

    for action in [UPDATE, DELETE] {
        let jobs = store.clone();
        registry.register(
            action,
            handler_fn(move |entry| {
                let jobs = jobs.clone();
                async move {
                    let snapshot: Job = entry.payload_as()?;
                    jobs.put(snapshot).await;
                    Ok::<(), HandlerError>(())
                }
            }),
        );
    }

    registry
}

//! Job CRUD endpoints.
//!
//! Requests carrying a `transaction_id` header join that transaction: the
//! service listens for its outcome and records how to reverse each write.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use broker::Broker;
use common::TransactionId;
use ledger::CompensationLedger;
use transaction::{Participant, TRANSACTION_ID_HEADER};
use uuid::Uuid;

use crate::compensations;
use crate::error::ApiError;
use crate::store::{InMemoryJobStore, Job, JobInput};

/// Shared application state accessible from all handlers.
pub struct AppState<L: CompensationLedger + Clone + 'static> {
    pub store: InMemoryJobStore,
    pub participant: Participant<L, dyn Broker>,
}

/// POST /job: create a job.
#[tracing::instrument(skip(state, headers, input))]
pub async fn create<L: CompensationLedger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    headers: HeaderMap,
    Json(input): Json<JobInput>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    input.validate().map_err(ApiError::BadRequest)?;
    let transaction_id = join_transaction(&state, &headers).await?;

    let job = state.store.create(input).await;

    if let Some(tx) = &transaction_id {
        let recorded = state
            .participant
            .record(tx, compensations::CREATE, &job.id.to_string(), serde_json::Value::Null)
            .await;
        if let Err(e) = recorded {
            state.store.delete(job.id).await;
            return Err(e.into());
        }
    }

    metrics::counter!("jobs_written_total", "operation" => "create").increment(1);
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /job/:id: read a job.
#[tracing::instrument(skip(state))]
pub async fn get<L: CompensationLedger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let id = parse_job_id(&id)?;
    let job = state
        .store
        .read(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job {id} not found")))?;
    Ok(Json(job))
}

/// PUT /job/:id: replace a job's fields.
#[tracing::instrument(skip(state, headers, input))]
pub async fn update<L: CompensationLedger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(input): Json<JobInput>,
) -> Result<Json<Job>, ApiError> {
    let id = parse_job_id(&id)?;
    input.validate().map_err(ApiError::BadRequest)?;
    let transaction_id = join_transaction(&state, &headers).await?;

    let original = state
        .store
        .read(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job {id} not found")))?;
    let job = state
        .store
        .update(id, input)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job {id} not found")))?;

    if let Some(tx) = &transaction_id {
        let snapshot = serde_json::to_value(&original)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let recorded = state
            .participant
            .record(tx, compensations::UPDATE, &id.to_string(), snapshot)
            .await;
        if let Err(e) = recorded {
            state.store.put(original).await;
            return Err(e.into());
        }
    }

    metrics::counter!("jobs_written_total", "operation" => "update").increment(1);
    Ok(Json(job))
}

/// DELETE /job/:id: delete a job.
#[tracing::instrument(skip(state, headers))]
pub async fn delete<L: CompensationLedger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_job_id(&id)?;
    let transaction_id = join_transaction(&state, &headers).await?;

    let deleted = state
        .store
        .delete(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job {id} not found")))?;

    if let Some(tx) = &transaction_id {
        let snapshot = serde_json::to_value(&deleted)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let recorded = state
            .participant
            .record(tx, compensations::DELETE, &id.to_string(), snapshot)
            .await;
        if let Err(e) = recorded {
            state.store.put(deleted).await;
            return Err(e.into());
        }
    }

    metrics::counter!("jobs_written_total", "operation" => "delete").increment(1);
    Ok(StatusCode::NO_CONTENT)
}

/// Reads the transaction header and, if present, listens for the outcome.
async fn join_transaction<L: CompensationLedger + Clone + 'static>(
    state: &AppState<L>,
    headers: &HeaderMap,
) -> Result<Option<TransactionId>, ApiError> {
    let Some(value) = headers.get(TRANSACTION_ID_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {TRANSACTION_ID_HEADER} header")))?
        .trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Empty {TRANSACTION_ID_HEADER} header"
        )));
    }

    let transaction_id = TransactionId::from(value);
    state.participant.observe(&transaction_id).await?;
    tracing::debug!(%transaction_id, "request joined transaction");
    Ok(Some(transaction_id))
}

fn parse_job_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid job id: {e}")))
}

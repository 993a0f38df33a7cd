//! Upload and batch read endpoints.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

use service_core::error::AppError;

use crate::models::{BatchStatus, BatchView, TransactionStatus, TransactionView};
use crate::services::cursor::ListCursor;
use crate::services::summary::build_summary;
use crate::startup::AppState;

use super::parse_uuid;

const DEFAULT_PAGE_LIMIT: i64 = 50;
const MAX_PAGE_LIMIT: i64 = 100;

/// Accept a multipart CSV upload, create the batch record and hand the
/// job to the dispatcher. Responds 202 before processing starts.
pub async fn upload_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload.csv").to_string();
            let data = field.bytes().await.map_err(|e| {
                AppError::BadRequest(anyhow::anyhow!("Failed to read uploaded file: {}", e))
            })?;
            upload = Some((filename, data.to_vec()));
            break;
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing 'file' field")))?;

    if data.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Uploaded file is empty"
        )));
    }
    if !filename.to_lowercase().ends_with(".csv") {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Only .csv uploads are accepted"
        )));
    }

    let batch = state.db.create_batch(&filename).await?;

    tokio::fs::create_dir_all(&state.config.upload.dir).await?;
    let file_path = PathBuf::from(&state.config.upload.dir)
        .join(format!("batch-{}.csv", batch.batch_id));
    tokio::fs::write(&file_path, &data).await?;

    state.dispatcher.dispatch(batch.batch_id, file_path).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "batchId": batch.batch_id })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBatchesQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBatchesResponse {
    pub batches: Vec<BatchView>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_batches(
    State(state): State<AppState>,
    Query(query): Query<ListBatchesQuery>,
) -> Result<Json<ListBatchesResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    if let Some(status) = query.status.as_deref() {
        if !matches!(status, "uploading" | "processing" | "completed" | "failed") {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid status filter: {status}"
            )));
        }
    }

    let sort_by = query.sort_by.as_deref().unwrap_or("createdAt");
    if !matches!(sort_by, "createdAt" | "updatedAt") {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Invalid sortBy: {sort_by}"
        )));
    }
    let sort_descending = match query.sort_order.as_deref() {
        None | Some("desc") => true,
        Some("asc") => false,
        Some(other) => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid sortOrder: {other}"
            )));
        }
    };

    let (batches, total) = state
        .db
        .list_batches(query.status.as_deref(), limit, offset, sort_by, sort_descending)
        .await?;

    Ok(Json(ListBatchesResponse {
        batches: batches.into_iter().map(BatchView::from).collect(),
        total,
        limit,
        offset,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusResponse {
    pub batch_id: Uuid,
    pub filename: String,
    pub status: String,
    pub progress_percent: Option<i32>,
    pub total_transactions: i64,
    pub processed_count: i64,
    pub auto_matched_count: i64,
    pub needs_review_count: i64,
    pub unmatched_count: i64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Current batch status with progress. The mirror is consulted for
/// in-flight batches only; terminal batches report the authoritative
/// counters, so stale mirror values can never exceed them.
pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatusResponse>, AppError> {
    let batch_id = parse_uuid(&batch_id, "batch id")?;
    let batch = state
        .db
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;

    let status = BatchStatus::from_str(&batch.status);

    let (total, processed, auto_matched, needs_review, unmatched) = if status.is_terminal() {
        (
            i64::from(batch.total_transactions),
            i64::from(batch.processed_count),
            i64::from(batch.auto_matched_count),
            i64::from(batch.needs_review_count),
            i64::from(batch.unmatched_count),
        )
    } else {
        match state.mirror.get(batch_id).await {
            Some(progress) => (
                progress.total.max(i64::from(batch.total_transactions)),
                progress.processed,
                progress.auto_matched,
                progress.needs_review,
                progress.unmatched,
            ),
            None => (
                i64::from(batch.total_transactions),
                i64::from(batch.processed_count),
                i64::from(batch.auto_matched_count),
                i64::from(batch.needs_review_count),
                i64::from(batch.unmatched_count),
            ),
        }
    };

    let progress_percent = match status {
        BatchStatus::Completed => Some(100),
        _ if total > 0 => Some(((processed * 100) / total).clamp(0, 100) as i32),
        _ => None,
    };

    Ok(Json(BatchStatusResponse {
        batch_id: batch.batch_id,
        filename: batch.original_filename,
        status: batch.status,
        progress_percent,
        total_transactions: total,
        processed_count: processed,
        auto_matched_count: auto_matched,
        needs_review_count: needs_review,
        unmatched_count: unmatched,
        started_at: batch.started_utc,
        completed_at: batch.completed_utc,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTransactionsQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTransactionsResponse {
    pub data: Vec<TransactionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

pub async fn list_batch_transactions(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, AppError> {
    let batch_id = parse_uuid(&batch_id, "batch id")?;

    state
        .db
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);

    if let Some(status) = query.status.as_deref() {
        if TransactionStatus::parse(status).is_none() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid status filter: {status}"
            )));
        }
    }

    let cursor = query
        .cursor
        .as_deref()
        .map(ListCursor::decode)
        .transpose()?;

    let (transactions, next_cursor) = state
        .db
        .list_batch_transactions(batch_id, query.status.as_deref(), cursor, limit)
        .await?;

    Ok(Json(ListTransactionsResponse {
        data: transactions.into_iter().map(TransactionView::from).collect(),
        has_more: next_cursor.is_some(),
        next_cursor: next_cursor.map(|c| c.encode()),
    }))
}

pub async fn get_batch_summary(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let batch_id = parse_uuid(&batch_id, "batch id")?;
    let batch = state
        .db
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;

    Ok(Json(build_summary(&batch)))
}

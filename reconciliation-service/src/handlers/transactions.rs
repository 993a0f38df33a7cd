//! Admin action and transaction read endpoints.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use service_core::error::AppError;

use crate::models::{
    AdminAction, AuditEntryView, DEFAULT_ADMIN_ACTOR, InvoiceView, SYSTEM_ACTOR, TransactionView,
};
use crate::services::metrics::record_admin_action;
use crate::startup::AppState;

use super::parse_uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub performed_by: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonedRequest {
    pub reason: Option<String>,
    pub performed_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualMatchRequest {
    pub invoice_id: String,
    pub reason: Option<String>,
    pub performed_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkConfirmRequest {
    pub batch_id: String,
    pub performed_by: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminActionResponse {
    pub transaction: TransactionView,
    pub audit_log_id: Uuid,
}

/// Resolve the audit actor. `system` is reserved for worker-written
/// rows and may not be impersonated through the API.
fn resolve_actor(performed_by: Option<String>) -> Result<String, AppError> {
    let actor = performed_by
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ADMIN_ACTOR.to_string());
    if actor == SYSTEM_ACTOR {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "performedBy '{SYSTEM_ACTOR}' is reserved"
        )));
    }
    Ok(actor)
}

async fn apply_action(
    state: &AppState,
    transaction_id: &str,
    action: AdminAction,
    performed_by: Option<String>,
) -> Result<Json<AdminActionResponse>, AppError> {
    let transaction_id = parse_uuid(transaction_id, "transaction id")?;
    let actor = resolve_actor(performed_by)?;

    let result = state
        .db
        .apply_admin_action(transaction_id, &action, &actor)
        .await;

    record_admin_action(
        action.name(),
        if result.is_ok() { "ok" } else { "error" },
    );

    let (transaction, audit_log_id) = result?;
    Ok(Json(AdminActionResponse {
        transaction: TransactionView::from(transaction),
        audit_log_id,
    }))
}

pub async fn confirm_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ConfirmRequest>>,
) -> Result<Json<AdminActionResponse>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    apply_action(&state, &id, AdminAction::Confirm, body.performed_by).await
}

pub async fn reject_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ReasonedRequest>>,
) -> Result<Json<AdminActionResponse>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    apply_action(
        &state,
        &id,
        AdminAction::Reject { reason: body.reason },
        body.performed_by,
    )
    .await
}

pub async fn manual_match_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ManualMatchRequest>,
) -> Result<Json<AdminActionResponse>, AppError> {
    let invoice_id = parse_uuid(&body.invoice_id, "invoice id")?;
    apply_action(
        &state,
        &id,
        AdminAction::ManualMatch {
            invoice_id,
            reason: body.reason,
        },
        body.performed_by,
    )
    .await
}

pub async fn mark_transaction_external(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ReasonedRequest>>,
) -> Result<Json<AdminActionResponse>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    apply_action(
        &state,
        &id,
        AdminAction::MarkExternal { reason: body.reason },
        body.performed_by,
    )
    .await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkConfirmResponse {
    pub confirmed_count: usize,
    pub transaction_ids: Vec<Uuid>,
}

pub async fn bulk_confirm_transactions(
    State(state): State<AppState>,
    Json(body): Json<BulkConfirmRequest>,
) -> Result<Json<BulkConfirmResponse>, AppError> {
    let batch_id = parse_uuid(&body.batch_id, "batch id")?;
    let actor = resolve_actor(body.performed_by)?;

    state
        .db
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;

    let result = state.db.bulk_confirm_auto(batch_id, &actor).await;
    record_admin_action(
        "bulk_confirm",
        if result.is_ok() { "ok" } else { "error" },
    );
    let transaction_ids = result?;

    Ok(Json(BulkConfirmResponse {
        confirmed_count: transaction_ids.len(),
        transaction_ids,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetailResponse {
    pub transaction: TransactionView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_invoice: Option<InvoiceView>,
    pub audit_log: Vec<AuditEntryView>,
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TransactionDetailResponse>, AppError> {
    let transaction_id = parse_uuid(&id, "transaction id")?;

    let transaction = state
        .db
        .get_transaction(transaction_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

    let matched_invoice = match transaction.matched_invoice_id {
        Some(invoice_id) => state.db.get_invoice(invoice_id).await?.map(InvoiceView::from),
        None => None,
    };

    let audit_log = state
        .db
        .list_audit_entries(transaction_id)
        .await?
        .into_iter()
        .map(AuditEntryView::from)
        .collect();

    Ok(Json(TransactionDetailResponse {
        transaction: TransactionView::from(transaction),
        matched_invoice,
        audit_log,
    }))
}

pub async fn get_transaction_audit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AuditEntryView>>, AppError> {
    let transaction_id = parse_uuid(&id, "transaction id")?;

    let entries = state
        .db
        .list_audit_entries(transaction_id)
        .await?
        .into_iter()
        .map(AuditEntryView::from)
        .collect();

    Ok(Json(entries))
}

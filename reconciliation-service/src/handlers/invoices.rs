//! Invoice search and lookup endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use service_core::error::AppError;

use crate::models::{CandidateInvoiceView, InvoiceStatus, InvoiceView};
use crate::startup::AppState;

use super::parse_uuid;

const DEFAULT_SEARCH_LIMIT: i64 = 20;
const MAX_SEARCH_LIMIT: i64 = 50;
const DEFAULT_CANDIDATE_LIMIT: i64 = 10;

fn parse_amount_param(raw: &str) -> Result<Decimal, AppError> {
    Decimal::from_str(raw.trim())
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid amount: {raw}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchInvoicesQuery {
    pub q: Option<String>,
    pub amount: Option<String>,
    /// Comma-separated status list, e.g. `sent,overdue`.
    pub status: Option<String>,
    #[serde(default)]
    pub include_paid: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchInvoicesResponse {
    pub invoices: Vec<InvoiceView>,
}

pub async fn search_invoices(
    State(state): State<AppState>,
    Query(query): Query<SearchInvoicesQuery>,
) -> Result<Json<SearchInvoicesResponse>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let amount = query
        .amount
        .as_deref()
        .map(parse_amount_param)
        .transpose()?;

    let statuses: Option<Vec<String>> = query
        .status
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    InvoiceStatus::parse(s)
                        .map(|status| status.as_str().to_string())
                        .ok_or_else(|| {
                            AppError::BadRequest(anyhow::anyhow!("Invalid invoice status: {s}"))
                        })
                })
                .collect::<Result<Vec<String>, AppError>>()
        })
        .transpose()?
        .filter(|statuses| !statuses.is_empty());

    let search = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());

    let invoices = state
        .db
        .search_invoices(
            search,
            amount,
            statuses.as_deref(),
            query.include_paid,
            limit,
        )
        .await?;

    Ok(Json(SearchInvoicesResponse {
        invoices: invoices.into_iter().map(InvoiceView::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatesQuery {
    pub amount: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatesResponse {
    pub candidates: Vec<CandidateInvoiceView>,
}

/// Same predicate the worker uses: unpaid invoices within one cent of
/// the amount. Used by the review UI for manual matching.
pub async fn invoice_candidates(
    State(state): State<AppState>,
    Query(query): Query<CandidatesQuery>,
) -> Result<Json<CandidatesResponse>, AppError> {
    let amount = query
        .amount
        .as_deref()
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("amount is required")))
        .and_then(parse_amount_param)?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_CANDIDATE_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let candidates = state.db.find_candidates_by_amount(amount, limit).await?;

    Ok(Json(CandidatesResponse {
        candidates: candidates
            .into_iter()
            .map(CandidateInvoiceView::from)
            .collect(),
    }))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InvoiceView>, AppError> {
    let invoice_id = parse_uuid(&id, "invoice id")?;

    let invoice = state
        .db
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    Ok(Json(InvoiceView::from(invoice)))
}

pub async fn get_invoice_by_number(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<InvoiceView>, AppError> {
    let invoice = state
        .db
        .get_invoice_by_number(&number)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice not found")))?;

    Ok(Json(InvoiceView::from(invoice)))
}

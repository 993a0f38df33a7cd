//! Batch worker: streams an uploaded CSV, classifies every row against
//! candidate invoices, and persists the outcome.
//!
//! Rows are buffered into fixed-size chunks. Each chunk costs one
//! candidate query and one bulk insert, so memory stays bounded at
//! `CHUNK_SIZE` rows regardless of file size. The job as a whole is
//! idempotent: processing starts by resetting the batch, which clears
//! any rows left behind by a prior attempt.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use service_core::error::AppError;

use crate::matching::{MatchOutcome, match_transaction};
use crate::models::{AuditAction, CandidateInvoice, SYSTEM_ACTOR, TransactionStatus};
use crate::services::csv::{CsvTransactionReader, ParsedRow};
use crate::services::database::{Database, NewAuditEntry, NewTransaction};
use crate::services::metrics::{record_batch_job, record_transaction_outcome};
use crate::services::progress::{ProgressDelta, ProgressMirror};

pub const CHUNK_SIZE: usize = 1000;

#[derive(Debug, Default, Clone, Copy)]
struct RunningCounters {
    total: i32,
    auto_matched: i32,
    needs_review: i32,
    unmatched: i32,
}

pub struct BatchWorker {
    db: Arc<Database>,
    mirror: Arc<dyn ProgressMirror>,
}

impl BatchWorker {
    pub fn new(db: Arc<Database>, mirror: Arc<dyn ProgressMirror>) -> Self {
        Self { db, mirror }
    }

    /// Process one batch job end to end. Failures mark the batch
    /// `failed` and propagate so the queue can retry; the uploaded file
    /// is removed on every exit path.
    #[instrument(skip(self, file_path), fields(batch_id = %batch_id))]
    pub async fn process(&self, batch_id: Uuid, file_path: &Path) -> Result<(), AppError> {
        let result = self.run(batch_id, file_path).await;

        if let Err(e) = &result {
            warn!(batch_id = %batch_id, error = %e, "Batch processing failed");
            record_batch_job("failed");
            if let Err(mark_err) = self.db.mark_batch_failed(batch_id).await {
                warn!(batch_id = %batch_id, error = %mark_err, "Failed to mark batch failed");
            }
            self.mirror.set_status(batch_id, "failed").await;
        }

        if let Err(e) = tokio::fs::remove_file(file_path).await {
            warn!(
                batch_id = %batch_id,
                path = %file_path.display(),
                error = %e,
                "Failed to remove uploaded file"
            );
        }

        result
    }

    async fn run(&self, batch_id: Uuid, file_path: &Path) -> Result<(), AppError> {
        self.db.reset_batch_for_processing(batch_id).await?;
        self.mirror.init(batch_id).await;

        let mut reader = CsvTransactionReader::open(file_path)?;
        let mut counters = RunningCounters::default();

        loop {
            let chunk: Vec<ParsedRow> = reader.by_ref().take(CHUNK_SIZE).collect();
            if chunk.is_empty() {
                break;
            }
            let chunk_counters = self.process_chunk(batch_id, &chunk).await?;

            counters.total += chunk_counters.total;
            counters.auto_matched += chunk_counters.auto_matched;
            counters.needs_review += chunk_counters.needs_review;
            counters.unmatched += chunk_counters.unmatched;

            self.mirror
                .increment(
                    batch_id,
                    ProgressDelta {
                        processed: i64::from(chunk_counters.total),
                        auto_matched: i64::from(chunk_counters.auto_matched),
                        needs_review: i64::from(chunk_counters.needs_review),
                        unmatched: i64::from(chunk_counters.unmatched),
                    },
                )
                .await;
        }

        self.db
            .finalize_batch_counters(
                batch_id,
                counters.total,
                counters.auto_matched,
                counters.needs_review,
                counters.unmatched,
            )
            .await?;
        self.mirror.set_total(batch_id, i64::from(counters.total)).await;

        self.write_auto_match_audit(batch_id).await?;

        self.db.mark_batch_completed(batch_id).await?;
        self.mirror.set_status(batch_id, "completed").await;
        record_batch_job("completed");

        info!(
            batch_id = %batch_id,
            total = counters.total,
            auto_matched = counters.auto_matched,
            needs_review = counters.needs_review,
            unmatched = counters.unmatched,
            "Batch processing completed"
        );
        Ok(())
    }

    async fn process_chunk(
        &self,
        batch_id: Uuid,
        rows: &[ParsedRow],
    ) -> Result<RunningCounters, AppError> {
        let mut amounts: Vec<Decimal> = Vec::new();
        for row in rows {
            if !amounts.contains(&row.amount) {
                amounts.push(row.amount);
            }
        }

        let candidates_by_amount = self.db.find_candidate_invoices_by_amounts(&amounts).await?;
        let empty: Vec<CandidateInvoice> = Vec::new();

        let mut counters = RunningCounters::default();
        let mut new_rows = Vec::with_capacity(rows.len());

        for row in rows {
            let candidates = candidates_by_amount
                .get(&amount_key(row.amount))
                .unwrap_or(&empty);

            let result = match_transaction(&row.description, row.transaction_date, candidates);

            let status = match result.outcome {
                MatchOutcome::AutoMatched => {
                    counters.auto_matched += 1;
                    TransactionStatus::AutoMatched
                }
                MatchOutcome::NeedsReview => {
                    counters.needs_review += 1;
                    TransactionStatus::NeedsReview
                }
                MatchOutcome::Unmatched => {
                    counters.unmatched += 1;
                    TransactionStatus::Unmatched
                }
            };
            counters.total += 1;
            record_transaction_outcome(result.outcome.as_str());

            new_rows.push(NewTransaction {
                transaction_id: Uuid::new_v4(),
                upload_batch_id: batch_id,
                transaction_date: row.transaction_date,
                description: row.description.clone(),
                amount: row.amount,
                reference_number: row.reference_number.clone(),
                status,
                matched_invoice_id: result.matched_invoice_id,
                confidence_score: result.confidence,
                match_details: serde_json::to_value(&result.details)
                    .unwrap_or(serde_json::Value::Null),
            });
        }

        self.db.bulk_insert_transactions(&new_rows).await?;
        Ok(counters)
    }

    /// Auto-matches get a system audit entry. The bulk transaction
    /// insert does not return ids, so the rows are recovered with one
    /// batch-scoped query and audited with one bulk insert.
    async fn write_auto_match_audit(&self, batch_id: Uuid) -> Result<(), AppError> {
        let auto_matched = self.db.list_auto_matched(batch_id).await?;
        if auto_matched.is_empty() {
            return Ok(());
        }

        let entries: Vec<NewAuditEntry> = auto_matched
            .into_iter()
            .map(|row| {
                let confidence = row
                    .confidence_score
                    .map(|score| score.to_string())
                    .unwrap_or_else(|| "0".to_string());
                NewAuditEntry {
                    transaction_id: row.transaction_id,
                    action: AuditAction::AutoMatched,
                    previous_invoice_id: None,
                    new_invoice_id: Some(row.matched_invoice_id),
                    performed_by: SYSTEM_ACTOR.to_string(),
                    reason: Some(format!("Auto-matched with {confidence}% confidence")),
                }
            })
            .collect();

        self.db.bulk_insert_audit(&entries).await
    }
}

/// Canonical 2-decimal key used to join chunk rows with grouped
/// candidates.
fn amount_key(amount: Decimal) -> String {
    let mut key = amount;
    key.rescale(2);
    key.to_string()
}

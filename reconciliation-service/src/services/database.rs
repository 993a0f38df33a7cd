//! Database service for reconciliation-service.
//!
//! The authoritative store. All cross-component invariants live here;
//! the progress mirror and job queue are advisory layers on top.

#![allow(clippy::too_many_arguments)]

use crate::models::{
    AdminAction, AuditAction, BankTransaction, CandidateInvoice, Invoice, ReconciliationBatch,
    TransactionStatus,
};
use crate::services::cursor::ListCursor;
use crate::services::metrics::DB_QUERY_DURATION;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// A classified transaction row ready for bulk insertion.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_id: Uuid,
    pub upload_batch_id: Uuid,
    pub transaction_date: chrono::NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub reference_number: Option<String>,
    pub status: TransactionStatus,
    pub matched_invoice_id: Option<Uuid>,
    pub confidence_score: Decimal,
    pub match_details: serde_json::Value,
}

/// An audit row ready for bulk insertion.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub transaction_id: Uuid,
    pub action: AuditAction,
    pub previous_invoice_id: Option<Uuid>,
    pub new_invoice_id: Option<Uuid>,
    pub performed_by: String,
    pub reason: Option<String>,
}

/// Counter deltas applied atomically to a batch row.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterDelta {
    pub processed: i32,
    pub auto_matched: i32,
    pub needs_review: i32,
    pub unmatched: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AutoMatchedRow {
    pub transaction_id: Uuid,
    pub matched_invoice_id: Uuid,
    pub confidence_score: Option<Decimal>,
}

const BATCH_COLUMNS: &str = "batch_id, original_filename, status, total_transactions, \
     processed_count, auto_matched_count, needs_review_count, unmatched_count, \
     started_utc, completed_utc, created_utc, updated_utc";

const TRANSACTION_COLUMNS: &str = "transaction_id, upload_batch_id, transaction_date, \
     description, amount, reference_number, status, matched_invoice_id, confidence_score, \
     match_details, created_utc";

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, customer_name, customer_email, \
     amount, due_date, status, paid_utc, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "reconciliation-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Batch Operations
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn create_batch(&self, filename: &str) -> Result<ReconciliationBatch, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_batch"])
            .start_timer();

        let batch_id = Uuid::new_v4();
        let batch = sqlx::query_as::<_, ReconciliationBatch>(&format!(
            r#"
            INSERT INTO reconciliation_batches (batch_id, original_filename, status)
            VALUES ($1, $2, 'uploading')
            RETURNING {BATCH_COLUMNS}
            "#,
        ))
        .bind(batch_id)
        .bind(filename)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create batch: {}", e)))?;

        timer.observe_duration();
        info!(batch_id = %batch.batch_id, filename = %filename, "Batch created");

        Ok(batch)
    }

    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn get_batch(&self, batch_id: Uuid) -> Result<Option<ReconciliationBatch>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_batch"])
            .start_timer();

        let batch = sqlx::query_as::<_, ReconciliationBatch>(&format!(
            r#"
            SELECT {BATCH_COLUMNS}
            FROM reconciliation_batches
            WHERE batch_id = $1
            "#,
        ))
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get batch: {}", e)))?;

        timer.observe_duration();
        Ok(batch)
    }

    #[instrument(skip(self))]
    pub async fn list_batches(
        &self,
        status: Option<&str>,
        limit: i64,
        offset: i64,
        sort_by: &str,
        sort_descending: bool,
    ) -> Result<(Vec<ReconciliationBatch>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_batches"])
            .start_timer();

        // Sort keys come from a closed set validated by the handler;
        // only whitelisted column names reach the query text.
        let sort_column = match sort_by {
            "updatedAt" => "updated_utc",
            _ => "created_utc",
        };
        let direction = if sort_descending { "DESC" } else { "ASC" };

        let batches = sqlx::query_as::<_, ReconciliationBatch>(&format!(
            r#"
            SELECT {BATCH_COLUMNS}
            FROM reconciliation_batches
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY {sort_column} {direction}, batch_id {direction}
            LIMIT $2 OFFSET $3
            "#,
        ))
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list batches: {}", e)))?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM reconciliation_batches
            WHERE ($1::text IS NULL OR status = $1)
            "#,
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count batches: {}", e)))?;

        timer.observe_duration();
        Ok((batches, total))
    }

    /// Prepare a batch for (re)processing: drop any transactions from a
    /// prior attempt, zero the counters and restart the clock, all in
    /// one transaction. This is what makes queue re-delivery idempotent.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn reset_batch_for_processing(&self, batch_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reset_batch_for_processing"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM bank_transactions
            WHERE upload_batch_id = $1
            "#,
        )
        .bind(batch_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to clear prior transactions: {}", e))
        })?;

        sqlx::query(
            r#"
            UPDATE reconciliation_batches
            SET status = 'processing',
                total_transactions = 0,
                processed_count = 0,
                auto_matched_count = 0,
                needs_review_count = 0,
                unmatched_count = 0,
                started_utc = NOW(),
                completed_utc = NULL,
                updated_utc = NOW()
            WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reset batch: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit batch reset: {}", e))
        })?;

        timer.observe_duration();
        info!(
            batch_id = %batch_id,
            cleared = deleted.rows_affected(),
            "Batch reset for processing"
        );
        Ok(())
    }

    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn set_batch_total(&self, batch_id: Uuid, total: i32) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_batch_total"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE reconciliation_batches
            SET total_transactions = $2, updated_utc = NOW()
            WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .bind(total)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to set batch total: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn increment_batch_counters(
        &self,
        batch_id: Uuid,
        delta: CounterDelta,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["increment_batch_counters"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE reconciliation_batches
            SET processed_count = processed_count + $2,
                auto_matched_count = auto_matched_count + $3,
                needs_review_count = needs_review_count + $4,
                unmatched_count = unmatched_count + $5,
                updated_utc = NOW()
            WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .bind(delta.processed)
        .bind(delta.auto_matched)
        .bind(delta.needs_review)
        .bind(delta.unmatched)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to increment counters: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    /// Single authoritative counter write performed by the worker after
    /// the last chunk, establishing `processed = total`.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn finalize_batch_counters(
        &self,
        batch_id: Uuid,
        total: i32,
        auto_matched: i32,
        needs_review: i32,
        unmatched: i32,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["finalize_batch_counters"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE reconciliation_batches
            SET total_transactions = $2,
                processed_count = $2,
                auto_matched_count = $3,
                needs_review_count = $4,
                unmatched_count = $5,
                updated_utc = NOW()
            WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .bind(total)
        .bind(auto_matched)
        .bind(needs_review)
        .bind(unmatched)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to finalize counters: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn mark_batch_completed(&self, batch_id: Uuid) -> Result<(), AppError> {
        self.mark_batch_terminal(batch_id, "completed").await
    }

    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn mark_batch_failed(&self, batch_id: Uuid) -> Result<(), AppError> {
        self.mark_batch_terminal(batch_id, "failed").await
    }

    async fn mark_batch_terminal(&self, batch_id: Uuid, status: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_batch_terminal"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE reconciliation_batches
            SET status = $2, completed_utc = NOW(), updated_utc = NOW()
            WHERE batch_id = $1
            "#,
        )
        .bind(batch_id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark batch {}: {}", status, e))
        })?;

        timer.observe_duration();
        info!(batch_id = %batch_id, status = %status, "Batch reached terminal status");
        Ok(())
    }

    // =========================================================================
    // Transaction Bulk Operations
    // =========================================================================

    /// Insert a chunk of classified transactions in a single round trip.
    #[instrument(skip(self, rows), fields(count = rows.len()))]
    pub async fn bulk_insert_transactions(&self, rows: &[NewTransaction]) -> Result<(), AppError> {
        if rows.is_empty() {
            return Ok(());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["bulk_insert_transactions"])
            .start_timer();

        let mut ids = Vec::with_capacity(rows.len());
        let mut batch_ids = Vec::with_capacity(rows.len());
        let mut dates = Vec::with_capacity(rows.len());
        let mut descriptions = Vec::with_capacity(rows.len());
        let mut amounts = Vec::with_capacity(rows.len());
        let mut references = Vec::with_capacity(rows.len());
        let mut statuses = Vec::with_capacity(rows.len());
        let mut invoice_ids = Vec::with_capacity(rows.len());
        let mut scores = Vec::with_capacity(rows.len());
        let mut details = Vec::with_capacity(rows.len());

        for row in rows {
            ids.push(row.transaction_id);
            batch_ids.push(row.upload_batch_id);
            dates.push(row.transaction_date);
            descriptions.push(row.description.clone());
            amounts.push(row.amount);
            references.push(row.reference_number.clone());
            statuses.push(row.status.as_str().to_string());
            invoice_ids.push(row.matched_invoice_id);
            scores.push(row.confidence_score);
            details.push(row.match_details.clone());
        }

        sqlx::query(
            r#"
            INSERT INTO bank_transactions
                (transaction_id, upload_batch_id, transaction_date, description, amount,
                 reference_number, status, matched_invoice_id, confidence_score, match_details)
            SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::date[], $4::text[], $5::numeric[],
                $6::text[], $7::text[], $8::uuid[], $9::numeric[], $10::jsonb[])
            "#,
        )
        .bind(&ids)
        .bind(&batch_ids)
        .bind(&dates)
        .bind(&descriptions)
        .bind(&amounts)
        .bind(&references)
        .bind(&statuses)
        .bind(&invoice_ids)
        .bind(&scores)
        .bind(&details)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to bulk insert transactions: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    /// Insert audit entries in a single round trip.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub async fn bulk_insert_audit(&self, entries: &[NewAuditEntry]) -> Result<(), AppError> {
        if entries.is_empty() {
            return Ok(());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["bulk_insert_audit"])
            .start_timer();

        self.bulk_insert_audit_with(&self.pool, entries).await?;

        timer.observe_duration();
        Ok(())
    }

    async fn bulk_insert_audit_with<'e, E>(
        &self,
        executor: E,
        entries: &[NewAuditEntry],
    ) -> Result<(), AppError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let mut audit_ids = Vec::with_capacity(entries.len());
        let mut transaction_ids = Vec::with_capacity(entries.len());
        let mut actions = Vec::with_capacity(entries.len());
        let mut previous = Vec::with_capacity(entries.len());
        let mut new = Vec::with_capacity(entries.len());
        let mut actors = Vec::with_capacity(entries.len());
        let mut reasons = Vec::with_capacity(entries.len());

        for entry in entries {
            audit_ids.push(Uuid::new_v4());
            transaction_ids.push(entry.transaction_id);
            actions.push(entry.action.as_str().to_string());
            previous.push(entry.previous_invoice_id);
            new.push(entry.new_invoice_id);
            actors.push(entry.performed_by.clone());
            reasons.push(entry.reason.clone());
        }

        sqlx::query(
            r#"
            INSERT INTO match_audit_log
                (audit_id, transaction_id, action, previous_invoice_id, new_invoice_id,
                 performed_by, reason)
            SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::text[], $4::uuid[], $5::uuid[],
                $6::text[], $7::text[])
            "#,
        )
        .bind(&audit_ids)
        .bind(&transaction_ids)
        .bind(&actions)
        .bind(&previous)
        .bind(&new)
        .bind(&actors)
        .bind(&reasons)
        .execute(executor)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to bulk insert audit: {}", e))
        })?;

        Ok(())
    }

    /// Worker-side recovery query: the auto-matched rows of a batch
    /// that need an audit entry after the bulk insert.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn list_auto_matched(&self, batch_id: Uuid) -> Result<Vec<AutoMatchedRow>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_auto_matched"])
            .start_timer();

        let rows = sqlx::query_as::<_, AutoMatchedRow>(
            r#"
            SELECT transaction_id, matched_invoice_id, confidence_score
            FROM bank_transactions
            WHERE upload_batch_id = $1
              AND status = 'auto_matched'
              AND matched_invoice_id IS NOT NULL
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list auto-matched rows: {}", e))
        })?;

        timer.observe_duration();
        Ok(rows)
    }

    // =========================================================================
    // Candidate Lookup
    // =========================================================================

    /// One bulk query per chunk: unpaid invoices whose amount appears
    /// in the chunk, grouped by 2-decimal amount string for O(1) lookup.
    #[instrument(skip(self, amounts), fields(amounts = amounts.len()))]
    pub async fn find_candidate_invoices_by_amounts(
        &self,
        amounts: &[Decimal],
    ) -> Result<HashMap<String, Vec<CandidateInvoice>>, AppError> {
        if amounts.is_empty() {
            return Ok(HashMap::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_candidate_invoices_by_amounts"])
            .start_timer();

        let candidates = sqlx::query_as::<_, CandidateInvoice>(
            r#"
            SELECT invoice_id, invoice_number, customer_name, amount, due_date
            FROM invoices
            WHERE status <> 'paid' AND amount = ANY($1)
            "#,
        )
        .bind(amounts)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find candidates: {}", e))
        })?;

        let mut grouped: HashMap<String, Vec<CandidateInvoice>> = HashMap::new();
        for candidate in candidates {
            let mut key = candidate.amount;
            key.rescale(2);
            grouped.entry(key.to_string()).or_default().push(candidate);
        }

        timer.observe_duration();
        Ok(grouped)
    }

    /// Candidates for manual matching: unpaid, amount within one cent.
    #[instrument(skip(self))]
    pub async fn find_candidates_by_amount(
        &self,
        amount: Decimal,
        limit: i64,
    ) -> Result<Vec<CandidateInvoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_candidates_by_amount"])
            .start_timer();

        let candidates = sqlx::query_as::<_, CandidateInvoice>(
            r#"
            SELECT invoice_id, invoice_number, customer_name, amount, due_date
            FROM invoices
            WHERE status <> 'paid'
              AND amount BETWEEN $1 - 0.01 AND $1 + 0.01
            ORDER BY due_date ASC, created_utc DESC
            LIMIT $2
            "#,
        )
        .bind(amount)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find candidates: {}", e))
        })?;

        timer.observe_duration();
        Ok(candidates)
    }

    // =========================================================================
    // Invoice Operations
    // =========================================================================

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE invoice_id = $1
            "#,
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_number = %invoice_number))]
    pub async fn get_invoice_by_number(
        &self,
        invoice_number: &str,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice_by_number"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE invoice_number = $1
            "#,
        ))
        .bind(invoice_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice by number: {}", e))
        })?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self))]
    pub async fn search_invoices(
        &self,
        query: Option<&str>,
        amount: Option<Decimal>,
        statuses: Option<&[String]>,
        include_paid: bool,
        limit: i64,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["search_invoices"])
            .start_timer();

        // An explicit status set overrides the default unpaid-only
        // predicate; so does includePaid.
        let allow_paid = include_paid || statuses.is_some();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE ($1::numeric IS NULL OR amount BETWEEN $1 - 0.01 AND $1 + 0.01)
              AND ($2::text[] IS NULL OR status = ANY($2))
              AND ($3::boolean OR status <> 'paid')
              AND ($4::text IS NULL OR customer_name ILIKE '%' || $4 || '%')
            ORDER BY due_date ASC, created_utc DESC
            LIMIT $5
            "#,
        ))
        .bind(amount)
        .bind(statuses)
        .bind(allow_paid)
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to search invoices: {}", e))
        })?;

        timer.observe_duration();
        Ok(invoices)
    }

    // =========================================================================
    // Transaction Reads
    // =========================================================================

    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn get_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<BankTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_transaction"])
            .start_timer();

        let transaction = sqlx::query_as::<_, BankTransaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM bank_transactions
            WHERE transaction_id = $1
            "#,
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get transaction: {}", e))
        })?;

        timer.observe_duration();
        Ok(transaction)
    }

    /// Cursor page over a batch's transactions, ordered by
    /// `(created_utc DESC, transaction_id DESC)`. Reads one extra row
    /// to decide `has_more`; the cursor of the last returned row is
    /// handed back only when another page exists.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn list_batch_transactions(
        &self,
        batch_id: Uuid,
        status: Option<&str>,
        cursor: Option<ListCursor>,
        limit: i64,
    ) -> Result<(Vec<BankTransaction>, Option<ListCursor>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_batch_transactions"])
            .start_timer();

        let (cursor_created, cursor_id) = match cursor {
            Some(c) => (Some(c.created_utc), Some(c.id)),
            None => (None, None),
        };

        let mut transactions = sqlx::query_as::<_, BankTransaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM bank_transactions
            WHERE upload_batch_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL
                   OR (created_utc, transaction_id) < ($3, $4::uuid))
            ORDER BY created_utc DESC, transaction_id DESC
            LIMIT $5
            "#,
        ))
        .bind(batch_id)
        .bind(status)
        .bind(cursor_created)
        .bind(cursor_id)
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list transactions: {}", e))
        })?;

        let has_more = transactions.len() > limit as usize;
        if has_more {
            transactions.pop();
        }
        let next_cursor = if has_more {
            transactions
                .last()
                .map(|t| ListCursor::new(t.created_utc, t.transaction_id))
        } else {
            None
        };

        timer.observe_duration();
        Ok((transactions, next_cursor))
    }

    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn list_audit_entries(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<crate::models::MatchAuditEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_audit_entries"])
            .start_timer();

        let entries = sqlx::query_as::<_, crate::models::MatchAuditEntry>(
            r#"
            SELECT audit_id, transaction_id, action, previous_invoice_id, new_invoice_id,
                   performed_by, reason, created_utc
            FROM match_audit_log
            WHERE transaction_id = $1
            ORDER BY created_utc DESC, audit_id DESC
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list audit entries: {}", e))
        })?;

        timer.observe_duration();
        Ok(entries)
    }

    // =========================================================================
    // Admin Actions (Transaction State Machine)
    // =========================================================================

    /// Apply one admin action atomically with its audit entry.
    ///
    /// The transition is validated against the row re-read inside the
    /// transaction, and the UPDATE carries a status guard so a
    /// concurrent transition cannot be overwritten: the loser sees zero
    /// rows and reports `invalid_state`.
    #[instrument(skip(self, action), fields(transaction_id = %transaction_id, action = action.name()))]
    pub async fn apply_admin_action(
        &self,
        transaction_id: Uuid,
        action: &AdminAction,
        performed_by: &str,
    ) -> Result<(BankTransaction, Uuid), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_admin_action"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let current = sqlx::query_as::<_, BankTransaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM bank_transactions
            WHERE transaction_id = $1
            "#,
        ))
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to read transaction: {}", e))
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

        let current_status = TransactionStatus::parse(&current.status).ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Unknown transaction status: {}",
                current.status
            ))
        })?;

        if !action.is_allowed_from(current_status) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid state: cannot {} a transaction in status {}",
                action.name(),
                current.status
            )));
        }

        if let AdminAction::ManualMatch { invoice_id, .. } = action {
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS(SELECT 1 FROM invoices WHERE invoice_id = $1)")
                    .bind(invoice_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| {
                        AppError::DatabaseError(anyhow::anyhow!(
                            "Failed to check invoice: {}",
                            e
                        ))
                    })?;
            if !exists {
                return Err(AppError::BadRequest(anyhow::anyhow!("Invoice not found")));
            }
        }

        let new_invoice_id = action.invoice_effect(current.matched_invoice_id);

        let updated = sqlx::query_as::<_, BankTransaction>(&format!(
            r#"
            UPDATE bank_transactions
            SET status = $3, matched_invoice_id = $4
            WHERE transaction_id = $1 AND status = $2
            RETURNING {TRANSACTION_COLUMNS}
            "#,
        ))
        .bind(transaction_id)
        .bind(&current.status)
        .bind(action.target().as_str())
        .bind(new_invoice_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update transaction: {}", e))
        })?
        .ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Invalid state: transaction was modified concurrently"
            ))
        })?;

        let audit_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO match_audit_log
                (audit_id, transaction_id, action, previous_invoice_id, new_invoice_id,
                 performed_by, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(audit_id)
        .bind(transaction_id)
        .bind(action.audit_action().as_str())
        .bind(current.matched_invoice_id)
        .bind(updated.matched_invoice_id)
        .bind(performed_by)
        .bind(action.reason())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to append audit entry: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit admin action: {}", e))
        })?;

        timer.observe_duration();
        info!(
            transaction_id = %transaction_id,
            action = action.name(),
            new_status = updated.status,
            "Admin action applied"
        );

        Ok((updated, audit_id))
    }

    /// Confirm every auto-matched transaction of a batch in one
    /// transaction. The UPDATE is double-guarded on batch and status so
    /// rows confirmed concurrently by per-row calls drop out instead of
    /// being audited twice.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn bulk_confirm_auto(
        &self,
        batch_id: Uuid,
        performed_by: &str,
    ) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["bulk_confirm_auto"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let eligible: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT transaction_id
            FROM bank_transactions
            WHERE upload_batch_id = $1 AND status = 'auto_matched'
            "#,
        )
        .bind(batch_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to select auto-matched: {}", e))
        })?;

        if eligible.is_empty() {
            tx.commit().await.map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to commit: {}", e))
            })?;
            timer.observe_duration();
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = eligible.into_iter().map(|(id,)| id).collect();

        let confirmed: Vec<(Uuid, Option<Uuid>)> = sqlx::query_as(
            r#"
            UPDATE bank_transactions
            SET status = 'confirmed'
            WHERE transaction_id = ANY($1) AND status = 'auto_matched'
            RETURNING transaction_id, matched_invoice_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to bulk confirm: {}", e))
        })?;

        let entries: Vec<NewAuditEntry> = confirmed
            .iter()
            .map(|(transaction_id, matched_invoice_id)| NewAuditEntry {
                transaction_id: *transaction_id,
                action: AuditAction::Confirmed,
                previous_invoice_id: *matched_invoice_id,
                new_invoice_id: *matched_invoice_id,
                performed_by: performed_by.to_string(),
                reason: Some("Bulk confirmation of auto-matched transactions".to_string()),
            })
            .collect();

        self.bulk_insert_audit_with(&mut *tx, &entries).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit bulk confirm: {}", e))
        })?;

        timer.observe_duration();
        info!(
            batch_id = %batch_id,
            confirmed = confirmed.len(),
            "Bulk confirmation applied"
        );

        Ok(confirmed.into_iter().map(|(id, _)| id).collect())
    }
}

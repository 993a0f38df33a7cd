//! Domain models for reconciliation-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Invoice Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "paid" => Some(Self::Paid),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub status: String,
    pub paid_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

/// Candidate row returned by the bulk amount lookup. Carries only the
/// fields the matcher needs.
#[derive(Debug, Clone, FromRow)]
pub struct CandidateInvoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub customer_name: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceView {
    pub id: Uuid,
    pub invoice_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Invoice> for InvoiceView {
    fn from(i: Invoice) -> Self {
        Self {
            id: i.invoice_id,
            invoice_number: i.invoice_number,
            customer_name: i.customer_name,
            customer_email: i.customer_email,
            amount: i.amount,
            due_date: i.due_date,
            status: i.status,
            paid_at: i.paid_utc,
            created_at: i.created_utc,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInvoiceView {
    pub id: Uuid,
    pub invoice_number: String,
    pub customer_name: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

impl From<CandidateInvoice> for CandidateInvoiceView {
    fn from(c: CandidateInvoice) -> Self {
        Self {
            id: c.invoice_id,
            invoice_number: c.invoice_number,
            customer_name: c.customer_name,
            amount: c.amount,
            due_date: c.due_date,
        }
    }
}

// ============================================================================
// Batch Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "uploading" => Self::Uploading,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Uploading,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ReconciliationBatch {
    pub batch_id: Uuid,
    pub original_filename: String,
    pub status: String,
    pub total_transactions: i32,
    pub processed_count: i32,
    pub auto_matched_count: i32,
    pub needs_review_count: i32,
    pub unmatched_count: i32,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchView {
    pub id: Uuid,
    pub filename: String,
    pub status: String,
    pub total_transactions: i32,
    pub processed_count: i32,
    pub auto_matched_count: i32,
    pub needs_review_count: i32,
    pub unmatched_count: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ReconciliationBatch> for BatchView {
    fn from(b: ReconciliationBatch) -> Self {
        Self {
            id: b.batch_id,
            filename: b.original_filename,
            status: b.status,
            total_transactions: b.total_transactions,
            processed_count: b.processed_count,
            auto_matched_count: b.auto_matched_count,
            needs_review_count: b.needs_review_count,
            unmatched_count: b.unmatched_count,
            started_at: b.started_utc,
            completed_at: b.completed_utc,
            created_at: b.created_utc,
            updated_at: b.updated_utc,
        }
    }
}

// ============================================================================
// Transaction Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    AutoMatched,
    NeedsReview,
    Unmatched,
    Confirmed,
    External,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AutoMatched => "auto_matched",
            Self::NeedsReview => "needs_review",
            Self::Unmatched => "unmatched",
            Self::Confirmed => "confirmed",
            Self::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "auto_matched" => Some(Self::AutoMatched),
            "needs_review" => Some(Self::NeedsReview),
            "unmatched" => Some(Self::Unmatched),
            "confirmed" => Some(Self::Confirmed),
            "external" => Some(Self::External),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BankTransaction {
    pub transaction_id: Uuid,
    pub upload_batch_id: Uuid,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub reference_number: Option<String>,
    pub status: String,
    pub matched_invoice_id: Option<Uuid>,
    pub confidence_score: Option<Decimal>,
    pub match_details: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub reference_number: Option<String>,
    pub status: String,
    pub matched_invoice_id: Option<Uuid>,
    pub confidence_score: Option<Decimal>,
    pub match_details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<BankTransaction> for TransactionView {
    fn from(t: BankTransaction) -> Self {
        Self {
            id: t.transaction_id,
            batch_id: t.upload_batch_id,
            transaction_date: t.transaction_date,
            description: t.description,
            amount: t.amount,
            reference_number: t.reference_number,
            status: t.status,
            matched_invoice_id: t.matched_invoice_id,
            confidence_score: t.confidence_score,
            match_details: t.match_details,
            created_at: t.created_utc,
        }
    }
}

// ============================================================================
// Admin Actions and the Transaction State Machine
// ============================================================================

/// An admin disposition applied to a single transaction. The transition
/// table lives here so it can be validated without touching the store.
#[derive(Debug, Clone)]
pub enum AdminAction {
    Confirm,
    Reject { reason: Option<String> },
    ManualMatch { invoice_id: Uuid, reason: Option<String> },
    MarkExternal { reason: Option<String> },
}

impl AdminAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Reject { .. } => "reject",
            Self::ManualMatch { .. } => "manual_match",
            Self::MarkExternal { .. } => "mark_external",
        }
    }

    pub fn allowed_from(&self) -> &'static [TransactionStatus] {
        match self {
            Self::Confirm => &[TransactionStatus::AutoMatched, TransactionStatus::NeedsReview],
            Self::Reject { .. } => {
                &[TransactionStatus::AutoMatched, TransactionStatus::NeedsReview]
            }
            Self::ManualMatch { .. } => {
                &[TransactionStatus::NeedsReview, TransactionStatus::Unmatched]
            }
            Self::MarkExternal { .. } => &[TransactionStatus::Unmatched],
        }
    }

    pub fn target(&self) -> TransactionStatus {
        match self {
            Self::Confirm => TransactionStatus::Confirmed,
            Self::Reject { .. } => TransactionStatus::Unmatched,
            Self::ManualMatch { .. } => TransactionStatus::Confirmed,
            Self::MarkExternal { .. } => TransactionStatus::External,
        }
    }

    /// The `matched_invoice_id` the row ends up with, given its current
    /// value.
    pub fn invoice_effect(&self, current: Option<Uuid>) -> Option<Uuid> {
        match self {
            Self::Confirm => current,
            Self::Reject { .. } => None,
            Self::ManualMatch { invoice_id, .. } => Some(*invoice_id),
            Self::MarkExternal { .. } => None,
        }
    }

    pub fn audit_action(&self) -> AuditAction {
        match self {
            Self::Confirm => AuditAction::Confirmed,
            Self::Reject { .. } => AuditAction::Rejected,
            Self::ManualMatch { .. } => AuditAction::ManualMatched,
            Self::MarkExternal { .. } => AuditAction::MarkedExternal,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Confirm => None,
            Self::Reject { reason }
            | Self::ManualMatch { reason, .. }
            | Self::MarkExternal { reason } => reason.as_deref(),
        }
    }

    pub fn is_allowed_from(&self, current: TransactionStatus) -> bool {
        self.allowed_from().contains(&current)
    }
}

// ============================================================================
// Audit Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    AutoMatched,
    Confirmed,
    Rejected,
    ManualMatched,
    MarkedExternal,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoMatched => "auto_matched",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::ManualMatched => "manual_matched",
            Self::MarkedExternal => "marked_external",
        }
    }
}

/// Actor recorded on worker-written audit rows. Reserved; admin calls
/// must supply a different identifier.
pub const SYSTEM_ACTOR: &str = "system";

/// Default actor for admin calls that omit `performedBy`.
pub const DEFAULT_ADMIN_ACTOR: &str = "admin";

#[derive(Debug, Clone, FromRow)]
pub struct MatchAuditEntry {
    pub audit_id: Uuid,
    pub transaction_id: Uuid,
    pub action: String,
    pub previous_invoice_id: Option<Uuid>,
    pub new_invoice_id: Option<Uuid>,
    pub performed_by: String,
    pub reason: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntryView {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub action: String,
    pub previous_invoice_id: Option<Uuid>,
    pub new_invoice_id: Option<Uuid>,
    pub performed_by: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<MatchAuditEntry> for AuditEntryView {
    fn from(e: MatchAuditEntry) -> Self {
        Self {
            id: e.audit_id,
            transaction_id: e.transaction_id,
            action: e.action,
            previous_invoice_id: e.previous_invoice_id,
            new_invoice_id: e.new_invoice_id,
            performed_by: e.performed_by,
            reason: e.reason,
            created_at: e.created_utc,
        }
    }
}

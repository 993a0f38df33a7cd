//! HTTP handlers for the reconciliation API.

pub mod health;
pub mod invoices;
pub mod metrics;
pub mod reconciliation;
pub mod transactions;

use service_core::error::AppError;
use uuid::Uuid;

/// Parse a path/body identifier, surfacing the unified 400 envelope on
/// malformed input instead of the extractor's default rejection.
pub(crate) fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid {what}: {raw}")))
}

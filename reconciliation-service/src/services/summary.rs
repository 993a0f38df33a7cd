//! Derived batch summary: timing and per-class rates.

use serde::Serialize;
use uuid::Uuid;

use crate::models::{BatchStatus, ReconciliationBatch};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub filename: String,
    pub status: String,
    pub total_transactions: i32,
    pub processed_count: i32,
    pub auto_matched_count: i32,
    pub needs_review_count: i32,
    pub unmatched_count: i32,
    pub auto_matched_rate: i32,
    pub needs_review_rate: i32,
    pub unmatched_rate: i32,
    pub duration_ms: Option<i64>,
    pub duration_display: Option<String>,
    pub rows_per_sec: Option<f64>,
}

/// Whole-percent share of `processed`, 0 when nothing was processed.
fn rate_percent(count: i32, processed: i32) -> i32 {
    if processed <= 0 {
        return 0;
    }
    ((f64::from(count) * 100.0) / f64::from(processed)).round() as i32
}

fn format_duration(ms: i64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{}s", ms / 1_000)
    } else {
        let minutes = ms / 60_000;
        let seconds = (ms % 60_000) / 1_000;
        format!("{minutes}m {seconds}s")
    }
}

pub fn build_summary(batch: &ReconciliationBatch) -> BatchSummary {
    let status = BatchStatus::from_str(&batch.status);

    let duration_ms = if status.is_terminal() {
        batch
            .completed_utc
            .map(|completed| (completed - batch.started_utc).num_milliseconds())
    } else {
        None
    };

    let rows_per_sec = duration_ms.and_then(|ms| {
        if ms <= 0 {
            None
        } else {
            let rate = f64::from(batch.processed_count) / ms as f64 * 1000.0;
            Some((rate * 100.0).round() / 100.0)
        }
    });

    BatchSummary {
        batch_id: batch.batch_id,
        filename: batch.original_filename.clone(),
        status: batch.status.clone(),
        total_transactions: batch.total_transactions,
        processed_count: batch.processed_count,
        auto_matched_count: batch.auto_matched_count,
        needs_review_count: batch.needs_review_count,
        unmatched_count: batch.unmatched_count,
        auto_matched_rate: rate_percent(batch.auto_matched_count, batch.processed_count),
        needs_review_rate: rate_percent(batch.needs_review_count, batch.processed_count),
        unmatched_rate: rate_percent(batch.unmatched_count, batch.processed_count),
        duration_ms,
        duration_display: duration_ms.map(format_duration),
        rows_per_sec,
    }
}

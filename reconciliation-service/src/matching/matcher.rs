//! Candidate selection for a single transaction.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::CandidateInvoice;

use super::normalizer::normalize;
use super::scoring::{MatchBreakdown, MatchOutcome, combine, date_proximity_score};
use super::similarity::name_similarity;

/// Weight applied to name similarity when ranking candidates against
/// each other. Ranking is independent of the final confidence formula,
/// which weighs the name signal at 1.0.
const RANKING_NAME_WEIGHT: f64 = 0.7;

/// Structured explanation persisted alongside the transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDetails {
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<MatchBreakdown>,
    pub candidate_count: usize,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub outcome: MatchOutcome,
    pub matched_invoice_id: Option<Uuid>,
    pub matched_invoice_number: Option<String>,
    pub confidence: Decimal,
    pub details: MatchDetails,
}

struct ScoredCandidate<'a> {
    candidate: &'a CandidateInvoice,
    name_similarity: f64,
    date_score: i32,
    preliminary: f64,
}

fn score_candidate<'a>(
    normalized_description: &str,
    transaction_date: NaiveDate,
    candidate: &'a CandidateInvoice,
) -> ScoredCandidate<'a> {
    let name = name_similarity(normalized_description, &normalize(&candidate.customer_name));
    let date = date_proximity_score(transaction_date, candidate.due_date);
    ScoredCandidate {
        candidate,
        name_similarity: name,
        date_score: date,
        preliminary: name * RANKING_NAME_WEIGHT + f64::from(date),
    }
}

/// Match one transaction against its amount-filtered candidate set.
///
/// Candidates must already be filtered to unpaid invoices with the
/// transaction's exact amount. The winner is the candidate with the
/// highest preliminary score; ties fall to the smaller invoice id so
/// the result is independent of candidate order.
pub fn match_transaction(
    description: &str,
    transaction_date: NaiveDate,
    candidates: &[CandidateInvoice],
) -> MatchResult {
    let Some((first, rest)) = candidates.split_first() else {
        return MatchResult {
            outcome: MatchOutcome::Unmatched,
            matched_invoice_id: None,
            matched_invoice_number: None,
            confidence: Decimal::ZERO,
            details: MatchDetails {
                explanation: "No candidate invoices found with matching amount".to_string(),
                breakdown: None,
                candidate_count: 0,
            },
        };
    };

    let normalized_description = normalize(description);

    let mut winner = score_candidate(&normalized_description, transaction_date, first);
    for candidate in rest {
        let scored = score_candidate(&normalized_description, transaction_date, candidate);
        let better = scored.preliminary > winner.preliminary
            || (scored.preliminary == winner.preliminary
                && scored.candidate.invoice_id < winner.candidate.invoice_id);
        if better {
            winner = scored;
        }
    }

    let confidence = combine(winner.name_similarity, winner.date_score, candidates.len());
    let details = MatchDetails {
        explanation: confidence.explanation,
        breakdown: Some(confidence.breakdown),
        candidate_count: candidates.len(),
    };

    match confidence.outcome {
        MatchOutcome::Unmatched => MatchResult {
            outcome: MatchOutcome::Unmatched,
            matched_invoice_id: None,
            matched_invoice_number: None,
            confidence: confidence.score,
            details,
        },
        outcome => MatchResult {
            outcome,
            matched_invoice_id: Some(winner.candidate.invoice_id),
            matched_invoice_number: Some(winner.candidate.invoice_number.clone()),
            confidence: confidence.score,
            details,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    fn uuid_with(last_byte: u8) -> Uuid {
        Uuid::from_bytes([
            0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
            0xff, last_byte,
        ])
    }

    fn candidate(id: Uuid, number: &str, name: &str, due: NaiveDate) -> CandidateInvoice {
        CandidateInvoice {
            invoice_id: id,
            invoice_number: number.to_string(),
            customer_name: name.to_string(),
            amount: Decimal::new(1500_00, 2),
            due_date: due,
        }
    }

    #[test]
    fn perfect_match_clamps_to_100() {
        let inv = candidate(
            uuid_with(1),
            "INV-2024-001",
            "Acme Corporation",
            date(2024, 1, 15),
        );
        let result = match_transaction("ACME CORPORATION", date(2024, 1, 15), &[inv.clone()]);

        assert_eq!(result.outcome, MatchOutcome::AutoMatched);
        assert_eq!(result.confidence, Decimal::from(100));
        assert_eq!(result.matched_invoice_id, Some(inv.invoice_id));
        assert_eq!(result.matched_invoice_number.as_deref(), Some("INV-2024-001"));
        let breakdown = result.details.breakdown.expect("breakdown present");
        assert_eq!(breakdown.date, 15);
        assert_eq!(breakdown.ambiguity, 0);
    }

    #[test]
    fn reordered_words_in_noise_still_auto_match() {
        let inv = candidate(uuid_with(1), "INV-7", "John Smith", date(2024, 1, 15));
        let result = match_transaction("CHK DEP SMITH JOHN", date(2024, 1, 15), &[inv.clone()]);

        assert_eq!(result.outcome, MatchOutcome::AutoMatched);
        assert_eq!(result.matched_invoice_id, Some(inv.invoice_id));
    }

    #[test]
    fn ambiguous_candidate_set_lands_in_review() {
        let due = date(2024, 1, 15);
        let candidates = vec![
            candidate(uuid_with(1), "INV-1", "Smith Manufacturing", due),
            candidate(uuid_with(2), "INV-2", "Smith Manufacturing Co", due),
            candidate(uuid_with(3), "INV-3", "Smith Manufacturing LLC", due),
        ];
        let result = match_transaction("PAYMENT FROM SMITH", due, &candidates);

        let breakdown = result.details.breakdown.expect("breakdown present");
        assert_eq!(breakdown.ambiguity, 10);
        assert_eq!(result.outcome, MatchOutcome::NeedsReview);
        assert!(result.matched_invoice_id.is_some());
    }

    #[test]
    fn far_date_and_low_similarity_is_unmatched() {
        let inv = candidate(uuid_with(1), "INV-9", "XYZ Corp", date(2024, 1, 15));
        let result = match_transaction("PAYMENT ABC", date(2024, 3, 15), &[inv]);

        assert_eq!(result.outcome, MatchOutcome::Unmatched);
        assert_eq!(result.matched_invoice_id, None);
        assert_eq!(result.matched_invoice_number, None);
        let breakdown = result.details.breakdown.expect("breakdown present");
        assert_eq!(breakdown.date, -10);
    }

    #[test]
    fn empty_candidate_set_is_unmatched_with_zero_score() {
        let result = match_transaction("ACME", date(2024, 1, 15), &[]);

        assert_eq!(result.outcome, MatchOutcome::Unmatched);
        assert_eq!(result.confidence, Decimal::ZERO);
        assert_eq!(result.matched_invoice_id, None);
        assert!(result.details.breakdown.is_none());
        assert_eq!(
            result.details.explanation,
            "No candidate invoices found with matching amount"
        );
    }

    #[test]
    fn ties_break_toward_the_smaller_invoice_id() {
        let due = date(2024, 1, 15);
        let low = candidate(uuid_with(1), "INV-LOW", "Acme Corporation", due);
        let high = candidate(uuid_with(2), "INV-HIGH", "Acme Corporation", due);

        let forward = match_transaction("ACME CORPORATION", due, &[low.clone(), high.clone()]);
        let backward = match_transaction("ACME CORPORATION", due, &[high, low.clone()]);

        assert_eq!(forward.matched_invoice_id, Some(low.invoice_id));
        assert_eq!(backward.matched_invoice_id, Some(low.invoice_id));
    }

    #[test]
    fn candidate_order_does_not_change_the_result() {
        let due = date(2024, 1, 15);
        let candidates = vec![
            candidate(uuid_with(3), "INV-3", "Globex Corporation", due),
            candidate(uuid_with(1), "INV-1", "Acme Corporation", due),
            candidate(uuid_with(2), "INV-2", "Initech LLC", due),
        ];
        let mut reversed = candidates.clone();
        reversed.reverse();

        let a = match_transaction("ACME CORPORATION", due, &candidates);
        let b = match_transaction("ACME CORPORATION", due, &reversed);

        assert_eq!(a.matched_invoice_id, b.matched_invoice_id);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.details.breakdown, b.details.breakdown);
    }

    #[test]
    fn unmatched_classification_still_reports_the_score() {
        let inv = candidate(uuid_with(1), "INV-5", "Completely Different", date(2024, 1, 15));
        let result = match_transaction("SOMETHING ELSE ENTIRELY", date(2024, 3, 20), &[inv]);

        assert_eq!(result.outcome, MatchOutcome::Unmatched);
        assert_eq!(result.matched_invoice_id, None);
        assert!(result.details.breakdown.is_some());
        assert_eq!(result.details.candidate_count, 1);
    }
}

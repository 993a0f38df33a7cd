//! Score components and the confidence combiner.

use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Tiered bonus/penalty from the absolute day delta between the
/// transaction date and the candidate's due date.
pub fn date_proximity_score(a: NaiveDate, b: NaiveDate) -> i32 {
    let delta = (a - b).num_days().abs();
    if delta <= 3 {
        15
    } else if delta <= 7 {
        10
    } else if delta <= 15 {
        5
    } else if delta > 30 {
        -10
    } else {
        0
    }
}

/// Penalty grows with candidate-set cardinality: one candidate is
/// unambiguous, two casts doubt, three or more caps the penalty.
pub fn ambiguity_penalty(candidate_count: usize) -> i32 {
    match candidate_count {
        0 | 1 => 0,
        2 => 5,
        _ => 10,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    AutoMatched,
    NeedsReview,
    Unmatched,
}

impl MatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoMatched => "auto_matched",
            Self::NeedsReview => "needs_review",
            Self::Unmatched => "unmatched",
        }
    }
}

/// Per-signal contributions, stored verbatim in `match_details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchBreakdown {
    pub raw_name: f64,
    pub weighted_name: f64,
    pub date: i32,
    pub ambiguity: i32,
    pub raw_total: f64,
}

#[derive(Debug, Clone)]
pub struct Confidence {
    pub score: Decimal,
    pub outcome: MatchOutcome,
    pub breakdown: MatchBreakdown,
    pub explanation: String,
}

/// Merge the signals into a clamped, classified confidence score.
pub fn combine(name_similarity: f64, date_score: i32, candidate_count: usize) -> Confidence {
    let penalty = ambiguity_penalty(candidate_count);
    let weighted_name = name_similarity * 1.0;
    let raw_total = weighted_name + f64::from(date_score) - f64::from(penalty);

    let mut score = Decimal::from_f64(raw_total.clamp(0.0, 100.0))
        .unwrap_or_default()
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    score.rescale(2);

    let outcome = if score >= Decimal::from(95) {
        MatchOutcome::AutoMatched
    } else if score >= Decimal::from(60) {
        MatchOutcome::NeedsReview
    } else {
        MatchOutcome::Unmatched
    };

    let explanation = format!(
        "Name similarity {name_similarity:.2}, date score {date_score:+}, \
         ambiguity penalty -{penalty} over {candidate_count} candidate(s): \
         confidence {score}"
    );

    Confidence {
        score,
        outcome,
        breakdown: MatchBreakdown {
            raw_name: name_similarity,
            weighted_name,
            date: date_score,
            ambiguity: penalty,
            raw_total,
        },
        explanation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid test date")
    }

    #[test]
    fn date_tiers() {
        assert_eq!(date_proximity_score(day(15), day(15)), 15);
        assert_eq!(date_proximity_score(day(15), day(18)), 15);
        assert_eq!(date_proximity_score(day(15), day(19)), 10);
        assert_eq!(date_proximity_score(day(15), day(22)), 10);
        assert_eq!(date_proximity_score(day(15), day(23)), 5);
        assert_eq!(date_proximity_score(day(15), day(30)), 5);
        assert_eq!(date_proximity_score(day(15), day(31)), 0);
        // 30 days out is still the neutral tier, 31 is the penalty tier.
        assert_eq!(
            date_proximity_score(day(1), NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()),
            0
        );
        assert_eq!(
            date_proximity_score(day(1), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()),
            -10
        );
    }

    #[test]
    fn date_score_is_symmetric() {
        assert_eq!(
            date_proximity_score(day(1), day(20)),
            date_proximity_score(day(20), day(1))
        );
    }

    #[test]
    fn ambiguity_steps() {
        assert_eq!(ambiguity_penalty(0), 0);
        assert_eq!(ambiguity_penalty(1), 0);
        assert_eq!(ambiguity_penalty(2), 5);
        assert_eq!(ambiguity_penalty(3), 10);
        assert_eq!(ambiguity_penalty(50), 10);
    }

    #[test]
    fn combine_clamps_above_100() {
        let confidence = combine(100.0, 15, 1);
        assert_eq!(confidence.score, Decimal::from(100));
        assert_eq!(confidence.outcome, MatchOutcome::AutoMatched);
        assert_eq!(confidence.breakdown.raw_total, 115.0);
    }

    #[test]
    fn combine_clamps_below_0() {
        let confidence = combine(0.0, -10, 3);
        assert_eq!(confidence.score, Decimal::ZERO);
        assert_eq!(confidence.outcome, MatchOutcome::Unmatched);
        assert_eq!(confidence.breakdown.raw_total, -20.0);
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(combine(95.0, 0, 1).outcome, MatchOutcome::AutoMatched);
        assert_eq!(combine(94.99, 0, 1).outcome, MatchOutcome::NeedsReview);
        assert_eq!(combine(60.0, 0, 1).outcome, MatchOutcome::NeedsReview);
        assert_eq!(combine(59.99, 0, 1).outcome, MatchOutcome::Unmatched);
    }

    #[test]
    fn penalty_and_date_shift_the_class() {
        // 92 + 15 - 10 = 97: ambiguity alone does not hold this below
        // the auto threshold.
        assert_eq!(combine(92.0, 15, 3).outcome, MatchOutcome::AutoMatched);
        // 85 + 15 - 10 = 90: review.
        assert_eq!(combine(85.0, 15, 3).outcome, MatchOutcome::NeedsReview);
        // 65 + (-10) - 0 = 55: unmatched.
        assert_eq!(combine(65.0, -10, 1).outcome, MatchOutcome::Unmatched);
    }

    #[test]
    fn breakdown_records_all_signals() {
        let confidence = combine(88.5, 10, 2);
        assert_eq!(confidence.breakdown.raw_name, 88.5);
        assert_eq!(confidence.breakdown.weighted_name, 88.5);
        assert_eq!(confidence.breakdown.date, 10);
        assert_eq!(confidence.breakdown.ambiguity, 5);
        assert_eq!(confidence.breakdown.raw_total, 93.5);
        assert_eq!(confidence.score.to_string(), "93.50");
    }
}

//! Pure matching core: text normalization, name similarity, score
//! combination, and candidate selection. No I/O, no clock, no
//! randomness; identical inputs always produce identical results.

pub mod matcher;
pub mod normalizer;
pub mod scoring;
pub mod similarity;

pub use matcher::{MatchDetails, MatchResult, match_transaction};
pub use normalizer::normalize;
pub use scoring::{
    Confidence, MatchBreakdown, MatchOutcome, ambiguity_penalty, combine, date_proximity_score,
};
pub use similarity::name_similarity;

//! Order-independent name similarity.

use strsim::jaro_winkler;

/// Jaro-Winkler similarity between two normalized strings, scaled to
/// `[0, 100]` with two decimal places.
///
/// The score is computed twice, once on the strings as given and once
/// on their token-sorted variants, and the maximum wins. "SMITH JOHN"
/// and "JOHN SMITH" therefore score 100 even though the direct
/// comparison does not.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 100.0;
    }

    let direct = jaro_winkler(a, b);
    let token_sorted = jaro_winkler(&sort_tokens(a), &sort_tokens(b));

    round2(direct.max(token_sorted) * 100.0)
}

fn sort_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split(' ').collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_100() {
        assert_eq!(name_similarity("ACME CORP", "ACME CORP"), 100.0);
    }

    #[test]
    fn empty_input_scores_0() {
        assert_eq!(name_similarity("", "ACME"), 0.0);
        assert_eq!(name_similarity("ACME", ""), 0.0);
        assert_eq!(name_similarity("", ""), 0.0);
    }

    #[test]
    fn reordered_tokens_score_100() {
        assert_eq!(name_similarity("SMITH JOHN", "JOHN SMITH"), 100.0);
        assert_eq!(name_similarity("CORP ACME", "ACME CORP"), 100.0);
    }

    #[test]
    fn bounded_to_0_100() {
        for (a, b) in [
            ("ACME", "XYZ"),
            ("SMITH JOHN", "JOHN SMITH"),
            ("A", "AB"),
            ("GLOBEX CORPORATION", "GLOBEX"),
        ] {
            let score = name_similarity(a, b);
            assert!((0.0..=100.0).contains(&score), "{a} vs {b} -> {score}");
        }
    }

    #[test]
    fn never_below_direct_jaro_winkler() {
        for (a, b) in [
            ("SMITH JOHN", "JOHN SMITH"),
            ("ACME CORP", "ACME CORPORATION"),
            ("GLOBEX", "XYZ CORP"),
        ] {
            let direct = round2(jaro_winkler(a, b) * 100.0);
            assert!(name_similarity(a, b) >= direct, "{a} vs {b}");
        }
    }

    #[test]
    fn dissimilar_strings_score_low() {
        assert!(name_similarity("ABC", "XYZ") < 60.0);
    }

    #[test]
    fn symmetric() {
        let forward = name_similarity("ACME CORP", "ACME CORPORATION");
        let backward = name_similarity("ACME CORPORATION", "ACME CORP");
        assert_eq!(forward, backward);
    }
}

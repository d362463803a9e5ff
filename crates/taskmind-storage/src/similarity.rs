//! Lexical similarity between texts (token-set Jaccard).
//!
//! This is a word-overlap measure only; it knows nothing about meaning or
//! embeddings.

use std::collections::HashSet;

/// Lower-cased word tokens of `text`. Anything that is not alphanumeric or
/// `_` separates tokens; empty tokens are dropped.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// |a ∩ b| / |a ∪ b|, or 0.0 when both sets are empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Jaccard similarity of the token sets of two texts.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokenize(a), &tokenize(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        let tokens = tokenize("Urgent: deployment-issue, on PROD_2!");
        let expected: HashSet<String> = ["urgent", "deployment", "issue", "on", "prod_2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_tokenize_collapses_duplicates_and_blanks() {
        assert_eq!(tokenize("a a  a").len(), 1);
        assert!(tokenize("  ,;  ").is_empty());
    }

    #[test]
    fn test_identical_texts() {
        assert_eq!(text_similarity("urgent deployment issue", "Issue URGENT deployment"), 1.0);
    }

    #[test]
    fn test_partial_overlap() {
        // {urgent, deployment, issue} vs {deployment, issue, resolved}: 2 / 4
        let sim = text_similarity("urgent deployment issue", "deployment issue resolved");
        assert!((sim - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_disjoint_and_empty() {
        assert_eq!(text_similarity("alpha beta", "gamma delta"), 0.0);
        assert_eq!(text_similarity("", ""), 0.0);
        assert_eq!(text_similarity("alpha", ""), 0.0);
    }
}

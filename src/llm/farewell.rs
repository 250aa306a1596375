//! Fuzzy detection of "end the conversation" utterances.
//!
//! Scores follow the weighted-ratio scheme popular in fuzzy string
//! matching: the best of a plain ratio, token-sorted and token-set ratios,
//! plus scaled partial (substring) variants when the two strings differ a
//! lot in length. Scores range from 0 to 100.

use similar::TextDiff;

/// Partial scores are discounted when one string is this much longer.
const PARTIAL_LENGTH_RATIO: f64 = 1.5;
/// Beyond this length ratio partial scores are discounted further.
const LONG_LENGTH_RATIO: f64 = 8.0;
const PARTIAL_SCALE: f64 = 0.9;
const LONG_PARTIAL_SCALE: f64 = 0.6;
const TOKEN_SCALE: f64 = 0.95;

/// Matches transcripts against a list of farewell phrases.
#[derive(Debug, Clone)]
pub struct FarewellMatcher {
    phrases: Vec<String>,
    threshold: u8,
}

impl FarewellMatcher {
    /// Create a matcher; a score of at least `threshold` counts as a farewell.
    pub fn new(phrases: impl IntoIterator<Item = impl Into<String>>, threshold: u8) -> Self {
        Self {
            phrases: phrases.into_iter().map(Into::into).collect(),
            threshold,
        }
    }

    /// The best-matching phrase and its score.
    pub fn best_match(&self, text: &str) -> Option<(&str, u8)> {
        self.phrases
            .iter()
            .map(|p| (p.as_str(), weighted_ratio(text, p)))
            .max_by_key(|&(_, score)| score)
    }

    /// Whether `text` is close enough to one of the phrases.
    pub fn is_farewell(&self, text: &str) -> bool {
        self.best_match(text)
            .is_some_and(|(_, score)| score >= self.threshold)
    }
}

/// Weighted similarity score (0-100), case and punctuation insensitive.
pub fn weighted_ratio(a: &str, b: &str) -> u8 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let base = ratio(&a, &b);
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    let length_ratio = len_a.max(len_b) as f64 / len_a.min(len_b) as f64;

    let best = if length_ratio < PARTIAL_LENGTH_RATIO {
        let token_sort = ratio(&sorted_tokens(&a), &sorted_tokens(&b)) * TOKEN_SCALE;
        let token_set = token_set_ratio(&a, &b, ratio) * TOKEN_SCALE;
        base.max(token_sort).max(token_set)
    } else {
        let scale = if length_ratio > LONG_LENGTH_RATIO {
            LONG_PARTIAL_SCALE
        } else {
            PARTIAL_SCALE
        };
        let partial = partial_ratio(&a, &b) * scale;
        let token_sort =
            partial_ratio(&sorted_tokens(&a), &sorted_tokens(&b)) * TOKEN_SCALE * scale;
        let token_set = token_set_ratio(&a, &b, partial_ratio) * TOKEN_SCALE * scale;
        base.max(partial).max(token_sort).max(token_set)
    };
    best.round().clamp(0.0, 100.0) as u8
}

/// Lowercase, non-alphanumerics to spaces, whitespace collapsed.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    f64::from(TextDiff::from_chars(a, b).ratio()) * 100.0
}

/// Best ratio of the shorter string against every equally long window of
/// the longer one.
fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if short.is_empty() {
        return 0.0;
    }
    let long_chars: Vec<char> = long.chars().collect();
    let window = short.chars().count();
    let mut best: f64 = 0.0;
    for start in 0..=long_chars.len() - window {
        let candidate: String = long_chars[start..start + window].iter().collect();
        best = best.max(ratio(short, &candidate));
        if best >= 99.5 {
            return 100.0;
        }
    }
    best
}

fn sorted_tokens(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn token_set_ratio(a: &str, b: &str, scorer: fn(&str, &str) -> f64) -> f64 {
    use std::collections::BTreeSet;

    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    let join = |set: Vec<&str>| set.join(" ");

    let common = join(ta.intersection(&tb).copied().collect());
    let only_a = join(ta.difference(&tb).copied().collect());
    let only_b = join(tb.difference(&ta).copied().collect());

    let with = |rest: &str| format!("{common} {rest}").trim().to_owned();
    let combined_a = with(&only_a);
    let combined_b = with(&only_b);

    scorer(&common, &combined_a)
        .max(scorer(&common, &combined_b))
        .max(scorer(&combined_a, &combined_b))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::ConversationConfig;

    fn matcher() -> FarewellMatcher {
        let config = ConversationConfig::default();
        FarewellMatcher::new(config.exit_phrases, config.exit_threshold)
    }

    #[test]
    fn identical_strings_score_100() {
        assert_eq!(weighted_ratio("Auf Wiedersehen", "auf wiedersehen!"), 100);
    }

    #[test]
    fn disjoint_strings_score_low() {
        assert!(weighted_ratio("xyz", "Auf Wiedersehen") < 30);
        assert_eq!(weighted_ratio("", "tschüss"), 0);
    }

    #[test]
    fn word_order_is_forgiven() {
        assert!(weighted_ratio("beenden wir das gespräch", "wir beenden das gespräch") >= 90);
    }

    #[test]
    fn embedded_phrase_scores_via_partial_match() {
        // Length ratio >= 1.5, so the partial score (scaled by 0.9) applies.
        assert_eq!(weighted_ratio("ok tschüss dann bis bald", "tschüss"), 90);
    }

    #[test]
    fn farewells_are_detected_case_and_punctuation_insensitive() {
        let m = matcher();
        assert!(m.is_farewell("Auf Wiedersehen!"));
        assert!(m.is_farewell("TSCHÜSS."));
        assert!(m.is_farewell("Okay, tschüss"));
    }

    #[test]
    fn ordinary_requests_are_not_farewells() {
        let m = matcher();
        assert!(!m.is_farewell("Wie wird das Wetter morgen in Berlin?"));
        assert!(!m.is_farewell("Erzähl mir einen Witz über Katzen."));
    }
}

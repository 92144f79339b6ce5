//! TF-IDF term extraction over a single block
//!
//! Each block is scored as a one-document corpus: lowercase, strip
//! punctuation, tokenize, drop short tokens and stopwords, stem, then count
//! unigrams and adjacent bigrams. The `top_n` most frequent terms are kept
//! (ties alphabetical) and weighted by raw count times the smoothed idf,
//! then L2-normalized. Terms scoring strictly above the threshold are
//! returned, highest first.

use std::collections::BTreeMap;
use std::fmt;

use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};

use possum_core::config::IndexConfig;
use possum_core::TagKind;

use crate::stopwords::is_stopword;

const MIN_TOKEN_CHARS: usize = 2;

/// A scored term for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTag {
    pub term: String,
    pub kind: TagKind,
    pub score: f64,
}

/// Preview and terms derived from one block's plaintext.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockAnalysis {
    pub preview: String,
    pub tags: Vec<ExtractedTag>,
}

/// Decode a block for indexing.
///
/// Valid UTF-8 decodes as is. A multi-byte character split by a block
/// boundary is dropped from both sides: the lead bytes at the end of one
/// block and up to three continuation bytes at the start of the next.
/// Anything else is treated as binary and yields `None`.
pub fn decode_preview(bytes: &[u8]) -> Option<String> {
    let carried = bytes
        .iter()
        .take(3)
        .take_while(|b| (**b & 0xC0) == 0x80)
        .count();
    let bytes = &bytes[carried..];
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s.to_owned()),
        Err(e) if e.error_len().is_none() => {
            let valid = &bytes[..e.valid_up_to()];
            std::str::from_utf8(valid).ok().map(str::to_owned)
        }
        Err(_) => None,
    }
}

/// First `max_chars` characters of `text`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// smooth idf: ln((1 + n) / (1 + df)) + 1
fn smooth_idf(n_docs: usize, doc_freq: usize) -> f64 {
    ((1 + n_docs) as f64 / (1 + doc_freq) as f64).ln() + 1.0
}

pub struct TagExtractor {
    stemmer: Stemmer,
    top_n: usize,
    threshold: f64,
    preview_chars: usize,
}

impl TagExtractor {
    pub fn new(top_n: usize, threshold: f64, preview_chars: usize) -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
            top_n,
            threshold,
            preview_chars,
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(
            config.top_n,
            config.relevance_threshold,
            config.preview_chars,
        )
    }

    /// Decode, excerpt, and extract in one pass. Binary blocks get an empty
    /// preview and no terms.
    pub fn analyze(&self, bytes: &[u8]) -> BlockAnalysis {
        match decode_preview(bytes) {
            Some(text) => BlockAnalysis {
                preview: excerpt(&text, self.preview_chars),
                tags: self.extract(&text),
            },
            None => BlockAnalysis::default(),
        }
    }

    /// Normalized, stemmed token stream.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let cleaned: String = lowered
            .chars()
            .filter(|c| *c != '\'' && *c != '\u{2019}')
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
            .collect();

        cleaned
            .split_whitespace()
            .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
            .filter(|t| !is_stopword(t))
            .map(|t| self.stemmer.stem(t).into_owned())
            .collect()
    }

    pub fn extract(&self, text: &str) -> Vec<ExtractedTag> {
        let tokens = self.tokenize(text);
        if tokens.is_empty() || self.top_n == 0 {
            return Vec::new();
        }

        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in &tokens {
            *counts.entry(token.clone()).or_default() += 1;
        }
        for pair in tokens.windows(2) {
            *counts.entry(format!("{} {}", pair[0], pair[1])).or_default() += 1;
        }

        // BTreeMap iteration is alphabetical; the stable sort keeps that
        // order among equal counts.
        let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(self.top_n);

        let idf = smooth_idf(1, 1);
        let weights: Vec<f64> = ranked.iter().map(|(_, c)| f64::from(*c) * idf).collect();
        let norm = weights.iter().map(|w| w * w).sum::<f64>().sqrt();

        let mut tags: Vec<ExtractedTag> = ranked
            .into_iter()
            .zip(weights)
            .map(|((term, _), w)| ExtractedTag {
                term,
                kind: TagKind::Tfidf,
                score: w / norm,
            })
            .filter(|t| t.score > self.threshold)
            .collect();

        tags.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.term.cmp(&b.term)));
        tags
    }
}

impl Default for TagExtractor {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

impl fmt::Debug for TagExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagExtractor")
            .field("top_n", &self.top_n)
            .field("threshold", &self.threshold)
            .field("preview_chars", &self.preview_chars)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn terms(tags: &[ExtractedTag]) -> Vec<&str> {
        tags.iter().map(|t| t.term.as_str()).collect()
    }

    #[test]
    fn decode_valid_utf8() {
        assert_eq!(decode_preview("héllo".as_bytes()).as_deref(), Some("héllo"));
    }

    #[test]
    fn decode_skips_continuation_bytes_carried_from_previous_block() {
        let text = "naïve café".as_bytes();
        // split inside the two-byte 'ï'
        let cut = text.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let (head, tail) = text.split_at(cut);
        assert_eq!(decode_preview(head).as_deref(), Some("na"));
        assert_eq!(decode_preview(tail).as_deref(), Some("ve café"));

        assert_eq!(decode_preview(b"\x80\x80\x80ok").as_deref(), Some("ok"));
        assert_eq!(decode_preview(b"\x80\x80\x80\x80ok"), None);
    }

    #[test]
    fn decode_drops_truncated_trailing_sequence() {
        assert_eq!(decode_preview(b"caf\xC3").as_deref(), Some("caf"));
    }

    #[test]
    fn decode_rejects_binary() {
        assert_eq!(decode_preview(b"\xFFabc"), None);
        assert_eq!(decode_preview(b"ab\xC3(cd"), None);
    }

    #[test]
    fn excerpt_counts_characters() {
        assert_eq!(excerpt("ééééé", 3), "ééé");
        assert_eq!(excerpt("ab", 10), "ab");
    }

    #[test]
    fn smooth_idf_single_document_is_one() {
        assert!((smooth_idf(1, 1) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn counts_unigrams_and_bigrams() {
        let ex = TagExtractor::default();
        let tags = ex.extract("hash hash hash block");

        assert_eq!(terms(&tags), vec!["hash", "hash hash", "block", "hash block"]);
        let norm = 15f64.sqrt();
        assert!((tags[0].score - 3.0 / norm).abs() < 1e-9);
        assert!((tags[1].score - 2.0 / norm).abs() < 1e-9);
        assert!((tags[2].score - 1.0 / norm).abs() < 1e-9);
        assert!(tags.iter().all(|t| t.kind == TagKind::Tfidf));
    }

    #[test]
    fn keeps_top_n_with_alphabetical_ties() {
        let ex = TagExtractor::new(10, 0.1, 200);
        let text = "alpha bravo charlie delta echo foxtrot golf hotel india juliet kilo lima";
        let tags = ex.extract(text);

        assert_eq!(tags.len(), 10);
        let expected = 1.0 / 10f64.sqrt();
        assert!(tags.iter().all(|t| (t.score - expected).abs() < 1e-9));
        let mut sorted = terms(&tags);
        sorted.sort();
        assert_eq!(terms(&tags), sorted, "equal scores are ordered by term");
    }

    #[test]
    fn low_scores_are_filtered() {
        let ex = TagExtractor::default();
        let text = format!("{} tag", "key ".repeat(20));
        let tags = ex.extract(&text);

        assert_eq!(terms(&tags), vec!["key", "key key"]);
        assert!(tags.iter().all(|t| t.score > 0.1));
    }

    #[test]
    fn punctuation_stopwords_and_short_tokens_are_dropped() {
        let ex = TagExtractor::default();
        let tokens = ex.tokenize("The hash, of a Block's x!");
        assert_eq!(tokens, vec!["hash".to_string(), "block".to_string()]);
    }

    #[test]
    fn empty_and_stopword_only_text_has_no_tags() {
        let ex = TagExtractor::default();
        assert!(ex.extract("").is_empty());
        assert!(ex.extract("the and of it").is_empty());
    }

    #[test]
    fn analyze_binary_block_is_empty() {
        let ex = TagExtractor::default();
        assert_eq!(ex.analyze(&[0xFF, 0xFE, 0x00, 0x41]), BlockAnalysis::default());
    }

    #[test]
    fn analyze_caps_preview() {
        let ex = TagExtractor::new(10, 0.1, 8);
        let analysis = ex.analyze(b"storage pairing storage pairing");
        assert_eq!(analysis.preview, "storage ");
        assert!(!analysis.tags.is_empty());
    }

    proptest! {
        #[test]
        fn scores_are_bounded_and_sorted(text in "[a-z ]{0,400}") {
            let ex = TagExtractor::default();
            let tags = ex.extract(&text);
            prop_assert!(tags.len() <= 10);
            for t in &tags {
                prop_assert!(t.score > 0.1 && t.score <= 1.0 + 1e-9);
            }
            for pair in tags.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}

//! Sentence segmentation for catalog descriptions.
//!
//! Boundaries come from the Unicode sentence rules (UAX #29). Those rules
//! break after every `. ` followed by a capital, which splits titles and
//! initials ("Dr. No", "J. R. R. Tolkien"), so pieces ending in a known
//! abbreviation or a single-letter initial are joined with the next piece.
//! Words like "no" only count as abbreviations when a number follows
//! ("No. 5"), and a lone "I." ends a sentence unless it sits in a run of
//! initials.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

const DEFAULT_ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "mt", "ft", "vs", "gen", "col", "lt",
    "sgt", "capt", "cmdr", "gov", "sen", "rep", "rev", "fr", "vol", "u.s", "u.k", "d.c",
    "l.a", "n.y",
];

const DEFAULT_NUMERAL_ABBREVIATIONS: &[&str] = &["no", "nos"];

/// Configuration for [`SentenceSegmenter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Lowercase abbreviations, without the trailing period, that never end
    /// a sentence.
    pub abbreviations: Vec<String>,

    /// Abbreviations that only continue the sentence when a number follows.
    pub numeral_abbreviations: Vec<String>,

    /// Treat a single capital letter followed by a period as an initial.
    pub merge_initials: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            abbreviations: DEFAULT_ABBREVIATIONS
                .iter()
                .map(|abbreviation| abbreviation.to_string())
                .collect(),
            numeral_abbreviations: DEFAULT_NUMERAL_ABBREVIATIONS
                .iter()
                .map(|abbreviation| abbreviation.to_string())
                .collect(),
            merge_initials: true,
        }
    }
}

/// Splits free text into sentences.
#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    abbreviations: HashSet<String>,
    numeral_abbreviations: HashSet<String>,
    merge_initials: bool,
}

impl SentenceSegmenter {
    /// Create a segmenter with the default abbreviation list.
    pub fn new() -> Self {
        Self::with_config(&SegmenterConfig::default())
    }

    /// Create a segmenter from configuration.
    pub fn with_config(config: &SegmenterConfig) -> Self {
        Self {
            abbreviations: normalize(&config.abbreviations),
            numeral_abbreviations: normalize(&config.numeral_abbreviations),
            merge_initials: config.merge_initials,
        }
    }

    /// Split `text` into sentences, in order.
    ///
    /// Sentence text is kept verbatim apart from surrounding whitespace.
    /// Empty or whitespace-only input yields no sentences; text without any
    /// terminator comes back as a single sentence.
    pub fn segment(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut pieces = text.split_sentence_bound_indices().peekable();
        let mut pending: Option<usize> = None;

        while let Some((offset, piece)) = pieces.next() {
            let start = *pending.get_or_insert(offset);
            let end = offset + piece.len();
            if let Some(&(_, next)) = pieces.peek() {
                if self.joins_next(&text[start..end], next) {
                    continue;
                }
            }
            push_trimmed(&mut sentences, &text[start..end]);
            pending = None;
        }

        sentences
    }

    /// Whether the period ending `sentence` belongs to an abbreviation, so
    /// the sentence carries on into `next`.
    fn joins_next(&self, sentence: &str, next: &str) -> bool {
        let trimmed = sentence.trim_end();
        if !trimmed.ends_with('.') {
            return false;
        }

        let mut tokens = trimmed.split_whitespace().rev();
        let Some(last_token) = tokens.next() else {
            return false;
        };
        let word = last_token
            .trim_start_matches(|c: char| !c.is_alphanumeric())
            .trim_end_matches('.')
            .to_lowercase();

        if self.abbreviations.contains(&word) {
            return true;
        }
        if self.numeral_abbreviations.contains(&word) {
            return next
                .trim_start()
                .starts_with(|c: char| c.is_ascii_digit());
        }
        if !self.merge_initials {
            return false;
        }

        let Some(letter) = initial(last_token) else {
            return false;
        };
        let previous = tokens.next();
        if previous.and_then(initial).is_some()
            || next.split_whitespace().next().and_then(initial).is_some()
        {
            return true;
        }

        // Lone capitals only merge after a capitalized word, and "I." never.
        letter != 'I' && previous.is_none_or(is_capitalized)
    }
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(abbreviations: &[String]) -> HashSet<String> {
    abbreviations
        .iter()
        .map(|abbreviation| abbreviation.trim_end_matches('.').to_lowercase())
        .collect()
}

/// The letter of a single-capital initial such as `J.` or `(R.`.
fn initial(token: &str) -> Option<char> {
    let body = token
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .strip_suffix('.')?;
    let mut chars = body.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_uppercase() => Some(c),
        _ => None,
    }
}

fn is_capitalized(token: &str) -> bool {
    token
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .chars()
        .next()
        .is_some_and(char::is_uppercase)
}

fn push_trimmed(sentences: &mut Vec<String>, sentence: &str) {
    let sentence = sentence.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.to_string());
    }
}

//! Sentence filters applied between paragraph extraction and text cleanup.
//!
//! A filter sees one sentence at a time (the text between two `". "`
//! separators) and decides whether it stays in the output.

use phdharvest_shared::CleanConfig;

/// Decides whether a sentence is kept in the cleaned text.
pub trait SentenceFilter: Send + Sync {
    fn keep(&self, sentence: &str) -> bool;

    /// Human-readable filter name for tracing.
    fn name(&self) -> &str;
}

/// Accepts every sentence.
pub struct KeepAll;

impl SentenceFilter for KeepAll {
    fn keep(&self, _sentence: &str) -> bool {
        true
    }

    fn name(&self) -> &str {
        "keep-all"
    }
}

/// Rejects number-heavy fragments (table rows, TOC lines, lab value dumps).
pub struct DigitRatioFilter {
    pub max_ratio: f64,
}

impl SentenceFilter for DigitRatioFilter {
    fn keep(&self, sentence: &str) -> bool {
        let mut total = 0usize;
        let mut digits = 0usize;
        for c in sentence.chars().filter(|c| !c.is_whitespace()) {
            total += 1;
            if c.is_ascii_digit() {
                digits += 1;
            }
        }
        if total == 0 {
            return false;
        }
        (digits as f64 / total as f64) <= self.max_ratio
    }

    fn name(&self) -> &str {
        "digit-ratio"
    }
}

/// Rejects sentences shorter than `min_words` words.
pub struct MinWordsFilter {
    pub min_words: usize,
}

impl SentenceFilter for MinWordsFilter {
    fn keep(&self, sentence: &str) -> bool {
        sentence.split_whitespace().count() >= self.min_words
    }

    fn name(&self) -> &str {
        "min-words"
    }
}

/// Keeps a sentence only if every inner filter keeps it.
pub struct AllOf(pub Vec<Box<dyn SentenceFilter>>);

impl SentenceFilter for AllOf {
    fn keep(&self, sentence: &str) -> bool {
        self.0.iter().all(|f| f.keep(sentence))
    }

    fn name(&self) -> &str {
        "all-of"
    }
}

/// Build the filter chain described by the `[cleaning]` config.
pub fn filter_from_config(config: &CleanConfig) -> Box<dyn SentenceFilter> {
    let mut filters: Vec<Box<dyn SentenceFilter>> = Vec::new();

    if let Some(max_ratio) = config.max_digit_ratio {
        filters.push(Box::new(DigitRatioFilter { max_ratio }));
    }
    if let Some(min_words) = config.min_sentence_words {
        filters.push(Box::new(MinWordsFilter { min_words }));
    }

    match filters.len() {
        0 => Box::new(KeepAll),
        1 => filters.remove(0),
        _ => Box::new(AllOf(filters)),
    }
}

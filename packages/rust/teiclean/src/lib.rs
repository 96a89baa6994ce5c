//! TEI-to-plain-text cleanup for GROBID fulltext output.
//!
//! GROBID returns a TEI XML document per thesis. This crate strips it down to
//! the running text: citations, tables and the table of contents are cut out
//! of the markup, paragraphs are extracted and filtered sentence by sentence,
//! and the remaining bibliographic artifacts are scrubbed from the text.

mod cleanup;
pub mod filter;

use tracing::{debug, instrument};

use phdharvest_shared::CleanConfig;

pub use filter::{
    AllOf, DigitRatioFilter, KeepAll, MinWordsFilter, SentenceFilter, filter_from_config,
};

/// Separator GROBID paragraphs are split into sentences on.
const SENTENCE_SEPARATOR: &str = ". ";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of cleaning one TEI document.
#[derive(Debug, Clone)]
pub struct CleanResult {
    /// The final single-line plain text.
    pub text: String,
    /// Number of non-empty paragraphs extracted from the markup.
    pub paragraphs: usize,
    /// Sentences accepted by the filter.
    pub sentences_kept: usize,
    /// Sentences rejected by the filter.
    pub sentences_dropped: usize,
}

impl CleanResult {
    /// Whether cleaning left no text at all.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Whitespace-separated word count of the cleaned text.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

// ---------------------------------------------------------------------------
// Cleaner
// ---------------------------------------------------------------------------

/// Clean a TEI document using the sentence filter described by `config`.
pub fn clean_tei(xml: &str, config: &CleanConfig) -> CleanResult {
    let filter = filter_from_config(config);
    clean_tei_with(xml, config, filter.as_ref())
}

/// Clean a TEI document with an explicit sentence filter.
///
/// Passes, in order:
/// 1. Remove `<ref>` citations
/// 2. Remove the table of contents and tables (when enabled)
/// 3. Extract `<p>` paragraphs as plain text
/// 4. Filter sentences
/// 5. Remove the download footer, dot leaders and citation markers
/// 6. Collapse whitespace
#[instrument(skip_all, fields(xml_len = xml.len(), filter = filter.name()))]
pub fn clean_tei_with(xml: &str, config: &CleanConfig, filter: &dyn SentenceFilter) -> CleanResult {
    let mut markup = cleanup::remove_refs(xml);
    if config.drop_table_of_contents {
        markup = cleanup::remove_table_of_contents(&markup);
    }
    if config.drop_tables {
        markup = cleanup::remove_tables(&markup);
    }

    let paragraphs = cleanup::extract_paragraphs(&markup);
    debug!(paragraphs = paragraphs.len(), "paragraphs extracted");

    let (filtered, sentences_kept, sentences_dropped) = filter_sentences(&paragraphs, filter);

    let mut text = cleanup::remove_download_footer(&filtered);
    text = cleanup::remove_dot_leaders(&text);
    text = cleanup::remove_citation_markers(&text);
    text = cleanup::collapse_whitespace(&text);

    debug!(
        sentences_kept,
        sentences_dropped,
        text_len = text.len(),
        "cleanup complete"
    );

    CleanResult {
        text,
        paragraphs: paragraphs.len(),
        sentences_kept,
        sentences_dropped,
    }
}

/// Join paragraphs, split into sentences, and keep the accepted ones.
///
/// Returns the re-joined text and the kept/dropped counts.
fn filter_sentences(paragraphs: &[String], filter: &dyn SentenceFilter) -> (String, usize, usize) {
    let joined = paragraphs.join(" ");
    if joined.is_empty() {
        return (String::new(), 0, 0);
    }

    let mut kept = Vec::new();
    let mut dropped = 0;
    for sentence in joined.split(SENTENCE_SEPARATOR) {
        if filter.keep(sentence) {
            kept.push(sentence);
        } else {
            dropped += 1;
        }
    }

    let count = kept.len();
    (kept.join(SENTENCE_SEPARATOR), count, dropped)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
